//! In-memory collaborators shared by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::api::OrderGateway;
use crate::error::{PosError, Result};
use crate::models::{DashboardData, RemoteMenu, RemoteOrder, StatusUpdateAck, WalkinWithItems};
use crate::print::ReceiptPrinter;
use crate::receipt_renderer::RenderedReceipt;
use crate::session::Session;

pub fn session() -> Session {
    Session::new("test-token", 3, "Test Canteen")
}

/// How the fake answers a status-update push.
#[derive(Debug, Clone)]
pub enum Ack {
    /// Every sent id confirmed by count.
    All,
    Count(u64),
    Ids(Vec<i64>),
    NetworkError,
    Unauthorized,
}

impl Ack {
    fn answer(&self, sent: &[i64]) -> Result<StatusUpdateAck> {
        match self {
            Ack::All => Ok(StatusUpdateAck {
                updated_count: sent.len() as u64,
                updated_ids: None,
            }),
            Ack::Count(n) => Ok(StatusUpdateAck {
                updated_count: *n,
                updated_ids: None,
            }),
            Ack::Ids(ids) => Ok(StatusUpdateAck {
                updated_count: ids.len() as u64,
                updated_ids: Some(ids.clone()),
            }),
            Ack::NetworkError => Err(PosError::Network("connection refused".into())),
            Ack::Unauthorized => Err(PosError::Unauthorized("Invalid or expired token".into())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FetchFailure {
    Network,
    Malformed,
    Unauthorized,
}

pub struct FakeGateway {
    pub orders: Mutex<Vec<RemoteOrder>>,
    pub fetch_failure: Mutex<Option<FetchFailure>>,
    pub fetch_delay: Mutex<Duration>,
    pub fetch_calls: AtomicUsize,
    pub order_ack: Mutex<Ack>,
    pub walkin_ack: Mutex<Ack>,
    pub pushed_orders: Mutex<Vec<Vec<i64>>>,
    pub pushed_walkins: Mutex<Vec<Vec<i64>>>,
    pub menu: Mutex<Option<RemoteMenu>>,
    pub reachable: AtomicBool,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            orders: Mutex::new(Vec::new()),
            fetch_failure: Mutex::new(None),
            fetch_delay: Mutex::new(Duration::ZERO),
            fetch_calls: AtomicUsize::new(0),
            order_ack: Mutex::new(Ack::All),
            walkin_ack: Mutex::new(Ack::All),
            pushed_orders: Mutex::new(Vec::new()),
            pushed_walkins: Mutex::new(Vec::new()),
            menu: Mutex::new(None),
            reachable: AtomicBool::new(true),
        }
    }
}

impl FakeGateway {
    pub fn with_orders(orders: Vec<RemoteOrder>) -> Self {
        let gateway = Self::default();
        *gateway.orders.lock().unwrap() = orders;
        gateway
    }

    pub fn set_order_ack(&self, ack: Ack) {
        *self.order_ack.lock().unwrap() = ack;
    }

    pub fn set_walkin_ack(&self, ack: Ack) {
        *self.walkin_ack.lock().unwrap() = ack;
    }

    pub fn set_fetch_failure(&self, failure: Option<FetchFailure>) {
        *self.fetch_failure.lock().unwrap() = failure;
    }

    pub fn order_pushes(&self) -> Vec<Vec<i64>> {
        self.pushed_orders.lock().unwrap().clone()
    }

    pub fn walkin_pushes(&self) -> Vec<Vec<i64>> {
        self.pushed_walkins.lock().unwrap().clone()
    }
}

impl OrderGateway for FakeGateway {
    async fn fetch_todays_orders(&self, _session: &Session) -> Result<Vec<RemoteOrder>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failure = *self.fetch_failure.lock().unwrap();
        match failure {
            Some(FetchFailure::Network) => Err(PosError::Network("timed out".into())),
            Some(FetchFailure::Malformed) => Err(PosError::MalformedResponse(
                "expected `data` to be an array, got object".into(),
            )),
            Some(FetchFailure::Unauthorized) => {
                Err(PosError::Unauthorized("Invalid or expired token".into()))
            }
            None => Ok(self.orders.lock().unwrap().clone()),
        }
    }

    async fn update_order_status(&self, _session: &Session, order_ids: &[i64]) -> Result<StatusUpdateAck> {
        self.pushed_orders.lock().unwrap().push(order_ids.to_vec());
        let ack = self.order_ack.lock().unwrap().clone();
        ack.answer(order_ids)
    }

    async fn update_walkin_status(
        &self,
        _session: &Session,
        walkins: &[WalkinWithItems],
    ) -> Result<StatusUpdateAck> {
        let ids: Vec<i64> = walkins.iter().map(|w| w.walkin.id).collect();
        self.pushed_walkins.lock().unwrap().push(ids.clone());
        let ack = self.walkin_ack.lock().unwrap().clone();
        ack.answer(&ids)
    }

    async fn fetch_menu(&self, _session: &Session, menu_id: i64) -> Result<RemoteMenu> {
        self.menu
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PosError::NotFound(format!("menu {menu_id}")))
    }

    async fn fetch_dashboard(&self, _session: &Session) -> Result<DashboardData> {
        Ok(DashboardData {
            total_orders: 12,
            total_amount: 840.0,
            completed_orders: 9,
        })
    }

    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Printer that records what it was asked to print.
#[derive(Default)]
pub struct FakePrinter {
    pub fail: AtomicBool,
    pub printed: Mutex<Vec<RenderedReceipt>>,
}

impl FakePrinter {
    pub fn failing() -> Self {
        let printer = Self::default();
        printer.fail.store(true, Ordering::SeqCst);
        printer
    }

    pub fn count(&self) -> usize {
        self.printed.lock().unwrap().len()
    }

    pub fn last_html(&self) -> Option<String> {
        self.printed.lock().unwrap().last().map(|r| r.html.clone())
    }
}

impl ReceiptPrinter for FakePrinter {
    fn print(&self, receipt: &RenderedReceipt) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PosError::PrintFailed("printer offline".into()));
        }
        self.printed.lock().unwrap().push(receipt.clone());
        Ok(format!("fake://{}/{}", receipt.entity_type, receipt.entity_id))
    }
}
