//! Canteen POS - offline order cache and sync reconciliation core.
//!
//! Pre-paid orders are pulled from the canteen server into a local SQLite
//! cache, completed at the counter (receipt print, then status flip) and
//! pushed back upstream, where they are deleted locally once the server
//! confirms them. Walk-in sales are rung up from the cached menu and
//! reconciled the same way. [`CanteenPos`] wires the pieces together for an
//! embedding application; there is no UI in this crate.

use anyhow::Context;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod completion;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod menu;
pub mod models;
pub mod orders;
pub mod print;
pub mod receipt_renderer;
pub mod session;
pub mod storage;
pub mod summary;
pub mod sync;
pub mod walkins;

#[cfg(test)]
mod test_support;

pub use api::{HttpGateway, OrderGateway};
pub use completion::CompletionReceipt;
pub use config::PosConfig;
pub use error::{PosError, Result};
pub use print::{HtmlFilePrinter, ReceiptPrinter};
pub use session::Session;
pub use sync::{PullReport, PushReport, SyncReport};
pub use walkins::{WalkinDraft, WalkinLine};

use crate::db::DbState;
use crate::models::{DashboardData, Menu, MenuItem, Order, OrderStatus};
use crate::receipt_renderer::LayoutConfig;
use crate::session::SessionState;
use crate::storage::{CredentialStore, KeyringStore, MemoryStore};
use crate::summary::{ItemSummary, LocalOrderCounts};
use crate::sync::{SyncContext, SyncState};

// ============================================================================
// Logging
// ============================================================================

/// Install console + daily rolling file logging under `log_dir`.
///
/// The filter defaults to `info,canteen_pos_lib=debug` and honours
/// `RUST_LOG`. Keep the returned guard alive; dropping it flushes and stops
/// the file writer.
pub fn init_logging(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,canteen_pos_lib=debug"));

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log dir {}", log_dir.display()))?;
    diagnostics::prune_old_logs(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    info!("Starting Canteen POS v{}", env!("CARGO_PKG_VERSION"));
    Ok(guard)
}

// ============================================================================
// Facade
// ============================================================================

/// Handle to a running background sync loop.
pub struct BackgroundSync {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundSync {
    /// Stop the loop and wait for the in-flight cycle, if any, to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "sync loop task ended abnormally");
        }
    }
}

/// The canteen POS core: local store, gateway, printer, session and sync.
pub struct CanteenPos<G = HttpGateway, P = HtmlFilePrinter> {
    config: PosConfig,
    ctx: SyncContext<G>,
    printer: Arc<P>,
    layout: LayoutConfig,
}

impl CanteenPos {
    /// Open the local store under `config.data_dir` and build the HTTP
    /// gateway and file printer.
    pub fn open(config: PosConfig) -> anyhow::Result<Self> {
        let config = config.validate().context("invalid configuration")?;
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("create data dir {}", config.data_dir.display()))?;
        let db = db::init(&config.data_dir).context("open local database")?;
        let gateway = HttpGateway::new(&config).context("build HTTP gateway")?;
        let printer = HtmlFilePrinter::new(config.receipts_dir());

        info!(
            api = %gateway.base_url(),
            data_dir = %config.data_dir.display(),
            "canteen POS opened"
        );
        Ok(Self::assemble(config, db, gateway, printer, Arc::new(KeyringStore)))
    }
}

impl<G: OrderGateway, P: ReceiptPrinter> CanteenPos<G, P> {
    /// Assemble from ready-made parts. The session is kept in memory only.
    pub fn from_parts(config: PosConfig, db: DbState, gateway: G, printer: P) -> Result<Self> {
        let config = config.validate()?;
        Ok(Self::assemble(config, db, gateway, printer, Arc::new(MemoryStore::default())))
    }

    fn assemble(
        config: PosConfig,
        db: DbState,
        gateway: G,
        printer: P,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let layout = LayoutConfig {
            canteen_name: config.canteen_display_name.clone(),
            ..LayoutConfig::default()
        };
        Self {
            config,
            ctx: SyncContext {
                db: Arc::new(db),
                gateway: Arc::new(gateway),
                sessions: Arc::new(SessionState::new()),
                state: Arc::new(SyncState::new()),
                credentials,
            },
            printer: Arc::new(printer),
            layout,
        }
    }

    pub fn config(&self) -> &PosConfig {
        &self.config
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.ctx.state
    }

    // -- Session -------------------------------------------------------------

    pub fn login(&self, session: Session) -> Result<()> {
        if let Err(e) = self.ctx.credentials.save(&session) {
            warn!(error = %e, "could not persist session; login lasts until exit");
        }
        self.ctx.sessions.begin(session)
    }

    /// Reload a persisted session. Returns whether one was found.
    pub fn restore_session(&self) -> Result<bool> {
        match self.ctx.credentials.load() {
            Some(session) => {
                self.ctx.sessions.begin(session)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// End the session, forget the stored credentials and the cached menu.
    /// Orders awaiting push-back are kept.
    pub fn logout(&self) -> Result<()> {
        self.ctx.end_session()?;
        let conn = self.ctx.db.conn.lock()?;
        menu::clear_menu(&conn)
    }

    pub fn is_logged_in(&self) -> bool {
        self.ctx.sessions.is_active()
    }

    /// Pass a result through, ending the session when the server rejected
    /// the token.
    fn check_auth<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(PosError::Unauthorized(reason)) = &result {
            warn!(%reason, "token rejected, logging out");
            if let Err(e) = self.ctx.end_session() {
                warn!(error = %e, "failed to end session");
            }
        }
        result
    }

    // -- Sync ----------------------------------------------------------------

    /// Run one full sync cycle now.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let session = self.ctx.sessions.current()?;
        let result = sync::run_sync_cycle(
            &self.ctx.db,
            self.ctx.gateway.as_ref(),
            &session,
            &self.ctx.state,
            self.config.walkin_push_batch,
        )
        .await;
        self.check_auth(result)
    }

    /// Pull today's orders; ids in `refresh` are replaced while still placed.
    pub async fn pull_orders(&self, refresh: &HashSet<i64>) -> Result<PullReport> {
        let session = self.ctx.sessions.current()?;
        let result = sync::pull_orders(
            &self.ctx.db,
            self.ctx.gateway.as_ref(),
            &session,
            &self.ctx.state,
            refresh,
        )
        .await;
        self.check_auth(result)
    }

    pub async fn push_completed(&self) -> Result<PushReport> {
        let session = self.ctx.sessions.current()?;
        let result =
            sync::push_orders(&self.ctx.db, self.ctx.gateway.as_ref(), &session, &self.ctx.state)
                .await;
        self.check_auth(result)
    }

    // -- Counter -------------------------------------------------------------

    /// Print and complete the order named by a typed id, `NV<id>` or QR payload.
    pub fn complete_order(&self, identifier: &str) -> Result<CompletionReceipt> {
        let receipt =
            completion::complete_order(&self.ctx.db, self.printer.as_ref(), &self.layout, identifier)?;
        if let Err(e) = self.ctx.state.refresh_summary(&self.ctx.db) {
            warn!(error = %e, "summary refresh after completion failed");
        }
        Ok(receipt)
    }

    pub fn record_walkin(&self, draft: &WalkinDraft) -> Result<CompletionReceipt> {
        walkins::record_walkin(&self.ctx.db, self.printer.as_ref(), &self.layout, draft)
    }

    /// Retry printing and completing a walk-in left `placed`.
    pub fn complete_walkin(&self, walkin_id: i64) -> Result<CompletionReceipt> {
        walkins::complete_walkin(&self.ctx.db, self.printer.as_ref(), &self.layout, walkin_id)
    }

    /// Cached orders, optionally filtered by status.
    pub fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let conn = self.ctx.db.conn.lock()?;
        orders::list_orders(&conn, status)
    }

    // -- Menu ----------------------------------------------------------------

    pub async fn pull_menu(&self, menu_id: i64) -> Result<menu::MenuPullReport> {
        let session = self.ctx.sessions.current()?;
        let result = menu::pull_menu(&self.ctx.db, self.ctx.gateway.as_ref(), &session, menu_id).await;
        self.check_auth(result)
    }

    pub fn list_menu_items(&self) -> Result<Vec<MenuItem>> {
        let conn = self.ctx.db.conn.lock()?;
        menu::list_menu_items(&conn)
    }

    pub fn cached_menu(&self) -> Result<Option<Menu>> {
        let conn = self.ctx.db.conn.lock()?;
        menu::cached_menu(&conn)
    }

    // -- Reporting -----------------------------------------------------------

    pub fn item_summary(&self) -> Result<Vec<ItemSummary>> {
        self.ctx.state.refresh_summary(&self.ctx.db)
    }

    pub fn local_order_counts(&self) -> Result<LocalOrderCounts> {
        let conn = self.ctx.db.conn.lock()?;
        summary::local_order_counts(&conn)
    }

    pub async fn fetch_dashboard(&self) -> Result<DashboardData> {
        let session = self.ctx.sessions.current()?;
        let result = self.ctx.gateway.fetch_dashboard(&session).await;
        self.check_auth(result)
    }

    pub fn system_health(&self) -> Result<diagnostics::SystemHealth> {
        diagnostics::system_health(&self.ctx.db)
    }
}

impl<G: OrderGateway + 'static, P: ReceiptPrinter> CanteenPos<G, P> {
    /// Start the periodic sync loop at `config.sync_interval_secs`.
    pub fn start_background_sync(&self) -> BackgroundSync {
        let cancel = CancellationToken::new();
        let handle = sync::start_sync_loop(
            self.ctx.clone(),
            self.config.sync_interval(),
            self.config.walkin_push_batch,
            cancel.clone(),
        );
        BackgroundSync { cancel, handle }
    }
}
