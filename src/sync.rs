//! Sync reconciler for the local order cache.
//!
//! Pulls today's orders for the logged-in canteen into the local store and
//! pushes locally completed orders and walk-ins back upstream, deleting them
//! locally only for ids the server confirmed. Every entry point runs under a
//! single in-flight guard so a manual trigger cannot overlap the background
//! loop.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::api::OrderGateway;
use crate::db::{self, DbState};
use crate::error::{PosError, Result};
use crate::models::{OrderStatus, StatusUpdateAck};
use crate::orders;
use crate::session::{Session, SessionState};
use crate::storage::CredentialStore;
use crate::summary::{self, ItemSummary};
use crate::walkins;

const SETTINGS_CATEGORY: &str = "sync";
const KEY_LAST_PULL_AT: &str = "last_pull_at";
const KEY_LAST_PUSH_AT: &str = "last_push_at";

/// Floor for the background tick; a zero period cannot drive an interval.
const MIN_SYNC_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Sync state
// ---------------------------------------------------------------------------

/// Process-wide sync bookkeeping shared by manual triggers and the loop.
#[derive(Default)]
pub struct SyncState {
    in_flight: AtomicBool,
    last_sync: Mutex<Option<String>>,
    last_summary: Mutex<Vec<ItemSummary>>,
}

/// Held for the duration of one sync operation; releases the slot on drop.
struct CycleGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_begin(&self) -> Result<CycleGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| PosError::SyncInProgress)?;
        Ok(CycleGuard {
            flag: &self.in_flight,
        })
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// RFC 3339 time of the last successful full cycle.
    pub fn last_sync(&self) -> Option<String> {
        self.last_sync.lock().ok().and_then(|g| g.clone())
    }

    /// Item summary as of the last pull or completion.
    pub fn last_summary(&self) -> Vec<ItemSummary> {
        self.last_summary
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Recompute the item summary from the local store and cache it.
    pub fn refresh_summary(&self, db: &DbState) -> Result<Vec<ItemSummary>> {
        let summary = {
            let conn = db.conn.lock()?;
            summary::compute_item_summary(&conn)?
        };
        *self.last_summary.lock()? = summary.clone();
        Ok(summary)
    }

    fn mark_synced(&self) {
        if let Ok(mut guard) = self.last_sync.lock() {
            *guard = Some(Utc::now().to_rfc3339());
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullReport {
    pub fetched: usize,
    pub inserted: usize,
    pub refreshed: usize,
    pub skipped_existing: usize,
    pub skipped_without_items: usize,
    pub skipped_invalid_status: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    pub sent: usize,
    pub acknowledged: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub cycle_id: String,
    pub orders_pushed: Option<PushReport>,
    pub order_push_error: Option<String>,
    pub walkins_pushed: Option<PushReport>,
    pub walkin_push_error: Option<String>,
    pub pull: PullReport,
}

// ---------------------------------------------------------------------------
// Pull path
// ---------------------------------------------------------------------------

/// Fetch today's orders and insert every order not yet cached.
///
/// Existing ids are left alone, so a local `completed` is never clobbered,
/// unless they appear in `refresh` and are still `placed` locally, in which
/// case the order and its items are replaced in place. New orders without
/// items are skipped. The id snapshot and all writes share one transaction,
/// taken after the network fetch returns.
pub async fn pull_todays_orders<G: OrderGateway>(
    db: &DbState,
    gateway: &G,
    session: &Session,
    refresh: &HashSet<i64>,
) -> Result<PullReport> {
    let remote = gateway.fetch_todays_orders(session).await?;
    let mut report = PullReport {
        fetched: remote.len(),
        ..PullReport::default()
    };

    let conn = db.conn.lock()?;
    let tx = conn.unchecked_transaction()?;
    let mut known = orders::existing_order_ids(&tx)?;

    for order in &remote {
        let Some(status) = OrderStatus::parse(&order.status) else {
            warn!(order_id = order.id, status = %order.status, "skipping order with unknown status");
            report.skipped_invalid_status += 1;
            continue;
        };

        if known.contains(&order.id) {
            if refresh.contains(&order.id) {
                let local = orders::get_order(&tx, order.id)?.map(|o| o.status);
                if local == Some(OrderStatus::Placed) && OrderStatus::Placed.can_transition_to(status) {
                    orders::replace_order_with_items(&tx, order, status)?;
                    report.refreshed += 1;
                    continue;
                }
                debug!(order_id = order.id, ?local, "refresh skipped, local order is final");
            }
            report.skipped_existing += 1;
            continue;
        }

        if order.order_items.is_empty() {
            debug!(order_id = order.id, "skipping order without items");
            report.skipped_without_items += 1;
            continue;
        }

        orders::insert_order_with_items(&tx, order, status)?;
        known.insert(order.id);
        report.inserted += 1;
    }

    db::set_setting(&tx, SETTINGS_CATEGORY, KEY_LAST_PULL_AT, &Utc::now().to_rfc3339())?;
    tx.commit()?;

    info!(
        fetched = report.fetched,
        inserted = report.inserted,
        refreshed = report.refreshed,
        skipped = report.skipped_existing + report.skipped_without_items + report.skipped_invalid_status,
        "pull complete"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Push-back path
// ---------------------------------------------------------------------------

/// Ids from `sent` the server confirmed. A bare count confirms the batch
/// only when it covers every id sent.
fn confirmed_ids(sent: &[i64], ack: &StatusUpdateAck) -> Vec<i64> {
    match &ack.updated_ids {
        Some(updated) => {
            let updated: HashSet<i64> = updated.iter().copied().collect();
            sent.iter().copied().filter(|id| updated.contains(id)).collect()
        }
        None if ack.updated_count == sent.len() as u64 => sent.to_vec(),
        None => Vec::new(),
    }
}

/// Push every locally completed order in one batch, then delete the
/// confirmed ones. Nothing is deleted on failure or a zero/partial count.
pub async fn push_completed_orders<G: OrderGateway>(
    db: &DbState,
    gateway: &G,
    session: &Session,
) -> Result<PushReport> {
    let ids = {
        let conn = db.conn.lock()?;
        orders::completed_order_ids(&conn)?
    };
    if ids.is_empty() {
        debug!("no completed orders to push");
        return Ok(PushReport::default());
    }

    let ack = gateway.update_order_status(session, &ids).await?;
    let confirmed = confirmed_ids(&ids, &ack);
    if confirmed.is_empty() {
        warn!(sent = ids.len(), updated_count = ack.updated_count, "order push not acknowledged");
        return Err(PosError::Unacknowledged {
            sent: ids.len(),
            acknowledged: ack.updated_count,
        });
    }

    let conn = db.conn.lock()?;
    let tx = conn.unchecked_transaction()?;
    let deleted = orders::delete_completed_orders(&tx, &confirmed)?;
    db::set_setting(&tx, SETTINGS_CATEGORY, KEY_LAST_PUSH_AT, &Utc::now().to_rfc3339())?;
    tx.commit()?;

    info!(sent = ids.len(), acknowledged = confirmed.len(), deleted, "completed orders pushed");
    Ok(PushReport {
        sent: ids.len(),
        acknowledged: confirmed.len(),
        deleted,
    })
}

/// Push the oldest `batch` completed walk-ins and delete the confirmed ones.
pub async fn push_completed_walkins<G: OrderGateway>(
    db: &DbState,
    gateway: &G,
    session: &Session,
    batch: usize,
) -> Result<PushReport> {
    let pending = {
        let conn = db.conn.lock()?;
        walkins::completed_walkins_with_items(&conn, batch.max(1))?
    };
    if pending.is_empty() {
        debug!("no completed walk-ins to push");
        return Ok(PushReport::default());
    }
    let ids: Vec<i64> = pending.iter().map(|w| w.walkin.id).collect();

    let ack = gateway.update_walkin_status(session, &pending).await?;
    let confirmed = confirmed_ids(&ids, &ack);
    if confirmed.is_empty() {
        warn!(sent = ids.len(), updated_count = ack.updated_count, "walk-in push not acknowledged");
        return Err(PosError::Unacknowledged {
            sent: ids.len(),
            acknowledged: ack.updated_count,
        });
    }

    let conn = db.conn.lock()?;
    let tx = conn.unchecked_transaction()?;
    let deleted = walkins::delete_completed_walkins(&tx, &confirmed)?;
    tx.commit()?;

    info!(sent = ids.len(), acknowledged = confirmed.len(), deleted, "walk-ins pushed");
    Ok(PushReport {
        sent: ids.len(),
        acknowledged: confirmed.len(),
        deleted,
    })
}

// ---------------------------------------------------------------------------
// Guarded entry points
// ---------------------------------------------------------------------------

/// Manual pull: guarded, then refreshes the item summary.
pub async fn pull_orders<G: OrderGateway>(
    db: &DbState,
    gateway: &G,
    session: &Session,
    state: &SyncState,
    refresh: &HashSet<i64>,
) -> Result<PullReport> {
    let _guard = state.try_begin()?;
    let report = pull_todays_orders(db, gateway, session, refresh).await?;
    state.refresh_summary(db)?;
    Ok(report)
}

/// Manual push of completed orders, guarded.
pub async fn push_orders<G: OrderGateway>(
    db: &DbState,
    gateway: &G,
    session: &Session,
    state: &SyncState,
) -> Result<PushReport> {
    let _guard = state.try_begin()?;
    let report = push_completed_orders(db, gateway, session).await?;
    state.refresh_summary(db)?;
    Ok(report)
}

fn record_push_outcome(
    what: &str,
    outcome: Result<PushReport>,
    report: &mut Option<PushReport>,
    error: &mut Option<String>,
) -> Result<()> {
    match outcome {
        Ok(pushed) => *report = Some(pushed),
        Err(e) if e.is_auth_failure() => return Err(e),
        Err(e) => {
            warn!(error = %e, "{what} push failed, rows kept for the next cycle");
            *error = Some(e.to_string());
        }
    }
    Ok(())
}

/// One full cycle: push completed orders, push completed walk-ins, pull
/// today's orders, refresh the summary.
///
/// A failed push is reported and does not stop the cycle, except for an
/// auth failure. A failed pull fails the cycle.
pub async fn run_sync_cycle<G: OrderGateway>(
    db: &DbState,
    gateway: &G,
    session: &Session,
    state: &SyncState,
    walkin_batch: usize,
) -> Result<SyncReport> {
    let _guard = state.try_begin()?;
    let cycle_id = Uuid::new_v4().to_string();
    let span = info_span!("sync_cycle", cycle_id = %cycle_id, canteen_id = session.canteen_id());

    async move {
        let mut report = SyncReport {
            cycle_id,
            ..SyncReport::default()
        };

        let pushed = push_completed_orders(db, gateway, session).await;
        record_push_outcome("order", pushed, &mut report.orders_pushed, &mut report.order_push_error)?;

        let pushed = push_completed_walkins(db, gateway, session, walkin_batch).await;
        record_push_outcome("walk-in", pushed, &mut report.walkins_pushed, &mut report.walkin_push_error)?;

        report.pull = pull_todays_orders(db, gateway, session, &HashSet::new()).await?;
        state.refresh_summary(db)?;
        state.mark_synced();
        info!("sync cycle complete");
        Ok(report)
    }
    .instrument(span)
    .await
}

// ---------------------------------------------------------------------------
// Background loop
// ---------------------------------------------------------------------------

/// Everything the background loop needs, shared with the facade.
pub struct SyncContext<G> {
    pub db: Arc<DbState>,
    pub gateway: Arc<G>,
    pub sessions: Arc<SessionState>,
    pub state: Arc<SyncState>,
    pub credentials: Arc<dyn CredentialStore>,
}

impl<G> Clone for SyncContext<G> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            gateway: self.gateway.clone(),
            sessions: self.sessions.clone(),
            state: self.state.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

impl<G> SyncContext<G> {
    /// End the in-memory session and forget the stored credentials, so a
    /// rejected token is not restored on the next launch.
    pub fn end_session(&self) -> Result<()> {
        self.sessions.end()?;
        self.credentials.clear()
    }
}

/// Spawn the periodic sync loop. Cycles are skipped while nobody is logged
/// in or the server is unreachable; an auth failure ends the session.
pub fn start_sync_loop<G: OrderGateway + 'static>(
    ctx: SyncContext<G>,
    interval: Duration,
    walkin_batch: usize,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let interval = if interval < MIN_SYNC_INTERVAL {
        warn!(?interval, "sync interval too short, using {:?}", MIN_SYNC_INTERVAL);
        MIN_SYNC_INTERVAL
    } else {
        interval
    };
    tokio::spawn(async move {
        info!("Sync loop started (interval: {}s)", interval.as_secs());
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut previous_online: Option<bool> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Ok(session) = ctx.sessions.current() else {
                continue;
            };

            let online = ctx.gateway.is_reachable().await;
            if !online {
                if previous_online != Some(false) {
                    info!("Network offline; deferring sync");
                }
                previous_online = Some(false);
                continue;
            }
            if previous_online == Some(false) {
                info!("Network restored; resuming sync");
            }
            previous_online = Some(true);

            match run_sync_cycle(&ctx.db, ctx.gateway.as_ref(), &session, &ctx.state, walkin_batch).await {
                Ok(report) => debug!(inserted = report.pull.inserted, "background cycle done"),
                Err(PosError::SyncInProgress) => debug!("cycle skipped, another sync in flight"),
                Err(e) if e.is_auth_failure() => {
                    warn!(error = %e, "session rejected by server, ending session");
                    if let Err(end_err) = ctx.end_session() {
                        warn!(error = %end_err, "failed to end session");
                    }
                }
                Err(e) => warn!(error = %e, "background sync cycle failed"),
            }
        }
        info!("Sync loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::tests::{remote_item, remote_order};
    use crate::storage::MemoryStore;
    use crate::test_support::{session, Ack, FakeGateway, FetchFailure};
    use crate::walkins::tests::draft;

    fn two_orders() -> Vec<crate::models::RemoteOrder> {
        vec![
            remote_order(101, "placed", vec![remote_item(1, 101, 11, 50.0, 2), remote_item(2, 101, 12, 30.0, 1)]),
            remote_order(102, "placed", vec![]),
        ]
    }

    fn item_count(db: &DbState) -> i64 {
        db.conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM order_items", [], |r| r.get(0))
            .unwrap()
    }

    fn status_of(db: &DbState, id: i64) -> Option<OrderStatus> {
        let conn = db.conn.lock().unwrap();
        orders::get_order(&conn, id).unwrap().map(|o| o.status)
    }

    fn loop_ctx(gateway: Arc<FakeGateway>) -> SyncContext<FakeGateway> {
        let sessions = Arc::new(SessionState::new());
        sessions.begin(session()).unwrap();
        let credentials = Arc::new(MemoryStore::default());
        credentials.save(&session()).unwrap();
        SyncContext {
            db: Arc::new(db::test_db()),
            gateway,
            sessions,
            state: Arc::new(SyncState::new()),
            credentials,
        }
    }

    fn complete(db: &DbState, id: i64) {
        assert!(orders::mark_completed(&db.conn.lock().unwrap(), id).unwrap());
    }

    #[tokio::test]
    async fn test_pull_skips_orders_without_items() {
        let db = db::test_db();
        let gateway = FakeGateway::with_orders(two_orders());

        let report = pull_todays_orders(&db, &gateway, &session(), &HashSet::new()).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped_without_items, 1);
        assert_eq!(status_of(&db, 101), Some(OrderStatus::Placed));
        assert_eq!(status_of(&db, 102), None);
        assert_eq!(item_count(&db), 2);
    }

    #[tokio::test]
    async fn test_pull_is_idempotent_and_keeps_local_completion() {
        let db = db::test_db();
        let gateway = FakeGateway::with_orders(two_orders());
        pull_todays_orders(&db, &gateway, &session(), &HashSet::new()).await.unwrap();
        complete(&db, 101);

        let report = pull_todays_orders(&db, &gateway, &session(), &HashSet::new()).await.unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.skipped_existing, 1);
        assert_eq!(item_count(&db), 2);
        assert_eq!(status_of(&db, 101), Some(OrderStatus::Completed));
    }

    #[tokio::test]
    async fn test_pull_tolerates_duplicate_ids_in_one_response() {
        let db = db::test_db();
        let order = remote_order(7, "placed", vec![remote_item(1, 7, 11, 10.0, 1)]);
        let gateway = FakeGateway::with_orders(vec![order.clone(), order]);

        let report = pull_todays_orders(&db, &gateway, &session(), &HashSet::new()).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped_existing, 1);
    }

    #[tokio::test]
    async fn test_malformed_pull_leaves_store_untouched() {
        let db = db::test_db();
        let gateway = FakeGateway::with_orders(two_orders());
        gateway.set_fetch_failure(Some(FetchFailure::Malformed));

        let err = pull_todays_orders(&db, &gateway, &session(), &HashSet::new()).await.unwrap_err();
        assert!(matches!(err, PosError::MalformedResponse(_)));
        assert_eq!(status_of(&db, 101), None);
        assert!(db::get_setting(&db.conn.lock().unwrap(), SETTINGS_CATEGORY, KEY_LAST_PULL_AT).is_none());
    }

    #[tokio::test]
    async fn test_refresh_replaces_only_placed_orders() {
        let db = db::test_db();
        let gateway = FakeGateway::with_orders(vec![
            remote_order(1, "placed", vec![remote_item(1, 1, 11, 10.0, 1)]),
            remote_order(2, "placed", vec![remote_item(2, 2, 11, 10.0, 1)]),
        ]);
        pull_todays_orders(&db, &gateway, &session(), &HashSet::new()).await.unwrap();
        complete(&db, 2);

        *gateway.orders.lock().unwrap() = vec![
            remote_order(1, "cancelled", vec![remote_item(1, 1, 11, 10.0, 1)]),
            remote_order(2, "cancelled", vec![remote_item(2, 2, 11, 10.0, 1)]),
        ];
        let refresh = HashSet::from([1, 2]);
        let report = pull_todays_orders(&db, &gateway, &session(), &refresh).await.unwrap();
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.skipped_existing, 1);
        assert_eq!(status_of(&db, 1), Some(OrderStatus::Cancelled));
        assert_eq!(status_of(&db, 2), Some(OrderStatus::Completed));
    }

    #[tokio::test]
    async fn test_push_deletes_acknowledged_orders() {
        let db = db::test_db();
        let gateway = FakeGateway::with_orders(vec![
            remote_order(1, "placed", vec![remote_item(1, 1, 11, 10.0, 1)]),
            remote_order(2, "placed", vec![remote_item(2, 2, 11, 10.0, 1)]),
        ]);
        pull_todays_orders(&db, &gateway, &session(), &HashSet::new()).await.unwrap();
        complete(&db, 1);

        let report = push_completed_orders(&db, &gateway, &session()).await.unwrap();
        assert_eq!(report, PushReport { sent: 1, acknowledged: 1, deleted: 1 });
        assert_eq!(gateway.order_pushes(), vec![vec![1]]);
        assert_eq!(status_of(&db, 1), None);
        assert_eq!(status_of(&db, 2), Some(OrderStatus::Placed));
    }

    #[tokio::test]
    async fn test_push_without_completed_orders_is_noop() {
        let db = db::test_db();
        let gateway = FakeGateway::default();
        let report = push_completed_orders(&db, &gateway, &session()).await.unwrap();
        assert_eq!(report, PushReport::default());
        assert!(gateway.order_pushes().is_empty());
    }

    #[tokio::test]
    async fn test_zero_or_partial_count_deletes_nothing() {
        let db = db::test_db();
        let gateway = FakeGateway::with_orders(vec![
            remote_order(1, "placed", vec![remote_item(1, 1, 11, 10.0, 1)]),
            remote_order(2, "placed", vec![remote_item(2, 2, 11, 10.0, 1)]),
        ]);
        pull_todays_orders(&db, &gateway, &session(), &HashSet::new()).await.unwrap();
        complete(&db, 1);
        complete(&db, 2);

        for ack in [Ack::Count(0), Ack::Count(1)] {
            gateway.set_order_ack(ack);
            let err = push_completed_orders(&db, &gateway, &session()).await.unwrap_err();
            assert!(matches!(err, PosError::Unacknowledged { sent: 2, .. }));
            assert_eq!(status_of(&db, 1), Some(OrderStatus::Completed));
            assert_eq!(status_of(&db, 2), Some(OrderStatus::Completed));
        }
    }

    #[tokio::test]
    async fn test_push_deletes_only_confirmed_ids() {
        let db = db::test_db();
        let gateway = FakeGateway::with_orders(vec![
            remote_order(1, "placed", vec![remote_item(1, 1, 11, 10.0, 1)]),
            remote_order(2, "placed", vec![remote_item(2, 2, 11, 10.0, 1)]),
        ]);
        pull_todays_orders(&db, &gateway, &session(), &HashSet::new()).await.unwrap();
        complete(&db, 1);
        complete(&db, 2);
        gateway.set_order_ack(Ack::Ids(vec![2, 99]));

        let report = push_completed_orders(&db, &gateway, &session()).await.unwrap();
        assert_eq!(report.acknowledged, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(status_of(&db, 1), Some(OrderStatus::Completed));
        assert_eq!(status_of(&db, 2), None);
    }

    #[tokio::test]
    async fn test_network_failure_keeps_rows() {
        let db = db::test_db();
        let gateway = FakeGateway::with_orders(vec![remote_order(1, "placed", vec![remote_item(1, 1, 11, 10.0, 1)])]);
        pull_todays_orders(&db, &gateway, &session(), &HashSet::new()).await.unwrap();
        complete(&db, 1);
        gateway.set_order_ack(Ack::NetworkError);

        let err = push_completed_orders(&db, &gateway, &session()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(status_of(&db, 1), Some(OrderStatus::Completed));
    }

    #[tokio::test]
    async fn test_concurrent_triggers_are_rejected() {
        let db = db::test_db();
        let gateway = FakeGateway::with_orders(two_orders());
        *gateway.fetch_delay.lock().unwrap() = Duration::from_millis(50);
        let state = SyncState::new();
        let s = session();

        let no_refresh = HashSet::new();
        let (first, second) = tokio::join!(
            pull_orders(&db, &gateway, &s, &state, &no_refresh),
            pull_orders(&db, &gateway, &s, &state, &no_refresh),
        );
        assert!(first.is_ok());
        assert!(matches!(second, Err(PosError::SyncInProgress)));
        assert_eq!(gateway.fetch_calls.load(Ordering::SeqCst), 1);
        assert!(!state.is_syncing());

        // The guard is released, so a later trigger runs.
        pull_orders(&db, &gateway, &s, &state, &HashSet::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_full_cycle_pushes_walkins_then_pulls() {
        let db = db::test_db();
        let gateway = FakeGateway::with_orders(two_orders());
        let state = SyncState::new();
        {
            let conn = db.conn.lock().unwrap();
            crate::menu::tests::seed_menu(&conn, 5);
            let items = crate::menu::list_menu_items(&conn).unwrap();
            let id = walkins::insert_walkin(&conn, &draft(vec![(11, 1)]), &items).unwrap();
            walkins::mark_walkin_completed(&conn, id).unwrap();
        }

        let report = run_sync_cycle(&db, &gateway, &session(), &state, 10).await.unwrap();
        assert_eq!(report.orders_pushed, Some(PushReport::default()));
        assert_eq!(report.walkins_pushed.as_ref().map(|r| r.deleted), Some(1));
        assert_eq!(report.pull.inserted, 1);
        assert!(!report.cycle_id.is_empty());
        assert_eq!(gateway.walkin_pushes().len(), 1);
        assert!(state.last_sync().is_some());
        assert_eq!(state.last_summary().len(), 2);
    }

    #[tokio::test]
    async fn test_cycle_reports_push_failure_and_still_pulls() {
        let db = db::test_db();
        let gateway = FakeGateway::with_orders(vec![remote_order(1, "placed", vec![remote_item(1, 1, 11, 10.0, 1)])]);
        pull_todays_orders(&db, &gateway, &session(), &HashSet::new()).await.unwrap();
        complete(&db, 1);
        gateway.set_order_ack(Ack::Count(0));
        *gateway.orders.lock().unwrap() = two_orders();

        let state = SyncState::new();
        let report = run_sync_cycle(&db, &gateway, &session(), &state, 10).await.unwrap();
        assert!(report.order_push_error.is_some());
        assert_eq!(report.pull.inserted, 1);
        assert_eq!(status_of(&db, 1), Some(OrderStatus::Completed));
    }

    #[tokio::test]
    async fn test_cycle_aborts_on_expired_token() {
        let db = db::test_db();
        let gateway = FakeGateway::with_orders(vec![remote_order(1, "placed", vec![remote_item(1, 1, 11, 10.0, 1)])]);
        pull_todays_orders(&db, &gateway, &session(), &HashSet::new()).await.unwrap();
        complete(&db, 1);
        gateway.set_order_ack(Ack::Unauthorized);

        let state = SyncState::new();
        let err = run_sync_cycle(&db, &gateway, &session(), &state, 10).await.unwrap_err();
        assert!(err.is_auth_failure());
        assert!(!state.is_syncing());
    }

    #[tokio::test]
    async fn test_background_loop_syncs_and_stops() {
        let gateway = Arc::new(FakeGateway::with_orders(two_orders()));
        let ctx = loop_ctx(gateway.clone());
        let cancel = CancellationToken::new();

        let handle = start_sync_loop(ctx.clone(), Duration::from_millis(20), 10, cancel.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(gateway.fetch_calls.load(Ordering::SeqCst) >= 1);
        assert_eq!(status_of(&ctx.db, 101), Some(OrderStatus::Placed));
    }

    #[tokio::test]
    async fn test_background_loop_skips_when_offline() {
        let gateway = Arc::new(FakeGateway::with_orders(two_orders()));
        gateway.reachable.store(false, Ordering::SeqCst);
        let ctx = loop_ctx(gateway.clone());
        let cancel = CancellationToken::new();

        let handle = start_sync_loop(ctx, Duration::from_millis(20), 10, cancel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(gateway.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_background_loop_forgets_rejected_credentials() {
        let gateway = Arc::new(FakeGateway::with_orders(two_orders()));
        gateway.set_fetch_failure(Some(FetchFailure::Unauthorized));
        let ctx = loop_ctx(gateway.clone());
        let cancel = CancellationToken::new();

        let handle = start_sync_loop(ctx.clone(), Duration::from_millis(20), 10, cancel.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(gateway.fetch_calls.load(Ordering::SeqCst) >= 1);
        assert!(!ctx.sessions.is_active());
        assert!(ctx.credentials.load().is_none(), "rejected token must not be restorable");
    }

    #[tokio::test]
    async fn test_background_loop_survives_zero_interval() {
        let gateway = Arc::new(FakeGateway::with_orders(two_orders()));
        let ctx = loop_ctx(gateway.clone());
        let cancel = CancellationToken::new();

        let handle = start_sync_loop(ctx.clone(), Duration::ZERO, 10, cancel.clone());
        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();

        assert!(handle.await.is_ok());
        assert!(gateway.fetch_calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_server_completed_orders_are_not_pushed_back() {
        let db = db::test_db();
        let gateway = FakeGateway::with_orders(vec![remote_order(
            101,
            "completed",
            vec![remote_item(1, 101, 11, 50.0, 2)],
        )]);
        let state = SyncState::new();

        let first = run_sync_cycle(&db, &gateway, &session(), &state, 10).await.unwrap();
        assert_eq!(first.orders_pushed, Some(PushReport::default()));
        assert_eq!(first.pull.inserted, 1);

        let second = run_sync_cycle(&db, &gateway, &session(), &state, 10).await.unwrap();
        assert_eq!(second.orders_pushed, Some(PushReport::default()));
        assert_eq!(second.pull.inserted, 0);
        assert_eq!(second.pull.skipped_existing, 1);

        assert!(gateway.order_pushes().is_empty());
        assert_eq!(status_of(&db, 101), Some(OrderStatus::Completed));
    }

    #[tokio::test]
    async fn test_count_ack_confirms_local_completions_beside_server_completed() {
        let db = db::test_db();
        let gateway = FakeGateway::with_orders(vec![
            remote_order(1, "placed", vec![remote_item(1, 1, 11, 10.0, 1)]),
            remote_order(2, "completed", vec![remote_item(2, 2, 11, 10.0, 1)]),
        ]);
        pull_todays_orders(&db, &gateway, &session(), &HashSet::new()).await.unwrap();
        complete(&db, 1);
        gateway.set_order_ack(Ack::Count(1));

        let report = push_completed_orders(&db, &gateway, &session()).await.unwrap();
        assert_eq!(gateway.order_pushes(), vec![vec![1]]);
        assert_eq!(report.deleted, 1);
        assert_eq!(status_of(&db, 1), None);
        assert_eq!(status_of(&db, 2), Some(OrderStatus::Completed));
    }

    fn seed_completed_walkins(db: &DbState, count: usize) -> Vec<i64> {
        let conn = db.conn.lock().unwrap();
        crate::menu::tests::seed_menu(&conn, 5);
        let items = crate::menu::list_menu_items(&conn).unwrap();
        (0..count)
            .map(|_| {
                let id = walkins::insert_walkin(&conn, &draft(vec![(11, 1), (12, 2)]), &items).unwrap();
                walkins::mark_walkin_completed(&conn, id).unwrap();
                id
            })
            .collect()
    }

    fn walkin_rows(db: &DbState) -> (i64, i64) {
        let conn = db.conn.lock().unwrap();
        let walkins: i64 = conn.query_row("SELECT COUNT(*) FROM walkins", [], |r| r.get(0)).unwrap();
        let items: i64 = conn.query_row("SELECT COUNT(*) FROM walkin_items", [], |r| r.get(0)).unwrap();
        (walkins, items)
    }

    #[tokio::test]
    async fn test_walkin_zero_or_partial_count_deletes_nothing() {
        let db = db::test_db();
        let gateway = FakeGateway::default();
        let ids = seed_completed_walkins(&db, 2);
        let before = walkin_rows(&db);
        assert_eq!(before, (2, 4));

        for ack in [Ack::Count(0), Ack::Count(1)] {
            gateway.set_walkin_ack(ack);
            let err = push_completed_walkins(&db, &gateway, &session(), 10).await.unwrap_err();
            assert!(matches!(err, PosError::Unacknowledged { sent: 2, .. }));
            assert_eq!(walkin_rows(&db), before);
        }
        assert_eq!(gateway.walkin_pushes(), vec![ids.clone(), ids]);
    }

    #[tokio::test]
    async fn test_walkin_push_failures_keep_rows() {
        let db = db::test_db();
        let gateway = FakeGateway::default();
        seed_completed_walkins(&db, 2);

        gateway.set_walkin_ack(Ack::NetworkError);
        let err = push_completed_walkins(&db, &gateway, &session(), 10).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(walkin_rows(&db), (2, 4));

        gateway.set_walkin_ack(Ack::Unauthorized);
        let err = push_completed_walkins(&db, &gateway, &session(), 10).await.unwrap_err();
        assert!(err.is_auth_failure());
        assert_eq!(walkin_rows(&db), (2, 4));
    }

    #[tokio::test]
    async fn test_walkin_push_deletes_only_confirmed_ids() {
        let db = db::test_db();
        let gateway = FakeGateway::default();
        let ids = seed_completed_walkins(&db, 2);
        gateway.set_walkin_ack(Ack::Ids(vec![ids[1]]));

        let report = push_completed_walkins(&db, &gateway, &session(), 10).await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(walkin_rows(&db), (1, 2));
        let conn = db.conn.lock().unwrap();
        assert!(walkins::get_walkin_with_items(&conn, ids[0]).unwrap().is_some());
    }
}
