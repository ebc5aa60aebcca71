//! Sync engine: drains the write queue against the remote API, then refreshes
//! the geo cache.

use crate::audit::{AuditEventType, AuditLog};
use crate::cache::GeoCache;
use crate::events::{EventBus, SyncEvent};
use crate::queue::{FailureOutcome, QueueItem, SubmissionKind, WriteQueue};
use crate::sync::client::RemoteApi;
use crate::sync::models::{PassOutcome, PassReport, SyncStatus};
use crate::{FixerError, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

type Delivery = (QueueItem, Result<()>);

#[derive(Debug, Default)]
struct PassState {
    running: bool,
    /// A trigger arrived while a pass was running.
    rerun: bool,
}

/// Clears the running flag if a pass ends early by error or cancellation.
struct RunningGuard<'a> {
    engine: &'a SyncEngine,
    armed: bool,
}

impl RunningGuard<'_> {
    /// The flag was already cleared under the lock.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut state) = self.engine.pass.lock() {
            state.running = false;
            state.rerun = false;
        }
        self.engine.pass_done.notify_waiters();
    }
}

/// Orchestrates drain passes. At most one pass runs at a time; triggers that
/// arrive during a pass collapse into a single follow-up pass.
pub struct SyncEngine {
    queue: Arc<WriteQueue>,
    cache: Arc<GeoCache>,
    api: Arc<dyn RemoteApi>,
    online: watch::Receiver<bool>,
    status: watch::Sender<SyncStatus>,
    events: EventBus,
    audit: Option<Arc<AuditLog>>,
    max_in_flight: usize,
    pass: Mutex<PassState>,
    pass_done: Notify,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<WriteQueue>,
        cache: Arc<GeoCache>,
        api: Arc<dyn RemoteApi>,
        online: watch::Receiver<bool>,
        events: EventBus,
        max_in_flight: usize,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            queue,
            cache,
            api,
            online,
            status,
            events,
            audit: None,
            max_in_flight: max_in_flight.max(1),
            pass: Mutex::new(PassState::default()),
            pass_done: Notify::new(),
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Whether a pass is currently running.
    pub fn is_syncing(&self) -> bool {
        self.pass.lock().map(|state| state.running).unwrap_or(false)
    }

    /// Resolve once no pass is running.
    pub async fn wait_until_idle(&self) {
        let notified = self.pass_done.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if !self.is_syncing() {
            return;
        }
        notified.await;
    }

    fn pass_state(&self) -> Result<MutexGuard<'_, PassState>> {
        self.pass
            .lock()
            .map_err(|_| FixerError::LockPoisoned("sync pass".to_string()))
    }

    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn set_status(&self, status: SyncStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            debug!(status = status.as_str(), "Sync status changed");
            self.events.emit(SyncEvent::StatusChanged { status });
        }
    }

    /// Run a drain pass now, or fold this trigger into the pass already running.
    pub async fn sync_now(&self) -> Result<PassOutcome> {
        {
            let mut state = self.pass_state()?;
            if state.running {
                state.rerun = true;
                debug!("Sync pass already running, trigger coalesced");
                return Ok(PassOutcome::Coalesced);
            }
            state.running = true;
            state.rerun = false;
        }
        let mut guard = RunningGuard {
            engine: self,
            armed: true,
        };

        loop {
            let report = match self.run_pass().await {
                Ok(report) => report,
                Err(e) => {
                    error!(error = %e, "Sync pass aborted");
                    self.set_status(SyncStatus::Error);
                    return Err(e);
                }
            };

            // Deciding to stop and releasing the pass happen under one lock, so
            // no trigger is lost in between.
            let follow_up = {
                let mut state = self.pass_state()?;
                let follow_up = state.rerun;
                state.rerun = false;
                state.running = follow_up;
                follow_up
            };
            if !follow_up {
                guard.disarm();
                self.pass_done.notify_waiters();
                return Ok(PassOutcome::Completed(report));
            }
            debug!("Running follow-up pass for coalesced trigger");
        }
    }

    async fn run_pass(&self) -> Result<PassReport> {
        self.set_status(SyncStatus::Syncing);

        let items = self.queue.snapshot_for_drain()?;
        let mut report = PassReport::default();
        if !items.is_empty() {
            info!(pending = items.len(), "Starting sync pass");
        }

        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut in_flight: JoinSet<Delivery> = JoinSet::new();
        // First bookkeeping failure. Dispatch stops, but every request already
        // in flight is still awaited and settled.
        let mut failure: Option<FixerError> = None;

        for item in items {
            if failure.is_some() {
                break;
            }
            if !self.is_online() {
                report.interrupted = true;
                break;
            }
            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    failure = Some(FixerError::Remote(format!(
                        "Dispatch semaphore closed: {}",
                        e
                    )));
                    break;
                }
            };
            // Waiting for a slot can take a while; re-check before sending.
            if !self.is_online() {
                report.interrupted = true;
                break;
            }

            report.attempted += 1;
            let api = self.api.clone();
            in_flight.spawn(async move {
                let result = deliver(api.as_ref(), &item).await;
                drop(permit);
                (item, result)
            });

            while let Some(done) = in_flight.try_join_next() {
                if let Err(e) = self.settle(done, &mut report) {
                    failure.get_or_insert(e);
                }
            }
        }

        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = self.settle(done, &mut report) {
                failure.get_or_insert(e);
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        if report.interrupted {
            info!(
                synced = report.synced,
                remaining = self.queue.len()?,
                "Went offline, sync pass interrupted"
            );
        } else if self.is_online() {
            match self.cache.refresh(self.api.as_ref()).await {
                Ok(_) => report.cache_refreshed = true,
                Err(e) => {
                    warn!(error = %e, "Geo cache refresh failed");
                    report.cache_error = true;
                }
            }
        }

        let status = report.status();
        self.set_status(status);
        info!(
            attempted = report.attempted,
            synced = report.synced,
            failed = report.failed,
            dropped = report.dropped,
            status = status.as_str(),
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Apply one delivery outcome to the queue.
    fn settle(
        &self,
        done: std::result::Result<Delivery, tokio::task::JoinError>,
        report: &mut PassReport,
    ) -> Result<()> {
        let (item, result) = match done {
            Ok(delivery) => delivery,
            Err(e) => {
                // The item stays queued untouched and is retried next pass.
                error!(error = %e, "Delivery task failed");
                report.failed += 1;
                return Ok(());
            }
        };

        match result {
            Ok(()) => {
                if self.queue.mark_synced(item.id)? {
                    report.synced += 1;
                    self.events.emit(SyncEvent::Synced {
                        id: item.id,
                        kind: item.kind,
                    });
                }
            }
            Err(e) => {
                let reason = e.to_string();
                match self.queue.mark_failed(item.id)? {
                    FailureOutcome::Retrying { retry_count } => {
                        report.failed += 1;
                        warn!(id = %item.id, kind = %item.kind, retry_count, error = %reason, "Delivery failed, will retry");
                        self.events.emit(SyncEvent::AttemptFailed {
                            id: item.id,
                            kind: item.kind,
                            retry_count,
                            reason,
                        });
                    }
                    FailureOutcome::Dropped { kind, attempts } => {
                        report.dropped += 1;
                        self.record_drop(&item, kind, attempts, &reason);
                        self.events.emit(SyncEvent::TerminalDrop {
                            id: item.id,
                            kind,
                            attempts,
                            reason,
                        });
                    }
                    FailureOutcome::Missing => {}
                }
            }
        }
        Ok(())
    }

    fn record_drop(&self, item: &QueueItem, kind: SubmissionKind, attempts: u32, reason: &str) {
        let Some(audit) = &self.audit else {
            return;
        };
        let event = AuditEventType::TerminalDrop {
            id: item.id,
            kind,
            attempts,
        };
        if let Err(e) = audit.log(event, reason) {
            warn!(error = %e, "Failed to write audit entry");
        }
    }
}

async fn deliver(api: &dyn RemoteApi, item: &QueueItem) -> Result<()> {
    let key = item.idempotency_key();
    match item.kind {
        SubmissionKind::Report => api.create_report(&item.payload, &key).await,
        SubmissionKind::Verification => api.create_verification(&item.payload, &key).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::geo::LatLng;
    use crate::queue::{PendingSubmission, Priority, RetryCaps, SubmissionPayload};
    use crate::store::{MemoryStore, Store};
    use crate::sync::client::MockRemoteApi;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        queue: Arc<WriteQueue>,
        cache: Arc<GeoCache>,
        events: EventBus,
        online: watch::Sender<bool>,
    }

    /// Memory store that rejects the next `fail_sets` writes.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_sets: AtomicUsize,
    }

    impl Store for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
            let armed = self
                .fail_sets
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if armed {
                return Err(FixerError::Persistence("write rejected".to_string()));
            }
            self.inner.set(key, value)
        }

        fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key)
        }
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_store(Arc::new(MemoryStore::new()))
        }

        fn with_store(store: Arc<dyn Store>) -> Self {
            let clock = Arc::new(ManualClock::new(1_700_000_000_000));
            let events = EventBus::new();
            let queue = Arc::new(
                WriteQueue::open(store.clone(), clock.clone(), RetryCaps::default(), events.clone())
                    .unwrap(),
            );
            let cache = Arc::new(GeoCache::new(
                store,
                clock,
                86_400_000,
                None,
                events.clone(),
            ));
            let (online, _) = watch::channel(true);
            Self {
                queue,
                cache,
                events,
                online,
            }
        }

        fn engine(&self, api: MockRemoteApi) -> SyncEngine {
            SyncEngine::new(
                self.queue.clone(),
                self.cache.clone(),
                Arc::new(api),
                self.online.subscribe(),
                self.events.clone(),
                4,
            )
        }

        fn enqueue_report(&self, report_type: &str, priority: Priority) -> QueueItem {
            self.queue
                .enqueue(PendingSubmission {
                    kind: SubmissionKind::Report,
                    payload: SubmissionPayload::report(report_type, LatLng::new(50.45, 30.52)),
                    priority,
                })
                .unwrap()
        }
    }

    fn completed(outcome: PassOutcome) -> PassReport {
        match outcome {
            PassOutcome::Completed(report) => report,
            PassOutcome::Coalesced => panic!("expected a completed pass"),
        }
    }

    #[tokio::test]
    async fn successful_pass_empties_queue_and_refreshes_cache() {
        let fx = Fixture::new();
        fx.enqueue_report("danger", Priority::High);
        fx.enqueue_report("safe", Priority::Low);

        let mut api = MockRemoteApi::new();
        api.expect_create_report().times(2).returning(|_, _| Ok(()));
        api.expect_list_resources().times(1).returning(|_| Ok(Vec::new()));

        let engine = fx.engine(api);
        let report = completed(engine.sync_now().await.unwrap());

        assert_eq!(report.synced, 2);
        assert!(report.cache_refreshed);
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert!(fx.queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn failure_keeps_item_and_sets_error() {
        let fx = Fixture::new();
        let item = fx.enqueue_report("danger", Priority::High);

        let mut api = MockRemoteApi::new();
        api.expect_create_report()
            .returning(|_, _| Err(FixerError::Remote("503".to_string())));
        api.expect_list_resources().returning(|_| Ok(Vec::new()));

        let engine = fx.engine(api);
        let report = completed(engine.sync_now().await.unwrap());

        assert_eq!(report.failed, 1);
        assert_eq!(engine.status(), SyncStatus::Error);
        assert_eq!(fx.queue.get(item.id).unwrap().unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn offline_engine_dispatches_nothing() {
        let fx = Fixture::new();
        fx.enqueue_report("danger", Priority::High);
        fx.online.send_replace(false);

        let mut api = MockRemoteApi::new();
        api.expect_create_report().never();
        api.expect_list_resources().never();

        let engine = fx.engine(api);
        let report = completed(engine.sync_now().await.unwrap());
        assert!(report.interrupted);
        assert_eq!(report.attempted, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(fx.queue.len().unwrap(), 1);
        // Nothing failed, the item is simply still queued.
        assert_eq!(engine.status(), SyncStatus::Idle);
    }

    #[tokio::test]
    async fn cache_failure_does_not_touch_queue() {
        let fx = Fixture::new();
        fx.enqueue_report("checkpoint", Priority::Medium);

        let mut api = MockRemoteApi::new();
        api.expect_create_report().returning(|_, _| Ok(()));
        api.expect_list_resources()
            .returning(|_| Err(FixerError::Remote("timeout".to_string())));

        let engine = fx.engine(api);
        let report = completed(engine.sync_now().await.unwrap());
        assert_eq!(report.synced, 1);
        assert!(report.cache_error);
        assert_eq!(engine.status(), SyncStatus::Error);
        assert!(fx.queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn idempotency_key_is_sent() {
        let fx = Fixture::new();
        let item = fx.enqueue_report("incident", Priority::High);
        let expected = item.idempotency_key();

        let mut api = MockRemoteApi::new();
        api.expect_create_report()
            .withf(move |_, key| key.to_string() == expected)
            .times(1)
            .returning(|_, _| Ok(()));
        api.expect_list_resources().returning(|_| Ok(Vec::new()));

        fx.engine(api).sync_now().await.unwrap();
    }

    #[tokio::test]
    async fn status_changes_are_published() {
        let fx = Fixture::new();
        let mut events = fx.events.subscribe();

        let mut api = MockRemoteApi::new();
        api.expect_list_resources().returning(|_| Ok(Vec::new()));
        let engine = fx.engine(api);
        engine.sync_now().await.unwrap();

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::StatusChanged { status } = event {
                statuses.push(status);
            }
        }
        assert_eq!(statuses, vec![SyncStatus::Syncing, SyncStatus::Idle]);
    }

    #[tokio::test]
    async fn bookkeeping_error_still_settles_in_flight_deliveries() {
        let store = Arc::new(FlakyStore::default());
        let fx = Fixture::with_store(store.clone());
        fx.enqueue_report("danger", Priority::High);
        fx.enqueue_report("incident", Priority::High);

        let mut api = MockRemoteApi::new();
        api.expect_create_report().times(2).returning(|_, _| Ok(()));
        api.expect_list_resources().returning(|_| Ok(Vec::new()));
        let engine = fx.engine(api);

        // Exactly one of the two removals fails to persist.
        store.fail_sets.store(1, Ordering::SeqCst);
        let result = engine.sync_now().await;

        assert!(matches!(result, Err(FixerError::Persistence(_))));
        // The other delivery's outcome was still applied.
        assert_eq!(fx.queue.len().unwrap(), 1);
        assert_eq!(engine.status(), SyncStatus::Error);
        assert!(!engine.is_syncing());
    }
}
