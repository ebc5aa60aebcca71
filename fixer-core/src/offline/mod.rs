//! Offline subsystem facade.
//!
//! [`OfflineSync`] wires the admission gate, write queue, geo cache, sync
//! engine and connectivity monitor around one store and one event bus, and is
//! the only type a front-end needs to hold.


use crate::admission::{Admission, RateLimiter, Rejection, SubmissionGate};
use crate::audit::{get_audit_log_dir, AuditEventType, AuditLog};
use crate::cache::{CacheEntry, GeoCache};
use crate::clock::{Clock, SystemClock};
use crate::config::FixerConfig;
use crate::connectivity::{ConnectivityMonitor, MonitorHandle};
use crate::device::DeviceIdentity;
use crate::events::{EventBus, SyncEvent};
use crate::geo::LatLng;
use crate::queue::{QueueItem, RetryCaps, SubmissionKind, SubmissionPayload, WriteQueue};
use crate::store::{ResilientStore, SqliteStore, Store};
use crate::sync::{HttpRemoteApi, PassOutcome, RemoteApi, SyncEngine, SyncStatus};
use crate::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

/// Result of a user submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Accepted and durably queued.
    Queued(QueueItem),
    Rejected(Rejection),
}

pub struct OfflineSync {
    config: FixerConfig,
    store: Arc<ResilientStore>,
    events: EventBus,
    device: DeviceIdentity,
    gate: SubmissionGate,
    queue: Arc<WriteQueue>,
    cache: Arc<GeoCache>,
    engine: Arc<SyncEngine>,
    monitor: Arc<ConnectivityMonitor>,
    audit: Option<Arc<AuditLog>>,
}

impl OfflineSync {
    /// Assemble the subsystem on top of `primary`, restoring queued
    /// submissions and evicting stale cache entries. Starts offline.
    pub fn open(
        config: FixerConfig,
        primary: Arc<dyn Store>,
        api: Arc<dyn RemoteApi>,
        clock: Arc<dyn Clock>,
        audit: Option<Arc<AuditLog>>,
    ) -> Result<Self> {
        config.validate()?;
        let events = EventBus::new();

        let mut resilient = ResilientStore::new(primary).with_events(events.clone());
        if let Some(audit) = &audit {
            resilient = resilient.with_audit(audit.clone());
        }
        let store = Arc::new(resilient);
        let shared: Arc<dyn Store> = store.clone();

        let device = DeviceIdentity::load_or_create(shared.as_ref(), clock.as_ref())?;

        let limiter = RateLimiter::new(
            shared.clone(),
            config.report_limit,
            config.verification_limit,
        );
        let gate = SubmissionGate::new(config.region, limiter, clock.clone());

        let caps = RetryCaps {
            report: config.report_retry_cap,
            verification: config.verification_retry_cap,
        };
        let queue = Arc::new(WriteQueue::open(
            shared.clone(),
            clock.clone(),
            caps,
            events.clone(),
        )?);

        let cache = Arc::new(GeoCache::new(
            shared,
            clock,
            config.cache_ttl_ms(),
            config.resource_type_filter.clone(),
            events.clone(),
        ));
        cache.load()?;

        let (online_tx, online_rx) = watch::channel(false);
        let mut engine = SyncEngine::new(
            queue.clone(),
            cache.clone(),
            api,
            online_rx,
            events.clone(),
            config.max_in_flight,
        );
        if let Some(audit) = &audit {
            engine = engine.with_audit(audit.clone());
        }
        let engine = Arc::new(engine);

        let mut monitor = ConnectivityMonitor::new(
            engine.clone(),
            online_tx,
            config.settle_delay(),
            config.backoff,
            events.clone(),
        );
        if let Some(audit) = &audit {
            monitor = monitor.with_audit(audit.clone());
        }

        info!(
            device_id = %device.device_id,
            pending = queue.len()?,
            cached = cache.len()?,
            "Offline sync ready"
        );

        Ok(Self {
            config,
            store,
            events,
            device,
            gate,
            queue,
            cache,
            engine,
            monitor: Arc::new(monitor),
            audit,
        })
    }

    /// Open with the SQLite store, HTTP API and system clock named by `config`.
    pub fn open_default(config: FixerConfig) -> Result<Self> {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&config.database_path)?);
        let api: Arc<dyn RemoteApi> = Arc::new(HttpRemoteApi::new(
            &config.api_base_url,
            config.request_timeout(),
        )?);
        let audit = if config.audit_log {
            Some(Arc::new(AuditLog::new(&get_audit_log_dir())?))
        } else {
            None
        };
        Self::open(config, store, api, Arc::new(SystemClock), audit)
    }

    pub fn device_id(&self) -> &str {
        &self.device.device_id
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    pub fn config(&self) -> &FixerConfig {
        &self.config
    }

    pub fn audit(&self) -> Option<&Arc<AuditLog>> {
        self.audit.as_ref()
    }

    pub fn submit_report(&self, payload: SubmissionPayload) -> Result<SubmitOutcome> {
        self.submit(SubmissionKind::Report, payload)
    }

    pub fn submit_verification(&self, payload: SubmissionPayload) -> Result<SubmitOutcome> {
        self.submit(SubmissionKind::Verification, payload)
    }

    fn submit(&self, kind: SubmissionKind, payload: SubmissionPayload) -> Result<SubmitOutcome> {
        let pending = match self.gate.admit(kind, payload, self.device_id())? {
            Admission::Accepted(pending) => pending,
            Admission::Rejected(rejection) => {
                self.record_rejection(kind, rejection);
                return Ok(SubmitOutcome::Rejected(rejection));
            }
        };

        let item = self.queue.enqueue(pending)?;
        if self.is_online() {
            self.spawn_sync();
        }
        Ok(SubmitOutcome::Queued(item))
    }

    fn record_rejection(&self, kind: SubmissionKind, rejection: Rejection) {
        let Some(audit) = &self.audit else {
            return;
        };
        let event = AuditEventType::SubmissionRejected {
            kind,
            reason: rejection.to_string(),
        };
        if let Err(e) = audit.log(event, self.device_id()) {
            warn!(error = %e, "Failed to write audit entry");
        }
    }

    /// Kick off a pass in the background when running inside a tokio runtime.
    fn spawn_sync(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, submission will sync on the next trigger");
            return;
        };
        let engine = self.engine.clone();
        runtime.spawn(async move {
            if let Err(e) = engine.sync_now().await {
                warn!(error = %e, "Background sync failed");
            }
        });
    }

    /// Submissions of `kind` this device may still make in the current window.
    pub fn remaining_submissions(&self, kind: SubmissionKind) -> Result<u32> {
        self.gate.remaining(kind, self.device_id())
    }

    pub fn pending_reports_count(&self) -> Result<usize> {
        self.queue.pending_count(SubmissionKind::Report)
    }

    pub fn pending_verifications_count(&self) -> Result<usize> {
        self.queue.pending_count(SubmissionKind::Verification)
    }

    /// Queued items in the order the next pass will send them.
    pub fn pending_items(&self) -> Result<Vec<QueueItem>> {
        self.queue.snapshot_for_drain()
    }

    pub fn cached_resource_count(&self) -> Result<usize> {
        self.cache.len()
    }

    /// Cached resources near `center`. Without a center, every valid entry;
    /// without a radius, the configured default radius.
    pub fn query_cached_resources(
        &self,
        center: Option<LatLng>,
        radius_m: Option<f64>,
    ) -> Result<Vec<CacheEntry>> {
        match center {
            None => self.cache.all(),
            Some(center) => self.cache.query(
                center,
                radius_m.unwrap_or(self.config.default_query_radius_m),
            ),
        }
    }

    /// Closest cached resources, optionally of one type, with distances in meters.
    pub fn nearest_resources(
        &self,
        center: LatLng,
        resource_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(CacheEntry, f64)>> {
        self.cache.nearest(center, resource_type, limit)
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.engine.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.engine.subscribe_status()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub async fn sync_now(&self) -> Result<PassOutcome> {
        self.engine.sync_now().await
    }

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    /// Publish a link state directly, bypassing the event stream.
    pub fn set_online(&self, online: bool) {
        self.monitor.set_online(online);
    }

    pub fn retry_now(&self) {
        self.monitor.retry_now();
    }

    /// Start reacting to connectivity events from `links`.
    pub fn start(&self, links: mpsc::Receiver<bool>) -> MonitorHandle {
        self.monitor.clone().spawn(links)
    }

    pub fn is_persistence_degraded(&self) -> bool {
        self.store.is_degraded()
    }
}
