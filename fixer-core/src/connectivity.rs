//! Connectivity monitor: turns raw link up/down events into sync passes.
//!
//! Two background tasks cooperate. The link task publishes every change to the
//! shared online flag right away, so a running pass observes going offline
//! before its next dispatch. The trigger task debounces offline-to-online
//! transitions and schedules passes and their automatic retries.

use crate::audit::{AuditEventType, AuditLog};
use crate::config::BackoffConfig;
use crate::events::{EventBus, SyncEvent};
use crate::sync::{Backoff, PassOutcome, RemoteApi, SyncEngine, SyncStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

pub struct ConnectivityMonitor {
    engine: Arc<SyncEngine>,
    online: watch::Sender<bool>,
    settle_delay: Duration,
    backoff: BackoffConfig,
    retry: Notify,
    events: EventBus,
    audit: Option<Arc<AuditLog>>,
}

/// Handles of the monitor's background tasks.
pub struct MonitorHandle {
    link: JoinHandle<()>,
    trigger: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn shutdown(&self) {
        self.link.abort();
        self.trigger.abort();
    }
}

impl ConnectivityMonitor {
    /// `online` must be the sender whose receivers were handed to the engine.
    pub fn new(
        engine: Arc<SyncEngine>,
        online: watch::Sender<bool>,
        settle_delay: Duration,
        backoff: BackoffConfig,
        events: EventBus,
    ) -> Self {
        Self {
            engine,
            online,
            settle_delay,
            backoff,
            retry: Notify::new(),
            events,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Publish a link state. Repeated identical states are ignored.
    pub fn set_online(&self, online: bool) {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
            self.events.emit(SyncEvent::ConnectivityChanged { online });
        }
    }

    /// Reset the retry schedule and run a pass now if online.
    pub fn retry_now(&self) {
        self.retry.notify_one();
    }

    /// Start consuming `links` in the background.
    pub fn spawn(self: Arc<Self>, mut links: mpsc::Receiver<bool>) -> MonitorHandle {
        // Capture the starting state before any link event can be applied, so
        // the first reconnect is debounced like every later one.
        let mut online = self.online.subscribe();
        let start_online = *online.borrow_and_update();

        let monitor = self.clone();
        let link = tokio::spawn(async move {
            while let Some(online) = links.recv().await {
                monitor.set_online(online);
            }
            debug!("Connectivity event stream closed");
        });

        let trigger = tokio::spawn(async move {
            self.run_triggers(online, start_online).await;
        });

        MonitorHandle { link, trigger }
    }

    async fn run_triggers(&self, mut online: watch::Receiver<bool>, start_online: bool) {
        let mut was_online = start_online;
        let mut backoff = Backoff::new(&self.backoff);
        let mut retry_at: Option<Instant> = None;

        if was_online {
            self.run_pass(&mut backoff, &mut retry_at).await;
        }

        loop {
            let retry_deadline = retry_at.unwrap_or_else(Instant::now);
            tokio::select! {
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_online = *online.borrow_and_update();
                    if now_online && !was_online {
                        backoff.reset();
                        retry_at = None;
                        if self.settle(&mut online).await {
                            self.run_pass(&mut backoff, &mut retry_at).await;
                        } else {
                            debug!("Link dropped during settle delay, sync abandoned");
                        }
                        was_online = *online.borrow();
                    } else if !now_online {
                        was_online = false;
                        retry_at = None;
                    }
                }
                _ = self.retry.notified() => {
                    backoff.reset();
                    retry_at = None;
                    if self.is_online() {
                        info!("Manual sync retry requested");
                        self.run_pass(&mut backoff, &mut retry_at).await;
                    }
                }
                _ = time::sleep_until(retry_deadline), if retry_at.is_some() => {
                    retry_at = None;
                    if self.is_online() {
                        self.run_pass(&mut backoff, &mut retry_at).await;
                    }
                }
            }
        }
    }

    /// Wait out the settle delay. `false` if the link dropped meanwhile.
    async fn settle(&self, online: &mut watch::Receiver<bool>) -> bool {
        let deadline = Instant::now() + self.settle_delay;
        loop {
            tokio::select! {
                _ = time::sleep_until(deadline) => return *online.borrow(),
                changed = online.changed() => {
                    if changed.is_err() || !*online.borrow_and_update() {
                        return false;
                    }
                }
            }
        }
    }

    async fn run_pass(&self, backoff: &mut Backoff, retry_at: &mut Option<Instant>) {
        let failed = match self.engine.sync_now().await {
            Ok(PassOutcome::Completed(report)) => report.status() == SyncStatus::Error,
            Ok(PassOutcome::Coalesced) => {
                // The pass this trigger folded into decides whether to retry.
                self.engine.wait_until_idle().await;
                self.engine.status() == SyncStatus::Error
            }
            Err(e) => {
                warn!(error = %e, "Sync pass failed");
                true
            }
        };

        if !failed {
            backoff.reset();
            *retry_at = None;
            return;
        }
        // Offline failures wait for the next link change instead.
        if !self.is_online() {
            return;
        }

        match backoff.next_delay() {
            Some(delay) => {
                info!(
                    attempt = backoff.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling sync retry"
                );
                *retry_at = Some(Instant::now() + delay);
            }
            None => {
                *retry_at = None;
                warn!(
                    attempts = backoff.attempts(),
                    state = ?backoff.state(),
                    "Sync retries exhausted, waiting for connectivity change or manual retry"
                );
                if let Some(audit) = &self.audit {
                    let event = AuditEventType::RetriesExhausted {
                        attempts: backoff.attempts(),
                    };
                    if let Err(e) = audit.log(event, "") {
                        warn!(error = %e, "Failed to write audit entry");
                    }
                }
            }
        }
    }
}

/// Poll the backend's health endpoint and report the result as link events.
pub fn spawn_health_check(
    api: Arc<dyn RemoteApi>,
    interval: Duration,
    links: mpsc::Sender<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = time::interval(interval);
        loop {
            timer.tick().await;
            let healthy = match api.health().await {
                Ok(healthy) => healthy,
                Err(e) => {
                    debug!(error = %e, "Health check failed");
                    false
                }
            };
            if links.send(healthy).await.is_err() {
                break;
            }
        }
    })
}
