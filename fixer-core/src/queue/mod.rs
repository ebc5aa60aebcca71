//! Durable, priority-ordered write queue.
//!
//! All mutations run as read-modify-write under a single lock and persist the
//! full snapshot of the affected kind before the lock is released, so an
//! `enqueue` racing a drain pass is never lost.

pub mod models;

pub use models::{
    PendingSubmission, Priority, QueueItem, QueueStatus, ReportType, SubmissionKind,
    SubmissionPayload,
};

use crate::clock::Clock;
use crate::events::{EventBus, SyncEvent};
use crate::store::Store;
use crate::{FixerError, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-kind cap on delivery attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCaps {
    pub report: u32,
    pub verification: u32,
}

impl Default for RetryCaps {
    fn default() -> Self {
        Self {
            report: 5,
            verification: 3,
        }
    }
}

impl RetryCaps {
    pub fn for_kind(&self, kind: SubmissionKind) -> u32 {
        match kind {
            SubmissionKind::Report => self.report,
            SubmissionKind::Verification => self.verification,
        }
    }
}

/// Result of recording a failed delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Item stays pending for the next pass.
    Retrying { retry_count: u32 },
    /// Item reached its cap and was removed for good.
    Dropped { kind: SubmissionKind, attempts: u32 },
    /// Item was already gone (synced or dropped by an earlier call).
    Missing,
}

#[derive(Debug, Default)]
struct QueueState {
    reports: Vec<QueueItem>,
    verifications: Vec<QueueItem>,
    next_seq: u64,
}

impl QueueState {
    fn list(&self, kind: SubmissionKind) -> &Vec<QueueItem> {
        match kind {
            SubmissionKind::Report => &self.reports,
            SubmissionKind::Verification => &self.verifications,
        }
    }

    fn list_mut(&mut self, kind: SubmissionKind) -> &mut Vec<QueueItem> {
        match kind {
            SubmissionKind::Report => &mut self.reports,
            SubmissionKind::Verification => &mut self.verifications,
        }
    }

    fn locate(&self, id: Uuid) -> Option<(SubmissionKind, usize)> {
        [SubmissionKind::Report, SubmissionKind::Verification]
            .into_iter()
            .find_map(|kind| {
                self.list(kind)
                    .iter()
                    .position(|item| item.id == id)
                    .map(|idx| (kind, idx))
            })
    }
}

pub struct WriteQueue {
    state: Mutex<QueueState>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    caps: RetryCaps,
    events: EventBus,
}

impl WriteQueue {
    /// Open the queue, restoring any snapshot left by a previous process.
    pub fn open(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        caps: RetryCaps,
        events: EventBus,
    ) -> Result<Self> {
        let mut state = QueueState::default();
        for kind in [SubmissionKind::Report, SubmissionKind::Verification] {
            let items: Vec<QueueItem> = store.load(kind.queue_key())?.unwrap_or_default();
            *state.list_mut(kind) = items
                .into_iter()
                .filter(|item| item.status == QueueStatus::Pending)
                .collect();
        }
        state.next_seq = state
            .reports
            .iter()
            .chain(state.verifications.iter())
            .map(|item| item.seq + 1)
            .max()
            .unwrap_or(0);

        let restored = state.reports.len() + state.verifications.len();
        if restored > 0 {
            info!(
                reports = state.reports.len(),
                verifications = state.verifications.len(),
                "Restored pending submissions"
            );
        }

        Ok(Self {
            state: Mutex::new(state),
            store,
            clock,
            caps,
            events,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| FixerError::LockPoisoned("write queue".to_string()))
    }

    fn persist(&self, state: &QueueState, kind: SubmissionKind) -> Result<()> {
        self.store.save(kind.queue_key(), state.list(kind))
    }

    /// Add an admitted submission as a fresh pending item.
    pub fn enqueue(&self, submission: PendingSubmission) -> Result<QueueItem> {
        let mut state = self.lock()?;
        let item = QueueItem {
            id: Uuid::new_v4(),
            kind: submission.kind,
            payload: submission.payload,
            priority: submission.priority,
            enqueued_at: self.clock.now_ms(),
            retry_count: 0,
            status: QueueStatus::Pending,
            seq: state.next_seq,
        };

        state.list_mut(item.kind).push(item.clone());
        if let Err(e) = self.persist(&state, item.kind) {
            state.list_mut(item.kind).pop();
            return Err(e);
        }
        state.next_seq += 1;
        drop(state);

        debug!(id = %item.id, kind = %item.kind, priority = item.priority.as_str(), "Queued submission");
        self.events.emit(SyncEvent::Queued {
            id: item.id,
            kind: item.kind,
            priority: item.priority,
        });
        Ok(item)
    }

    /// Pending items in dispatch order: priority descending, then FIFO.
    pub fn snapshot_for_drain(&self) -> Result<Vec<QueueItem>> {
        let state = self.lock()?;
        let mut items: Vec<QueueItem> = state
            .reports
            .iter()
            .chain(state.verifications.iter())
            .filter(|item| item.status == QueueStatus::Pending)
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.enqueued_at.cmp(&b.enqueued_at))
                .then(a.seq.cmp(&b.seq))
        });
        Ok(items)
    }

    /// Remove a delivered item. Returns `false` if it was already gone.
    pub fn mark_synced(&self, id: Uuid) -> Result<bool> {
        let mut state = self.lock()?;
        let Some((kind, idx)) = state.locate(id) else {
            return Ok(false);
        };

        let removed = state.list_mut(kind).remove(idx);
        if let Err(e) = self.persist(&state, kind) {
            state.list_mut(kind).insert(idx, removed);
            return Err(e);
        }
        Ok(true)
    }

    /// Record a failed attempt, dropping the item once it reaches its cap.
    pub fn mark_failed(&self, id: Uuid) -> Result<FailureOutcome> {
        let mut state = self.lock()?;
        let Some((kind, idx)) = state.locate(id) else {
            return Ok(FailureOutcome::Missing);
        };

        let cap = self.caps.for_kind(kind);
        let retry_count = state.list(kind)[idx].retry_count + 1;

        if retry_count >= cap {
            let removed = state.list_mut(kind).remove(idx);
            if let Err(e) = self.persist(&state, kind) {
                state.list_mut(kind).insert(idx, removed);
                return Err(e);
            }
            warn!(
                id = %id,
                kind = %kind,
                attempts = retry_count,
                "Dropping submission after reaching retry cap"
            );
            return Ok(FailureOutcome::Dropped {
                kind,
                attempts: retry_count,
            });
        }

        state.list_mut(kind)[idx].retry_count = retry_count;
        if let Err(e) = self.persist(&state, kind) {
            state.list_mut(kind)[idx].retry_count = retry_count - 1;
            return Err(e);
        }
        Ok(FailureOutcome::Retrying { retry_count })
    }

    pub fn get(&self, id: Uuid) -> Result<Option<QueueItem>> {
        let state = self.lock()?;
        Ok(state
            .locate(id)
            .map(|(kind, idx)| state.list(kind)[idx].clone()))
    }

    pub fn pending_count(&self, kind: SubmissionKind) -> Result<usize> {
        Ok(self.lock()?.list(kind).len())
    }

    pub fn len(&self) -> Result<usize> {
        let state = self.lock()?;
        Ok(state.reports.len() + state.verifications.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn caps(&self) -> RetryCaps {
        self.caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::geo::LatLng;
    use crate::store::MemoryStore;

    fn submission(kind: SubmissionKind, report_type: &str) -> PendingSubmission {
        let location = LatLng::new(50.45, 30.52);
        let payload = match kind {
            SubmissionKind::Report => SubmissionPayload::report(report_type, location),
            SubmissionKind::Verification => {
                SubmissionPayload::verification("r-1", report_type, location, true)
            }
        };
        let parsed = ReportType::parse(report_type).unwrap();
        PendingSubmission {
            kind,
            payload,
            priority: Priority::for_submission(kind, parsed),
        }
    }

    fn open_queue(store: Arc<dyn Store>, clock: Arc<ManualClock>) -> WriteQueue {
        WriteQueue::open(store, clock, RetryCaps::default(), EventBus::new()).unwrap()
    }

    #[test]
    fn enqueue_assigns_fresh_state() {
        let queue = open_queue(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(1_000)),
        );
        let item = queue
            .enqueue(submission(SubmissionKind::Report, "danger"))
            .unwrap();

        assert_eq!(item.retry_count, 0);
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.priority, Priority::High);
        assert_eq!(item.enqueued_at, 1_000);
        assert_eq!(queue.pending_count(SubmissionKind::Report).unwrap(), 1);
        assert_eq!(queue.pending_count(SubmissionKind::Verification).unwrap(), 0);
    }

    #[test]
    fn enqueue_persists_snapshot_per_kind() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let queue = open_queue(store.clone(), Arc::new(ManualClock::new(0)));
        queue
            .enqueue(submission(SubmissionKind::Verification, "safe"))
            .unwrap();

        let reports: Option<Vec<QueueItem>> = store.load("queue.reports").unwrap();
        let verifications: Vec<QueueItem> =
            store.load("queue.verifications").unwrap().unwrap();
        assert!(reports.is_none());
        assert_eq!(verifications.len(), 1);
    }

    #[test]
    fn drain_order_is_priority_then_fifo() {
        let clock = Arc::new(ManualClock::new(0));
        let queue = open_queue(Arc::new(MemoryStore::new()), clock.clone());

        let low = queue
            .enqueue(submission(SubmissionKind::Report, "safe"))
            .unwrap();
        clock.advance_ms(10);
        let high_a = queue
            .enqueue(submission(SubmissionKind::Report, "danger"))
            .unwrap();
        clock.advance_ms(10);
        let medium = queue
            .enqueue(submission(SubmissionKind::Verification, "danger"))
            .unwrap();
        clock.advance_ms(10);
        let high_b = queue
            .enqueue(submission(SubmissionKind::Report, "incident"))
            .unwrap();

        let order: Vec<Uuid> = queue
            .snapshot_for_drain()
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(order, vec![high_a.id, high_b.id, medium.id, low.id]);
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let queue = open_queue(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(5)),
        );
        let first = queue
            .enqueue(submission(SubmissionKind::Report, "checkpoint"))
            .unwrap();
        let second = queue
            .enqueue(submission(SubmissionKind::Report, "checkpoint"))
            .unwrap();

        let drained = queue.snapshot_for_drain().unwrap();
        assert_eq!(drained[0].id, first.id);
        assert_eq!(drained[1].id, second.id);
    }

    #[test]
    fn mark_synced_is_idempotent() {
        let queue = open_queue(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(0)),
        );
        let item = queue
            .enqueue(submission(SubmissionKind::Report, "danger"))
            .unwrap();

        assert!(queue.mark_synced(item.id).unwrap());
        assert!(!queue.mark_synced(item.id).unwrap());
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn report_dropped_on_fifth_failure() {
        let queue = open_queue(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(0)),
        );
        let item = queue
            .enqueue(submission(SubmissionKind::Report, "danger"))
            .unwrap();

        for expected in 1..5 {
            assert_eq!(
                queue.mark_failed(item.id).unwrap(),
                FailureOutcome::Retrying {
                    retry_count: expected
                }
            );
        }
        assert_eq!(
            queue.mark_failed(item.id).unwrap(),
            FailureOutcome::Dropped {
                kind: SubmissionKind::Report,
                attempts: 5
            }
        );
        assert!(queue.get(item.id).unwrap().is_none());
        assert_eq!(queue.mark_failed(item.id).unwrap(), FailureOutcome::Missing);
    }

    #[test]
    fn verification_dropped_on_third_failure() {
        let queue = open_queue(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(0)),
        );
        let item = queue
            .enqueue(submission(SubmissionKind::Verification, "safe"))
            .unwrap();

        queue.mark_failed(item.id).unwrap();
        queue.mark_failed(item.id).unwrap();
        assert!(matches!(
            queue.mark_failed(item.id).unwrap(),
            FailureOutcome::Dropped { attempts: 3, .. }
        ));
    }

    #[test]
    fn restart_preserves_pending_items() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));

        let (kept, synced) = {
            let queue = open_queue(store.clone(), clock.clone());
            let kept = queue
                .enqueue(submission(SubmissionKind::Report, "danger"))
                .unwrap();
            let synced = queue
                .enqueue(submission(SubmissionKind::Report, "safe"))
                .unwrap();
            queue
                .enqueue(submission(SubmissionKind::Verification, "safe"))
                .unwrap();
            queue.mark_failed(kept.id).unwrap();
            queue.mark_synced(synced.id).unwrap();
            (kept, synced)
        };

        let reopened = open_queue(store, clock);
        assert_eq!(reopened.len().unwrap(), 2);
        assert_eq!(reopened.get(kept.id).unwrap().unwrap().retry_count, 1);
        assert!(reopened.get(synced.id).unwrap().is_none());

        // New items sort after restored ones with the same timestamp.
        let fresh = reopened
            .enqueue(submission(SubmissionKind::Report, "danger"))
            .unwrap();
        let order = reopened.snapshot_for_drain().unwrap();
        assert_eq!(order[0].id, kept.id);
        assert_eq!(order[1].id, fresh.id);
    }

    #[test]
    fn dropped_items_in_snapshot_are_not_resurrected() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let dropped = QueueItem {
            id: Uuid::new_v4(),
            kind: SubmissionKind::Report,
            payload: SubmissionPayload::report("danger", LatLng::new(50.0, 30.0)),
            priority: Priority::High,
            enqueued_at: 0,
            retry_count: 5,
            status: QueueStatus::Dropped,
            seq: 0,
        };
        let pending = QueueItem {
            id: Uuid::new_v4(),
            status: QueueStatus::Pending,
            retry_count: 0,
            seq: 1,
            ..dropped.clone()
        };
        store
            .save("queue.reports", &vec![dropped, pending.clone()])
            .unwrap();

        let queue = open_queue(store, Arc::new(ManualClock::new(0)));
        let items = queue.snapshot_for_drain().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, pending.id);
    }

    #[test]
    fn concurrent_enqueues_are_all_kept() {
        let queue = Arc::new(open_queue(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(0)),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        queue
                            .enqueue(submission(SubmissionKind::Report, "danger"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len().unwrap(), 200);
    }
}
