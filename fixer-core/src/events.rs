//! Observer interface: every state change worth showing a user or an
//! operator is published as a [`SyncEvent`].

use crate::queue::{Priority, SubmissionKind};
use crate::sync::SyncStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Queued {
        id: Uuid,
        kind: SubmissionKind,
        priority: Priority,
    },
    Synced {
        id: Uuid,
        kind: SubmissionKind,
    },
    AttemptFailed {
        id: Uuid,
        kind: SubmissionKind,
        retry_count: u32,
        reason: String,
    },
    /// Item exceeded its retry cap and was removed from the queue.
    TerminalDrop {
        id: Uuid,
        kind: SubmissionKind,
        attempts: u32,
        reason: String,
    },
    StatusChanged {
        status: SyncStatus,
    },
    CacheRefreshed {
        entries: usize,
    },
    CacheEvicted {
        evicted: usize,
    },
    PersistenceDegraded {
        reason: String,
    },
    ConnectivityChanged {
        online: bool,
    },
}

/// Cloneable broadcast handle. Emitting never blocks and never fails;
/// slow subscribers lose the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn emit(&self, event: SyncEvent) {
        // No receivers is the normal headless case.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}
