//! Store wrapper that falls back to memory when the durable store fails.
//!
//! After the first primary failure the process keeps running on the in-memory
//! mirror for its remaining lifetime. The mirror always holds the last value
//! seen for each key, so nothing committed before the failure is lost from view.

use super::{MemoryStore, Store};
use crate::audit::{AuditEventType, AuditLog};
use crate::events::{EventBus, SyncEvent};
use crate::{FixerError, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

pub struct ResilientStore {
    primary: Arc<dyn Store>,
    mirror: MemoryStore,
    degraded: AtomicBool,
    events: Option<EventBus>,
    audit: Option<Arc<AuditLog>>,
}

impl ResilientStore {
    pub fn new(primary: Arc<dyn Store>) -> Self {
        Self {
            primary,
            mirror: MemoryStore::new(),
            degraded: AtomicBool::new(false),
            events: None,
            audit: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Whether the store has fallen back to memory-only operation.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn degrade(&self, op: &str, key: &str, err: &FixerError) {
        if self.degraded.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(
            op,
            key,
            error = %err,
            "Persistence failed, continuing with in-memory state only"
        );
        let reason = format!("{} {}: {}", op, key, err);
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log(AuditEventType::PersistenceDegraded, &reason) {
                warn!(error = %e, "Failed to write audit entry");
            }
        }
        if let Some(events) = &self.events {
            events.emit(SyncEvent::PersistenceDegraded { reason });
        }
    }
}

impl Store for ResilientStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        if self.is_degraded() {
            return self.mirror.get(key);
        }
        match self.primary.get(key) {
            Ok(value) => {
                match &value {
                    Some(v) => self.mirror.set(key, v)?,
                    None => self.mirror.delete(key)?,
                }
                Ok(value)
            }
            Err(e) => {
                self.degrade("get", key, &e);
                self.mirror.get(key)
            }
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.mirror.set(key, value)?;
        if !self.is_degraded() {
            if let Err(e) = self.primary.set(key, value) {
                self.degrade("set", key, &e);
            }
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.mirror.delete(key)?;
        if !self.is_degraded() {
            if let Err(e) = self.primary.delete(key) {
                self.degrade("delete", key, &e);
            }
        }
        Ok(())
    }
}
