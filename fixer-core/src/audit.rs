//! Append-only audit trail for events an operator may need to reconstruct
//! after the fact: lost submissions, storage failures, refused writes.

use crate::queue::SubmissionKind;
use crate::{FixerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Audit log entry types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuditEventType {
    /// A queued write was abandoned after its final attempt.
    TerminalDrop {
        id: Uuid,
        kind: SubmissionKind,
        attempts: u32,
    },
    /// Durable storage failed and the process fell back to memory.
    PersistenceDegraded,
    SubmissionRejected {
        kind: SubmissionKind,
        reason: String,
    },
    /// Automatic retries stopped until connectivity changes.
    RetriesExhausted {
        attempts: u32,
    },
    DaemonStarted,
    DaemonStopped,
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// Event severity (0-5, where 5 is most critical)
    pub severity: u8,
    pub context: String,
}

/// JSON-lines audit logger
pub struct AuditLog {
    log_file: PathBuf,
    writer: Mutex<File>,
}

impl AuditLog {
    /// Open (or create) `audit.log` inside `log_dir`.
    pub fn new(log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let log_file = log_dir.join("audit.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)?;

        info!("Audit log initialized: {:?}", log_file);

        Ok(Self {
            log_file,
            writer: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.log_file
    }

    /// Append an audit event
    pub fn log(&self, event_type: AuditEventType, context: &str) -> Result<()> {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            severity: Self::severity_for_event(&event_type),
            event_type,
            context: context.to_string(),
        };
        let line = format!("{}\n", serde_json::to_string(&entry)?);

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| FixerError::LockPoisoned("audit log".to_string()))?;
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    fn severity_for_event(event: &AuditEventType) -> u8 {
        match event {
            AuditEventType::TerminalDrop { .. } => 5,
            AuditEventType::PersistenceDegraded => 4,
            AuditEventType::RetriesExhausted { .. } => 3,
            AuditEventType::SubmissionRejected { .. } => 1,
            AuditEventType::DaemonStarted | AuditEventType::DaemonStopped => 0,
        }
    }

    fn read_entries(&self) -> Result<Vec<AuditEntry>> {
        let content = std::fs::read_to_string(&self.log_file)?;
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<AuditEntry>(line).ok())
            .collect())
    }

    /// Most recent entries first.
    pub fn get_entries(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read_entries()?
            .into_iter()
            .rev()
            .take(limit)
            .collect())
    }

    pub fn get_entries_by_severity(&self, min_severity: u8) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read_entries()?
            .into_iter()
            .filter(|entry| entry.severity >= min_severity)
            .collect())
    }

    /// Up to `limit` entries, most recent first, optionally at or above a severity.
    pub fn recent(&self, limit: usize, min_severity: Option<u8>) -> Result<Vec<AuditEntry>> {
        let Some(min_severity) = min_severity else {
            return self.get_entries(limit);
        };
        Ok(self
            .get_entries_by_severity(min_severity)?
            .into_iter()
            .rev()
            .take(limit)
            .collect())
    }
}

/// Default audit log directory
pub fn get_audit_log_dir() -> PathBuf {
    crate::platform::get_data_dir().join("audit")
}
