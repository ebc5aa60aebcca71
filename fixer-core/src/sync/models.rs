//! Sync data models: engine status, pass results, and the resource wire format.

use crate::geo::LatLng;
use serde::{Deserialize, Serialize};

/// Observable state of the sync engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
        }
    }
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    /// Items handed to the remote API.
    pub attempted: usize,
    pub synced: usize,
    /// Failed attempts that left the item queued.
    pub failed: usize,
    /// Items removed after their final failed attempt.
    pub dropped: usize,
    /// Dispatch stopped early because the device went offline.
    pub interrupted: bool,
    pub cache_refreshed: bool,
    /// Cache refresh was attempted and failed.
    pub cache_error: bool,
}

impl PassReport {
    /// Final engine status implied by this pass. Going offline mid-pass is not
    /// a failure: unconfirmed items simply stay queued.
    pub fn status(&self) -> SyncStatus {
        if self.failed > 0 || self.dropped > 0 || self.cache_error {
            SyncStatus::Error
        } else {
            SyncStatus::Idle
        }
    }
}

/// Result of a `sync_now` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// This call ran one or more passes; the report covers the last one.
    Completed(PassReport),
    /// A pass was already running; it will run a follow-up pass.
    Coalesced,
}

/// A resource record as returned by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    pub name: String,
    pub location: LatLng,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub status: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(SyncStatus::Syncing).unwrap(),
            json!("syncing")
        );
        assert_eq!(SyncStatus::default(), SyncStatus::Idle);
    }

    #[test]
    fn pass_status() {
        let clean = PassReport {
            attempted: 3,
            synced: 3,
            cache_refreshed: true,
            ..Default::default()
        };
        assert_eq!(clean.status(), SyncStatus::Idle);

        let interrupted = PassReport {
            attempted: 1,
            synced: 1,
            interrupted: true,
            ..Default::default()
        };
        assert_eq!(interrupted.status(), SyncStatus::Idle);

        let failed = PassReport {
            attempted: 2,
            synced: 1,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(failed.status(), SyncStatus::Error);

        let cache_failed = PassReport {
            cache_error: true,
            ..Default::default()
        };
        assert_eq!(cache_failed.status(), SyncStatus::Error);
    }

    #[test]
    fn resource_record_wire_format() {
        let record: ResourceRecord = serde_json::from_value(json!({
            "id": "r1",
            "name": "City Hospital No. 3",
            "location": { "lat": 50.45, "lng": 30.52 },
            "type": "hospital",
            "status": "operational"
        }))
        .unwrap();
        assert_eq!(record.resource_type, "hospital");
        assert!(record.details.is_null());
    }
}
