//! FIXER offline sync core library
//!
//! Keeps a safety-reporting client useful without a network:
//! - Durable, priority-ordered write queue for reports and verifications
//! - Sync engine that drains the queue with bounded retries and idempotency keys
//! - Geo cache of resource records with TTL eviction and radius queries
//! - Admission gate with region/type validation and sliding-window rate limits
//! - Connectivity monitor that debounces link changes into sync passes

pub mod admission;
pub mod audit;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod device;
pub mod events;
pub mod geo;
pub mod offline;
pub mod platform;
pub mod queue;
pub mod store;
pub mod sync;

pub use admission::{Admission, Rejection, SubmissionGate};
pub use cache::{CacheEntry, GeoCache};
pub use config::FixerConfig;
pub use connectivity::ConnectivityMonitor;
pub use device::DeviceIdentity;
pub use events::{EventBus, SyncEvent};
pub use geo::{haversine_meters, LatLng, ServiceRegion};
pub use offline::{OfflineSync, SubmitOutcome};
pub use queue::{Priority, QueueItem, SubmissionKind, SubmissionPayload, WriteQueue};
pub use store::{MemoryStore, ResilientStore, SqliteStore, Store};
pub use sync::{HttpRemoteApi, PassReport, RemoteApi, SyncEngine, SyncStatus};

use thiserror::Error;

/// Result type for offline sync operations
pub type Result<T> = std::result::Result<T, FixerError>;

/// General error type for offline sync operations
#[derive(Error, Debug)]
pub enum FixerError {
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote API error: {0}")]
    Remote(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for FixerError {
    fn from(e: reqwest::Error) -> Self {
        Self::Remote(e.to_string())
    }
}
