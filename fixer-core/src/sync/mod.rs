//! Sync for the offline write queue
//!
//! - Remote API boundary with per-item idempotency keys
//! - Drain passes with bounded concurrency and cooperative cancellation
//! - Coalesced triggers, at most one pass at a time
//! - Bounded exponential backoff for automatic retries

pub mod backoff;
pub mod client;
pub mod engine;
pub mod models;

pub use backoff::{Backoff, BackoffState};
pub use client::{HttpRemoteApi, RemoteApi};
pub use engine::SyncEngine;
pub use models::{PassOutcome, PassReport, ResourceRecord, SyncStatus};
