//! Wall-clock source shared by TTL and rate-limit bookkeeping.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;

    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_ms()).unwrap_or_default()
    }
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for tests and replay tooling.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: Mutex<i64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Mutex::new(start_ms),
        }
    }

    pub fn advance_ms(&self, delta: i64) {
        if let Ok(mut now) = self.now_ms.lock() {
            *now += delta;
        }
    }

    pub fn set_ms(&self, value: i64) {
        if let Ok(mut now) = self.now_ms.lock() {
            *now = value;
        }
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.lock().map(|now| *now).unwrap_or_default()
    }
}
