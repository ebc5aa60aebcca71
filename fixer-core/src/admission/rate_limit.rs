//! Sliding-window rate limiter per device and action.
//!
//! Advisory only: the window lives in local, user-controlled storage, so it
//! throttles honest clients and gives UX feedback. Authoritative limits must be
//! enforced server-side.

use crate::config::RateLimitRule;
use crate::queue::SubmissionKind;
use crate::store::{keys, Store};
use crate::{FixerError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn Store>,
    report_rule: RateLimitRule,
    verification_rule: RateLimitRule,
    key_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn Store>,
        report_rule: RateLimitRule,
        verification_rule: RateLimitRule,
    ) -> Self {
        Self {
            store,
            report_rule,
            verification_rule,
            key_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn rule(&self, kind: SubmissionKind) -> RateLimitRule {
        match kind {
            SubmissionKind::Report => self.report_rule,
            SubmissionKind::Verification => self.verification_rule,
        }
    }

    /// Lock serializing updates to a single (action, device) window.
    fn key_lock(&self, key: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .key_locks
            .lock()
            .map_err(|_| FixerError::LockPoisoned("rate limiter".to_string()))?;
        Ok(locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    fn recent(&self, key: &str, rule: RateLimitRule, now_ms: i64) -> Result<Vec<i64>> {
        let timestamps: Vec<i64> = self.store.load(key)?.unwrap_or_default();
        let window = rule.window_ms();
        Ok(timestamps
            .into_iter()
            .filter(|ts| now_ms - ts < window)
            .collect())
    }

    /// Count an attempt if the window has room. Returns `false` when limited.
    pub fn check_and_record(
        &self,
        device_id: &str,
        kind: SubmissionKind,
        now_ms: i64,
    ) -> Result<bool> {
        let rule = self.rule(kind);
        let key = keys::rate_limit(kind.action(), device_id);
        let lock = self.key_lock(&key)?;
        let _guard = lock
            .lock()
            .map_err(|_| FixerError::LockPoisoned(key.clone()))?;

        let mut recent = self.recent(&key, rule, now_ms)?;
        if recent.len() >= rule.max as usize {
            debug!(device_id, action = kind.action(), "Rate limit reached");
            return Ok(false);
        }

        recent.push(now_ms);
        self.store.save(&key, &recent)?;
        Ok(true)
    }

    /// Attempts left in the current window.
    pub fn remaining(&self, device_id: &str, kind: SubmissionKind, now_ms: i64) -> Result<u32> {
        let rule = self.rule(kind);
        let key = keys::rate_limit(kind.action(), device_id);
        let used = self.recent(&key, rule, now_ms)?.len() as u32;
        Ok(rule.max.saturating_sub(used))
    }
}
