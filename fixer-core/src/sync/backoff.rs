//! Bounded exponential backoff for automatic sync retries.

use crate::config::BackoffConfig;
use std::time::Duration;

/// Where a [`Backoff`] is in its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffState {
    /// No retry scheduled since the last reset.
    Ready,
    /// `attempt` retries have been scheduled so far.
    Retrying { attempt: u32 },
    /// Every attempt is used up; only a reset schedules more.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    factor: u32,
    max_attempts: u32,
    attempts: u32,
    exhausted: bool,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_ms),
            factor: config.factor.max(1),
            max_attempts: config.max_attempts,
            attempts: 0,
            exhausted: false,
        }
    }

    /// Delay before the next retry, or `None` once the schedule is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            self.exhausted = true;
            return None;
        }
        let multiplier = self.factor.saturating_pow(self.attempts.min(16));
        self.attempts += 1;
        Some(self.base.saturating_mul(multiplier))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.exhausted = false;
    }

    pub fn state(&self) -> BackoffState {
        if self.exhausted {
            BackoffState::Exhausted
        } else if self.attempts == 0 {
            BackoffState::Ready
        } else {
            BackoffState::Retrying {
                attempt: self.attempts,
            }
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
