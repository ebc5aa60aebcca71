//! Submission gate: decides what may enter the write queue.

use super::rate_limit::RateLimiter;
use super::sanitize::sanitize_text;
use crate::clock::Clock;
use crate::geo::ServiceRegion;
use crate::queue::{PendingSubmission, Priority, ReportType, SubmissionKind, SubmissionPayload};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Why a submission was refused. Returned to the caller, never queued.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    #[error("Location is outside the service region")]
    OutOfRegion,

    #[error("Unrecognized submission type")]
    InvalidType,

    #[error("Rate limit exceeded, please wait before submitting again")]
    RateLimited,
}

/// Outcome of [`SubmissionGate::admit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Accepted(PendingSubmission),
    Rejected(Rejection),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

pub struct SubmissionGate {
    region: ServiceRegion,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
}

impl SubmissionGate {
    pub fn new(region: ServiceRegion, limiter: RateLimiter, clock: Arc<dyn Clock>) -> Self {
        Self {
            region,
            limiter,
            clock,
        }
    }

    /// Validate, sanitize and rate-limit a candidate write.
    ///
    /// Checks run in order: region, type, sanitization, rate limit. The rate
    /// limiter records the attempt before the submission is returned, whether
    /// or not the device is online.
    pub fn admit(
        &self,
        kind: SubmissionKind,
        mut payload: SubmissionPayload,
        device_id: &str,
    ) -> Result<Admission> {
        if !self.region.contains(payload.location) {
            info!(kind = %kind, "Rejected submission outside service region");
            return Ok(Admission::Rejected(Rejection::OutOfRegion));
        }

        let Some(report_type) = ReportType::parse(&payload.report_type) else {
            return Ok(Admission::Rejected(Rejection::InvalidType));
        };
        if kind == SubmissionKind::Verification
            && payload
                .report_id
                .as_deref()
                .map_or(true, |id| id.trim().is_empty())
        {
            return Ok(Admission::Rejected(Rejection::InvalidType));
        }

        payload.description = payload
            .description
            .as_deref()
            .map(sanitize_text)
            .filter(|text| !text.is_empty());
        payload.device_id = device_id.to_string();

        if !self
            .limiter
            .check_and_record(device_id, kind, self.clock.now_ms())?
        {
            info!(kind = %kind, "Rejected submission over rate limit");
            return Ok(Admission::Rejected(Rejection::RateLimited));
        }

        Ok(Admission::Accepted(PendingSubmission {
            kind,
            priority: Priority::for_submission(kind, report_type),
            payload,
        }))
    }

    /// Submissions of `kind` the device may still make in the current window.
    pub fn remaining(&self, kind: SubmissionKind, device_id: &str) -> Result<u32> {
        self.limiter
            .remaining(device_id, kind, self.clock.now_ms())
    }
}
