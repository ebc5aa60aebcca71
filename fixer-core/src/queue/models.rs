//! Queue data models: submission kinds, payloads, and queued items.

use crate::geo::LatLng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of pending mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    Report,
    Verification,
}

impl SubmissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Verification => "verification",
        }
    }

    /// Action name used for rate-limit keys.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Report => "reports",
            Self::Verification => "verifications",
        }
    }

    /// Store key holding this kind's queue snapshot.
    pub fn queue_key(&self) -> &'static str {
        match self {
            Self::Report => crate::store::keys::QUEUE_REPORTS,
            Self::Verification => crate::store::keys::QUEUE_VERIFICATIONS,
        }
    }
}

impl fmt::Display for SubmissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognized report types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Danger,
    Safe,
    Checkpoint,
    Incident,
    Resource,
}

impl ReportType {
    pub const ALL: [ReportType; 5] = [
        Self::Danger,
        Self::Safe,
        Self::Checkpoint,
        Self::Incident,
        Self::Resource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Danger => "danger",
            Self::Safe => "safe",
            Self::Checkpoint => "checkpoint",
            Self::Incident => "incident",
            Self::Resource => "resource",
        }
    }

    /// Parse a report type; `None` for anything unrecognized.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

/// Drain priority. Ordered so that `High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Safety-critical reports jump the queue after reconnection.
    pub fn for_submission(kind: SubmissionKind, report_type: ReportType) -> Self {
        match kind {
            SubmissionKind::Verification => Self::Medium,
            SubmissionKind::Report => match report_type {
                ReportType::Danger | ReportType::Incident => Self::High,
                ReportType::Checkpoint => Self::Medium,
                ReportType::Safe | ReportType::Resource => Self::Low,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Lifecycle state of a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Dropped,
}

/// User-supplied content of a report or verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub report_type: String,
    pub location: LatLng,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub device_id: String,
    /// Report being verified (verifications only).
    #[serde(default)]
    pub report_id: Option<String>,
    /// Whether the verifier confirms the report (verifications only).
    #[serde(default)]
    pub is_accurate: Option<bool>,
}

impl SubmissionPayload {
    pub fn report(report_type: &str, location: LatLng) -> Self {
        Self {
            report_type: report_type.to_string(),
            location,
            description: None,
            anonymous: false,
            device_id: String::new(),
            report_id: None,
            is_accurate: None,
        }
    }

    pub fn verification(
        report_id: &str,
        report_type: &str,
        location: LatLng,
        is_accurate: bool,
    ) -> Self {
        Self {
            report_id: Some(report_id.to_string()),
            is_accurate: Some(is_accurate),
            ..Self::report(report_type, location)
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }
}

/// A submission that passed the admission gate and awaits enqueueing.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSubmission {
    pub kind: SubmissionKind,
    pub payload: SubmissionPayload,
    pub priority: Priority,
}

/// A pending mutation in the offline write queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub kind: SubmissionKind,
    pub payload: SubmissionPayload,
    pub priority: Priority,
    /// Unix timestamp in milliseconds.
    pub enqueued_at: i64,
    pub retry_count: u32,
    pub status: QueueStatus,
    /// Insertion order, breaks ties between equal timestamps.
    #[serde(default)]
    pub seq: u64,
}

impl QueueItem {
    /// Stable key the remote API uses to deduplicate retried deliveries.
    pub fn idempotency_key(&self) -> String {
        format!("{}-{}", self.kind.as_str(), self.id)
    }
}
