//! Per-property extraction state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::retry::ErrorCategory;

/// Where a property is in its extraction lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Finer-grained step within an in-progress extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPhase {
    Queued,
    Searching,
    Downloading,
    Processing,
    Persisting,
    Done,
}

/// Why a property failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(category: ErrorCategory, message: impl Into<String>, http_status: Option<u16>) -> Self {
        Self {
            category,
            message: message.into(),
            http_status,
            at: Utc::now(),
        }
    }
}

/// Persisted state for one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyState {
    pub address: String,
    pub property_hash: String,
    pub status: ExtractionStatus,
    pub phase: ExtractionPhase,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub retry_count: u32,

    /// Set when resume logic reclaimed an abandoned `in_progress` entry
    #[serde(default)]
    pub stale_reset_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_error: Option<FailureRecord>,

    #[serde(default)]
    pub image_count: usize,

    #[serde(default)]
    pub last_run_id: Option<String>,
}

impl PropertyState {
    /// Fresh pending state.
    pub fn pending(address: impl Into<String>, property_hash: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            property_hash: property_hash.into(),
            status: ExtractionStatus::Pending,
            phase: ExtractionPhase::Queued,
            started_at: None,
            updated_at: Utc::now(),
            completed_at: None,
            retry_count: 0,
            stale_reset_at: None,
            last_error: None,
            image_count: 0,
            last_run_id: None,
        }
    }

    /// An `in_progress` entry not touched within `window` is presumed abandoned.
    pub fn is_stale(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.status == ExtractionStatus::InProgress && now - self.updated_at > window
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExtractionStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_only_when_in_progress() {
        let mut state = PropertyState::pending("a", "12345678");
        state.updated_at = Utc::now() - Duration::hours(2);
        assert!(!state.is_stale(Duration::minutes(30), Utc::now()));

        state.status = ExtractionStatus::InProgress;
        assert!(state.is_stale(Duration::minutes(30), Utc::now()));
        assert!(!state.is_stale(Duration::hours(3), Utc::now()));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ExtractionStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
