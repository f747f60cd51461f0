//! Sync bookkeeping records owned by the batch synchronization engine.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one dataset's synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::InProgress => write!(f, "in_progress"),
            SyncStatus::Complete => write!(f, "complete"),
            SyncStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "in_progress" => Ok(SyncStatus::InProgress),
            "complete" => Ok(SyncStatus::Complete),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// Per-dataset sync progress, persisted so interrupted runs resume
/// incrementally.
///
/// The batch engine is the only writer. `cursor` is the next page index to
/// fetch and never moves backwards within a run; `last_synced_at` only
/// moves forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub dataset_id: String,
    /// Next page index to fetch
    pub cursor: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    /// Number of page failures observed across runs
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl SyncState {
    /// Fresh state for a dataset that has never been synced.
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            cursor: 0,
            last_synced_at: None,
            status: SyncStatus::Pending,
            retry_count: 0,
            last_error: None,
        }
    }

    /// Whether this dataset completed within the given freshness window.
    pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        if self.status != SyncStatus::Complete {
            return false;
        }
        match self.last_synced_at {
            Some(synced) => {
                let age = now.signed_duration_since(synced);
                age.to_std().map(|age| age <= max_age).unwrap_or(true)
            }
            None => false,
        }
    }
}

/// One recorded failure during a sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncErrorRecord {
    pub dataset_id: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Outcome of syncing a single dataset within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSyncReport {
    pub dataset_id: String,
    pub status: SyncStatus,
    pub items_processed: u64,
    pub items_succeeded: u64,
    pub items_failed: u64,
    pub duration: Duration,
    pub errors: Vec<SyncErrorRecord>,
}

/// Aggregated outcome of one sync invocation.
///
/// Always produced, even on partial failure: callers inspect
/// `items_failed` and `errors` rather than relying on an error return to
/// detect degraded runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSyncResult {
    pub datasets: Vec<DatasetSyncReport>,
    pub items_processed: u64,
    pub items_succeeded: u64,
    pub items_failed: u64,
    pub duration: Duration,
}

impl BatchSyncResult {
    /// Build the run-level aggregate from per-dataset reports.
    pub fn from_reports(datasets: Vec<DatasetSyncReport>, duration: Duration) -> Self {
        let items_processed = datasets.iter().map(|d| d.items_processed).sum();
        let items_succeeded = datasets.iter().map(|d| d.items_succeeded).sum();
        let items_failed = datasets.iter().map(|d| d.items_failed).sum();
        Self { datasets, items_processed, items_succeeded, items_failed, duration }
    }

    /// All error records across datasets, in dataset order.
    pub fn errors(&self) -> impl Iterator<Item = &SyncErrorRecord> {
        self.datasets.iter().flat_map(|d| d.errors.iter())
    }

    /// Whether every dataset in the run completed.
    pub fn is_fully_synced(&self) -> bool {
        self.datasets.iter().all(|d| d.status == SyncStatus::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_status_string_round_trip() {
        for status in
            [SyncStatus::Pending, SyncStatus::InProgress, SyncStatus::Complete, SyncStatus::Failed]
        {
            let text = status.to_string();
            let parsed: SyncStatus = text.parse().expect("round-trips");
            assert_eq!(parsed, status);
        }

        assert!("bogus".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn new_state_starts_pending_at_cursor_zero() {
        let state = SyncState::new("ds-1");
        assert_eq!(state.cursor, 0);
        assert_eq!(state.status, SyncStatus::Pending);
        assert!(state.last_synced_at.is_none());
        assert_eq!(state.retry_count, 0);
    }

    #[test]
    fn freshness_requires_complete_status_and_recent_timestamp() {
        let now = Utc::now();
        let max_age = Duration::from_secs(86_400);

        let mut state = SyncState::new("ds-1");
        assert!(!state.is_fresh(max_age, now), "pending state is never fresh");

        state.status = SyncStatus::Complete;
        assert!(!state.is_fresh(max_age, now), "complete without timestamp is not fresh");

        state.last_synced_at = Some(now - chrono::Duration::hours(1));
        assert!(state.is_fresh(max_age, now));

        state.last_synced_at = Some(now - chrono::Duration::days(2));
        assert!(!state.is_fresh(max_age, now));
    }

    #[test]
    fn batch_result_aggregates_dataset_reports() {
        let reports = vec![
            DatasetSyncReport {
                dataset_id: "a".to_string(),
                status: SyncStatus::Complete,
                items_processed: 10,
                items_succeeded: 10,
                items_failed: 0,
                duration: Duration::from_secs(1),
                errors: vec![],
            },
            DatasetSyncReport {
                dataset_id: "b".to_string(),
                status: SyncStatus::Failed,
                items_processed: 5,
                items_succeeded: 2,
                items_failed: 3,
                duration: Duration::from_secs(1),
                errors: vec![SyncErrorRecord {
                    dataset_id: "b".to_string(),
                    message: "page fetch failed".to_string(),
                    occurred_at: Utc::now(),
                }],
            },
        ];

        let result = BatchSyncResult::from_reports(reports, Duration::from_secs(2));
        assert_eq!(result.items_processed, 15);
        assert_eq!(result.items_succeeded, 12);
        assert_eq!(result.items_failed, 3);
        assert_eq!(result.errors().count(), 1);
        assert!(!result.is_fully_synced());
    }
}
