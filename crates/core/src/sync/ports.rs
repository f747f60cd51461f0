//! Port interfaces for sync operations
//!
//! `ExperimentTransport` is the boundary to the remote experimentation
//! service: Quarry consumes it but does not prescribe the wire protocol.
//! Transport errors carry a transient/permanent classification so the
//! resilient client can decide retry eligibility without inspecting
//! protocol details.

use std::time::Duration;

use async_trait::async_trait;
use quarry_domain::{
    Dataset, DatasetAnalysis, Experiment, ExperimentResult, Result, SyncState,
};
use thiserror::Error;

/// Errors surfaced by the remote transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection-level failure (DNS, refused, reset)
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within the transport deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Server-side failure (5xx-equivalent)
    #[error("server error (status {status}): {message}")]
    Server { status: u16, message: String },

    /// The service asked us to back off (429-equivalent)
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Credentials rejected (401/403-equivalent)
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The requested entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The response violated the protocol contract (malformed or
    /// unexpected payload)
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Whether the failure is plausibly transient and worth retrying.
    ///
    /// Network faults, timeouts, server errors, and rate limiting pass;
    /// contract violations, missing entities, and rejected credentials are
    /// permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::Server { .. } | Self::RateLimited(_)
        )
    }
}

/// One page of experiment results.
///
/// `next_cursor` is the page index to request next, or `None` when this
/// was the final page. Cursors are monotonically non-decreasing.
#[derive(Debug, Clone)]
pub struct ResultPage {
    pub results: Vec<ExperimentResult>,
    pub next_cursor: Option<u64>,
}

/// Boundary to the remote experimentation/telemetry service.
#[async_trait]
pub trait ExperimentTransport: Send + Sync {
    /// Fetch a single experiment by id
    async fn fetch_experiment(&self, id: &str) -> std::result::Result<Experiment, TransportError>;

    /// Fetch one page of results for an experiment, starting at the given
    /// page cursor
    async fn fetch_experiment_results(
        &self,
        experiment_id: &str,
        cursor: u64,
        page_size: usize,
    ) -> std::result::Result<ResultPage, TransportError>;

    /// List all datasets visible to the caller
    async fn list_datasets(&self) -> std::result::Result<Vec<Dataset>, TransportError>;

    /// Request a server-side analysis of a dataset
    async fn analyze_dataset(
        &self,
        dataset_id: &str,
    ) -> std::result::Result<DatasetAnalysis, TransportError>;
}

/// Persisted per-dataset sync progress.
///
/// Row-granular: implementations must support read-modify-write for one
/// dataset without cross-dataset locking. `upsert` must never move
/// `last_synced_at` backwards.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Load the state for a dataset, if any has been recorded
    async fn load(&self, dataset_id: &str) -> Result<Option<SyncState>>;

    /// Insert or update the state for a dataset
    async fn upsert(&self, state: &SyncState) -> Result<()>;

    /// Remove the state for a dataset (explicit reset)
    async fn reset(&self, dataset_id: &str) -> Result<()>;

    /// All recorded states
    async fn list_all(&self) -> Result<Vec<SyncState>>;
}
