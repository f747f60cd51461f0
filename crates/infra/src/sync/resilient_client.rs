//! Resilient client wrapping the experiment transport
//!
//! Every typed remote operation goes through the same per-attempt protocol:
//! the circuit breaker is consulted immediately before each attempt, the
//! transport call runs inside the retry executor, and the breaker is fed
//! the outcome of every individual attempt. A dependency that fails on
//! attempts 1-2 and succeeds on attempt 3 therefore still nudges the
//! breaker toward OPEN, since repeated attempts consume dependency
//! capacity.
//!
//! When the breaker is open the call fails fast with
//! [`SyncError::CircuitOpen`] before the retry loop is entered, so a
//! saturated dependency does not accumulate backoff latency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use std::future::Future;

use quarry_common::resilience::retry::RetryError;
use quarry_common::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, RetryConfig,
    RetryDecision, RetryExecutor, RetryPolicy,
};
use quarry_core::patterns::PatternExtractor;
use quarry_core::sync::ports::{ExperimentTransport, ResultPage, TransportError};
use quarry_domain::{Dataset, DatasetAnalysis, Experiment, ExtractedPattern};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::errors::SyncError;

/// Combined retry and circuit-breaker settings for one remote dependency.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Maximum attempts per operation (including the first)
    pub max_attempts: u32,
    /// Base delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay
    pub max_delay: Duration,
    /// Exponential growth factor between retries
    pub exponential_base: f64,
    /// Whether to randomize backoff delays
    pub jitter: bool,
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Consecutive half-open successes before the circuit closes
    pub success_threshold: u32,
    /// How long the circuit stays open before probing recovery
    pub circuit_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
            failure_threshold: 5,
            success_threshold: 2,
            circuit_timeout: Duration::from_secs(60),
        }
    }
}

impl ResilienceConfig {
    fn retry_config(&self) -> Result<RetryConfig, SyncError> {
        let mut builder = RetryConfig::builder().max_attempts(self.max_attempts).exponential_backoff(
            self.base_delay,
            self.exponential_base,
            self.max_delay,
        );
        builder = if self.jitter { builder.equal_jitter() } else { builder.no_jitter() };
        builder.build().map_err(|e| match e {
            RetryError::InvalidConfiguration { message } => SyncError::Config(message),
            other => SyncError::Config(format!("{other:?}")),
        })
    }

    fn breaker_config(&self) -> Result<CircuitBreakerConfig, SyncError> {
        CircuitBreakerConfig::builder()
            .failure_threshold(self.failure_threshold)
            .success_threshold(self.success_threshold)
            .timeout(self.circuit_timeout)
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))
    }
}

/// Retry policy driven by the sync error taxonomy: transient categories
/// retry, everything else stops.
#[derive(Debug, Clone)]
struct TransientRetry;

impl RetryPolicy<SyncError> for TransientRetry {
    fn should_retry(&self, error: &SyncError, _attempt: u32) -> RetryDecision {
        if error.should_retry() {
            RetryDecision::Retry
        } else {
            RetryDecision::Stop
        }
    }
}

/// Typed, resilient facade over the experiment transport.
///
/// One instance guards one remote dependency: the breaker is shared by all
/// concurrent callers of this client, so they observe and influence the
/// same health state. Construct explicitly and call [`Self::shutdown`] to
/// abandon in-flight retries on teardown.
pub struct ResilientClient {
    transport: Arc<dyn ExperimentTransport>,
    breaker: CircuitBreaker,
    retry: RetryExecutor<TransientRetry>,
    cancellation: CancellationToken,
}

impl ResilientClient {
    /// Create a new client around the given transport.
    pub fn new(
        transport: Arc<dyn ExperimentTransport>,
        config: ResilienceConfig,
    ) -> Result<Self, SyncError> {
        let breaker = CircuitBreaker::new(config.breaker_config()?)
            .map_err(|e| SyncError::Config(e.to_string()))?;
        let retry = RetryExecutor::new(config.retry_config()?, TransientRetry);

        Ok(Self { transport, breaker, retry, cancellation: CancellationToken::new() })
    }

    /// Cancel all in-flight and future calls made through this client.
    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }

    /// Current circuit state for the guarded dependency.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Counters snapshot from the underlying breaker.
    pub fn breaker_metrics(&self) -> CircuitBreakerMetrics {
        self.breaker.metrics()
    }

    /// Fetch a single experiment by id.
    #[instrument(skip(self))]
    pub async fn fetch_experiment(&self, id: &str) -> Result<Experiment, SyncError> {
        self.call(|| self.transport.fetch_experiment(id)).await
    }

    /// Fetch one page of experiment results.
    #[instrument(skip(self))]
    pub async fn fetch_experiment_results(
        &self,
        experiment_id: &str,
        cursor: u64,
        page_size: usize,
    ) -> Result<ResultPage, SyncError> {
        self.call(|| self.transport.fetch_experiment_results(experiment_id, cursor, page_size))
            .await
    }

    /// List all datasets visible to the caller.
    #[instrument(skip(self))]
    pub async fn list_datasets(&self) -> Result<Vec<Dataset>, SyncError> {
        self.call(|| self.transport.list_datasets()).await
    }

    /// Request a server-side analysis of a dataset.
    #[instrument(skip(self))]
    pub async fn analyze_dataset(&self, dataset_id: &str) -> Result<DatasetAnalysis, SyncError> {
        self.call(|| self.transport.analyze_dataset(dataset_id)).await
    }

    /// Drain all result pages of an experiment resiliently and reduce them
    /// to extracted patterns.
    ///
    /// Each page fetch is an independently retried, breaker-gated call;
    /// the extraction itself is pure and local.
    #[instrument(skip(self, extractor))]
    pub async fn extract_patterns(
        &self,
        experiment_id: &str,
        page_size: usize,
        extractor: &PatternExtractor,
    ) -> Result<Vec<ExtractedPattern>, SyncError> {
        let mut results = Vec::new();
        let mut cursor = 0_u64;

        loop {
            let page = self.fetch_experiment_results(experiment_id, cursor, page_size).await?;
            results.extend(page.results);

            match page.next_cursor {
                Some(next) => cursor = next.max(cursor + 1),
                None => break,
            }
        }

        debug!(experiment_id, result_count = results.len(), "extracting patterns");
        Ok(extractor.extract(&results))
    }

    /// Run one transport operation through the per-attempt protocol.
    async fn call<T, F, Fut>(&self, operation: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        // Fail fast before entering the retry loop: a rejected call is
        // cheap and is not counted as an attempt.
        if !self.breaker.can_execute() {
            warn!("circuit open, rejecting call");
            return Err(SyncError::CircuitOpen);
        }

        // The gate above already admitted the first attempt (and holds its
        // half-open slot); later attempts re-check the breaker themselves.
        let first_attempt = AtomicBool::new(true);
        let op = &operation;

        let result = self
            .retry
            .execute_cancellable(&self.cancellation, || {
                let first = !first_attempt.swap(false, Ordering::AcqRel);
                async move {
                    if !first && !self.breaker.can_execute() {
                        return Err(SyncError::CircuitOpen);
                    }

                    match op().await {
                        Ok(value) => {
                            self.breaker.record_success();
                            Ok(value)
                        }
                        Err(err) => {
                            self.breaker.record_failure();
                            Err(SyncError::from(err))
                        }
                    }
                }
            })
            .await;

        result.map_err(|err| match err {
            RetryError::AttemptsExhausted { attempts, source } => {
                SyncError::RetryExhausted { attempts, source: Box::new(source) }
            }
            RetryError::NonRetryable { source } => source,
            RetryError::TimeoutExceeded { elapsed } => SyncError::Timeout(elapsed),
            RetryError::Cancelled => SyncError::Cancelled,
            RetryError::InvalidConfiguration { message } => SyncError::Config(message),
        })
    }
}
