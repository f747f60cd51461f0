//! Batch synchronization engine
//!
//! Drives many resilient client calls across a work list of datasets:
//! datasets run as concurrent workers below a global in-flight ceiling,
//! pages within one dataset are fetched strictly in cursor order, progress
//! is persisted after every page so an interrupted run resumes where it
//! stopped, and failures are recovered locally so one degraded dataset
//! never blocks the others. Join handles are tracked, cancellation is
//! explicit, and the run deadline is soft: in-flight attempts finish, new
//! pages are not dispatched.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use quarry_core::sync::ports::SyncStateStore;
use quarry_domain::{BatchSyncResult, DatasetSyncReport, SyncErrorRecord, SyncState, SyncStatus};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::errors::SyncError;
use super::resilient_client::ResilientClient;

/// Observation hook invoked with running totals: processed items, total
/// when known, and the dataset being synced.
pub type ProgressCallback = Arc<dyn Fn(u64, Option<u64>, &str) + Send + Sync>;

/// Configuration for the batch sync engine.
#[derive(Debug, Clone)]
pub struct BatchSyncConfig {
    /// Page size for result fetches
    pub batch_size: usize,
    /// Soft wall-clock deadline for one run
    pub batch_timeout: Duration,
    /// Invoke the progress callback every this many items per dataset
    pub progress_interval: u64,
    /// Global ceiling on concurrent page fetches across all datasets
    pub concurrent_limit: usize,
    /// Completed datasets younger than this are skipped
    pub max_age: Duration,
    /// Consecutive page failures before a dataset is marked failed
    pub max_page_failures: u32,
}

impl Default for BatchSyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_timeout: Duration::from_secs(300),
            progress_interval: 100,
            concurrent_limit: 4,
            max_age: Duration::from_secs(24 * 60 * 60),
            max_page_failures: 3,
        }
    }
}

impl BatchSyncConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be greater than 0".into()));
        }
        if self.concurrent_limit == 0 {
            return Err(SyncError::Config("concurrent_limit must be greater than 0".into()));
        }
        if self.max_page_failures == 0 {
            return Err(SyncError::Config("max_page_failures must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Synchronizes datasets against the remote experimentation service,
/// incrementally and resumably, under bounded concurrency.
pub struct BatchSyncEngine {
    client: Arc<ResilientClient>,
    store: Arc<dyn SyncStateStore>,
    config: BatchSyncConfig,
    cancellation: CancellationToken,
    semaphore: Arc<Semaphore>,
}

impl BatchSyncEngine {
    /// Create a new engine over the given client and state store.
    pub fn new(
        client: Arc<ResilientClient>,
        store: Arc<dyn SyncStateStore>,
        config: BatchSyncConfig,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let semaphore = Arc::new(Semaphore::new(config.concurrent_limit));

        Ok(Self { client, store, config, cancellation: CancellationToken::new(), semaphore })
    }

    /// Token that cancels this engine's current and future runs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Synchronize the given datasets, in caller order.
    ///
    /// Always yields a [`BatchSyncResult`] for partial failures; only a
    /// failing state store aborts the run with an error. Callers inspect
    /// `items_failed` and per-dataset statuses to detect degraded runs.
    #[instrument(skip(self, dataset_ids, on_progress), fields(datasets = dataset_ids.len()))]
    pub async fn run(
        &self,
        dataset_ids: &[String],
        on_progress: Option<ProgressCallback>,
    ) -> Result<BatchSyncResult, SyncError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let run_cancel = self.cancellation.child_token();
        let deadline = started + self.config.batch_timeout;

        info!(%run_id, datasets = dataset_ids.len(), "starting sync run");

        let mut tasks: JoinSet<(usize, Result<DatasetSyncReport, SyncError>)> = JoinSet::new();
        for (index, dataset_id) in dataset_ids.iter().enumerate() {
            let worker = DatasetWorker {
                client: Arc::clone(&self.client),
                store: Arc::clone(&self.store),
                config: self.config.clone(),
                cancel: run_cancel.clone(),
                semaphore: Arc::clone(&self.semaphore),
                on_progress: on_progress.clone(),
                deadline,
            };
            let dataset_id = dataset_id.clone();
            tasks.spawn(async move { (index, worker.sync_dataset(dataset_id).await) });
        }

        let mut indexed: Vec<(usize, DatasetSyncReport)> = Vec::with_capacity(dataset_ids.len());
        let mut fatal: Option<SyncError> = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(report))) => indexed.push((index, report)),
                Ok((_, Err(err))) => {
                    // A failing state store is fatal to the whole run; stop
                    // dispatching and surface the first cause.
                    warn!(error = %err, "dataset worker failed fatally");
                    run_cancel.cancel();
                    fatal.get_or_insert(err);
                }
                Err(join_err) => {
                    warn!(error = %join_err, "dataset worker panicked");
                    run_cancel.cancel();
                    fatal.get_or_insert(SyncError::Server(format!(
                        "sync worker failed: {join_err}"
                    )));
                }
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }

        indexed.sort_by_key(|(index, _)| *index);
        let reports: Vec<DatasetSyncReport> = indexed.into_iter().map(|(_, r)| r).collect();
        let result = BatchSyncResult::from_reports(reports, started.elapsed());

        info!(
            %run_id,
            items_processed = result.items_processed,
            items_failed = result.items_failed,
            fully_synced = result.is_fully_synced(),
            duration_ms = result.duration.as_millis() as u64,
            "sync run finished"
        );

        Ok(result)
    }
}

/// Per-dataset worker owning that dataset's state writes for the run.
struct DatasetWorker {
    client: Arc<ResilientClient>,
    store: Arc<dyn SyncStateStore>,
    config: BatchSyncConfig,
    cancel: CancellationToken,
    semaphore: Arc<Semaphore>,
    on_progress: Option<ProgressCallback>,
    deadline: Instant,
}

impl DatasetWorker {
    async fn sync_dataset(&self, dataset_id: String) -> Result<DatasetSyncReport, SyncError> {
        let started = Instant::now();
        let mut report = DatasetSyncReport {
            dataset_id: dataset_id.clone(),
            status: SyncStatus::Pending,
            items_processed: 0,
            items_succeeded: 0,
            items_failed: 0,
            duration: Duration::ZERO,
            errors: Vec::new(),
        };

        let mut state =
            self.store.load(&dataset_id).await?.unwrap_or_else(|| SyncState::new(&dataset_id));

        if state.is_fresh(self.config.max_age, Utc::now()) {
            debug!(%dataset_id, "dataset synced recently, skipping");
            report.status = SyncStatus::Complete;
            report.duration = started.elapsed();
            return Ok(report);
        }

        state.status = SyncStatus::InProgress;
        self.store.upsert(&state).await?;
        report.status = SyncStatus::InProgress;

        // Resolve the experiment backing this dataset's result stream.
        let experiment = match self.guarded(self.client.fetch_experiment(&dataset_id)).await {
            Ok(experiment) => experiment,
            Err(err) => return self.fail_dataset(state, report, started, Some(err)).await,
        };

        let mut consecutive_failures: u32 = 0;
        let mut progress_bucket: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return self.fail_dataset(state, report, started, Some(SyncError::Cancelled)).await;
            }
            if Instant::now() >= self.deadline {
                let err = SyncError::Timeout(self.config.batch_timeout);
                warn!(%dataset_id, "run deadline reached, not dispatching further pages");
                return self.fail_dataset(state, report, started, Some(err)).await;
            }

            // The semaphore caps in-flight page fetches across all datasets
            // in the run, since the remote dependency is shared.
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return self
                        .fail_dataset(state, report, started, Some(SyncError::Cancelled))
                        .await;
                }
                permit = self.semaphore.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        return self
                            .fail_dataset(state, report, started, Some(SyncError::Cancelled))
                            .await;
                    }
                },
            };

            let page_result = self
                .guarded(self.client.fetch_experiment_results(
                    &experiment.id,
                    state.cursor,
                    self.config.batch_size,
                ))
                .await;
            drop(permit);

            match page_result {
                Ok(page) => {
                    consecutive_failures = 0;
                    let count = page.results.len() as u64;
                    report.items_processed += count;
                    report.items_succeeded += count;
                    self.report_progress(&mut progress_bucket, report.items_processed, &dataset_id);

                    match page.next_cursor {
                        Some(next) => {
                            // Cursors never move backwards within a run.
                            state.cursor = next.max(state.cursor + 1);
                            self.store.upsert(&state).await?;
                        }
                        None => {
                            state.cursor += 1;
                            state.status = SyncStatus::Complete;
                            state.last_synced_at = Some(Utc::now());
                            state.last_error = None;
                            self.store.upsert(&state).await?;

                            report.status = SyncStatus::Complete;
                            report.duration = started.elapsed();
                            info!(
                                %dataset_id,
                                items = report.items_succeeded,
                                cursor = state.cursor,
                                "dataset synced"
                            );
                            return Ok(report);
                        }
                    }
                }
                Err(SyncError::Cancelled) => {
                    return self
                        .fail_dataset(state, report, started, Some(SyncError::Cancelled))
                        .await;
                }
                Err(err) => {
                    consecutive_failures += 1;
                    state.retry_count += 1;
                    state.last_error = Some(err.to_string());
                    // The lost page's declared capacity counts as failed work.
                    report.items_processed += self.config.batch_size as u64;
                    report.items_failed += self.config.batch_size as u64;
                    report.errors.push(SyncErrorRecord {
                        dataset_id: dataset_id.clone(),
                        message: err.to_string(),
                        occurred_at: Utc::now(),
                    });
                    warn!(
                        %dataset_id,
                        cursor = state.cursor,
                        consecutive_failures,
                        error = %err,
                        "page fetch failed"
                    );

                    if consecutive_failures >= self.config.max_page_failures {
                        return self.fail_dataset(state, report, started, None).await;
                    }

                    // Skip the poisoned page and keep going.
                    state.cursor += 1;
                    self.store.upsert(&state).await?;
                }
            }
        }
    }

    /// Mark the dataset failed, persist its partial progress, and finish
    /// the report. `err` is recorded when it has not been already.
    async fn fail_dataset(
        &self,
        mut state: SyncState,
        mut report: DatasetSyncReport,
        started: Instant,
        err: Option<SyncError>,
    ) -> Result<DatasetSyncReport, SyncError> {
        if let Some(err) = &err {
            state.last_error = Some(err.to_string());
            report.errors.push(SyncErrorRecord {
                dataset_id: state.dataset_id.clone(),
                message: err.to_string(),
                occurred_at: Utc::now(),
            });
        }

        state.status = SyncStatus::Failed;
        self.store.upsert(&state).await?;

        report.status = SyncStatus::Failed;
        report.duration = started.elapsed();
        Ok(report)
    }

    async fn guarded<T>(
        &self,
        operation: impl Future<Output = Result<T, SyncError>>,
    ) -> Result<T, SyncError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            result = operation => result,
        }
    }

    fn report_progress(&self, bucket: &mut u64, processed: u64, dataset_id: &str) {
        if let Some(callback) = &self.on_progress {
            let interval = self.config.progress_interval.max(1);
            let current = processed / interval;
            if current > *bucket {
                *bucket = current;
                callback(processed, None, dataset_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use quarry_core::sync::ports::{ExperimentTransport, ResultPage, TransportError};
    use quarry_domain::{
        Dataset, DatasetAnalysis, Experiment, ExperimentResult, Result as DomainResult,
        ResultScores,
    };
    use tokio::sync::Mutex as TokioMutex;

    use super::*;
    use crate::sync::resilient_client::ResilienceConfig;

    // ========================================================================
    // Test Doubles
    // ========================================================================

    /// In-memory state store with row-level access.
    #[derive(Default)]
    struct MemoryStateStore {
        states: TokioMutex<HashMap<String, SyncState>>,
    }

    impl MemoryStateStore {
        async fn get(&self, dataset_id: &str) -> Option<SyncState> {
            self.states.lock().await.get(dataset_id).cloned()
        }

        async fn seed(&self, state: SyncState) {
            self.states.lock().await.insert(state.dataset_id.clone(), state);
        }
    }

    #[async_trait]
    impl SyncStateStore for MemoryStateStore {
        async fn load(&self, dataset_id: &str) -> DomainResult<Option<SyncState>> {
            Ok(self.states.lock().await.get(dataset_id).cloned())
        }

        async fn upsert(&self, state: &SyncState) -> DomainResult<()> {
            self.states.lock().await.insert(state.dataset_id.clone(), state.clone());
            Ok(())
        }

        async fn reset(&self, dataset_id: &str) -> DomainResult<()> {
            self.states.lock().await.remove(dataset_id);
            Ok(())
        }

        async fn list_all(&self) -> DomainResult<Vec<SyncState>> {
            Ok(self.states.lock().await.values().cloned().collect())
        }
    }

    /// Store whose loads always fail, simulating a corrupted database.
    struct CorruptStateStore;

    #[async_trait]
    impl SyncStateStore for CorruptStateStore {
        async fn load(&self, _dataset_id: &str) -> DomainResult<Option<SyncState>> {
            Err(quarry_domain::QuarryError::Database("corrupted state store".into()))
        }

        async fn upsert(&self, _state: &SyncState) -> DomainResult<()> {
            Err(quarry_domain::QuarryError::Database("corrupted state store".into()))
        }

        async fn reset(&self, _dataset_id: &str) -> DomainResult<()> {
            Ok(())
        }

        async fn list_all(&self) -> DomainResult<Vec<SyncState>> {
            Ok(vec![])
        }
    }

    fn result_for(index: u64) -> ExperimentResult {
        ExperimentResult {
            example_id: format!("ex-{index}"),
            repetition_number: 1,
            input: format!("question {index}"),
            reference_output: format!("answer {index}"),
            scores: ResultScores { qa_correctness: 0.9, rag_relevance: 0.9, confidence: 0.9 },
            retrieved_context: vec![],
            latency_ms: 25,
            trace_id: None,
        }
    }

    /// Transport serving a fixed number of results per dataset, with
    /// optional always-failing datasets and cursor recording.
    struct PagedTransport {
        totals: HashMap<String, u64>,
        failing: HashSet<String>,
        requested_cursors: Mutex<Vec<(String, u64)>>,
        result_calls: Mutex<u32>,
    }

    impl PagedTransport {
        fn new(totals: &[(&str, u64)]) -> Self {
            Self {
                totals: totals.iter().map(|(id, n)| (id.to_string(), *n)).collect(),
                failing: HashSet::new(),
                requested_cursors: Mutex::new(Vec::new()),
                result_calls: Mutex::new(0),
            }
        }

        fn with_failing(mut self, dataset_id: &str) -> Self {
            self.failing.insert(format!("{dataset_id}-exp"));
            self
        }

        fn cursors_for(&self, experiment_id: &str) -> Vec<u64> {
            self.requested_cursors
                .lock()
                .expect("cursor lock")
                .iter()
                .filter(|(id, _)| id == experiment_id)
                .map(|(_, c)| *c)
                .collect()
        }

        fn result_call_count(&self) -> u32 {
            *self.result_calls.lock().expect("call lock")
        }
    }

    #[async_trait]
    impl ExperimentTransport for PagedTransport {
        async fn fetch_experiment(&self, id: &str) -> Result<Experiment, TransportError> {
            if !self.totals.contains_key(id) {
                return Err(TransportError::NotFound(id.to_string()));
            }
            Ok(Experiment {
                id: format!("{id}-exp"),
                dataset_id: id.to_string(),
                project_name: "support-rag".to_string(),
                created_at: Utc::now(),
                repetitions: 1,
                metadata: serde_json::Value::Null,
            })
        }

        async fn fetch_experiment_results(
            &self,
            experiment_id: &str,
            cursor: u64,
            page_size: usize,
        ) -> Result<ResultPage, TransportError> {
            *self.result_calls.lock().expect("call lock") += 1;
            self.requested_cursors
                .lock()
                .expect("cursor lock")
                .push((experiment_id.to_string(), cursor));

            if self.failing.contains(experiment_id) {
                return Err(TransportError::Network("backend down".to_string()));
            }

            let dataset_id = experiment_id.trim_end_matches("-exp");
            let total = *self.totals.get(dataset_id).unwrap_or(&0);

            let start = cursor * page_size as u64;
            let end = (start + page_size as u64).min(total);
            let results = (start..end).map(result_for).collect();
            let next_cursor = if end < total { Some(cursor + 1) } else { None };

            Ok(ResultPage { results, next_cursor })
        }

        async fn list_datasets(&self) -> Result<Vec<Dataset>, TransportError> {
            Ok(vec![])
        }

        async fn analyze_dataset(
            &self,
            _dataset_id: &str,
        ) -> Result<DatasetAnalysis, TransportError> {
            Err(TransportError::NotFound("analysis unsupported in tests".to_string()))
        }
    }

    // ========================================================================
    // Test Helpers
    // ========================================================================

    fn fast_resilience() -> ResilienceConfig {
        ResilienceConfig {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
            failure_threshold: 1000,
            ..Default::default()
        }
    }

    fn engine_config(batch_size: usize) -> BatchSyncConfig {
        BatchSyncConfig {
            batch_size,
            batch_timeout: Duration::from_secs(30),
            progress_interval: 2,
            concurrent_limit: 2,
            max_age: Duration::from_secs(24 * 60 * 60),
            max_page_failures: 3,
        }
    }

    fn build_engine(
        transport: Arc<PagedTransport>,
        store: Arc<MemoryStateStore>,
        config: BatchSyncConfig,
    ) -> BatchSyncEngine {
        let client = Arc::new(
            ResilientClient::new(transport as _, fast_resilience()).expect("client built"),
        );
        BatchSyncEngine::new(client, store as _, config).expect("engine built")
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    // ========================================================================
    // Tests
    // ========================================================================

    #[test]
    fn test_config_validation() {
        assert!(BatchSyncConfig::default().validate().is_ok());

        let bad = BatchSyncConfig { batch_size: 0, ..Default::default() };
        assert!(bad.validate().is_err());

        let bad = BatchSyncConfig { concurrent_limit: 0, ..Default::default() };
        assert!(bad.validate().is_err());

        let bad = BatchSyncConfig { max_page_failures: 0, ..Default::default() };
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_syncs_datasets_to_completion() {
        let transport = Arc::new(PagedTransport::new(&[("ds-a", 5), ("ds-b", 4)]));
        let store = Arc::new(MemoryStateStore::default());
        let engine = build_engine(Arc::clone(&transport), Arc::clone(&store), engine_config(2));

        let result = engine.run(&ids(&["ds-a", "ds-b"]), None).await.expect("run succeeds");

        assert!(result.is_fully_synced());
        assert_eq!(result.items_processed, 9);
        assert_eq!(result.items_succeeded, 9);
        assert_eq!(result.items_failed, 0);
        assert_eq!(result.datasets.len(), 2);
        assert_eq!(result.datasets[0].dataset_id, "ds-a", "caller order is preserved");

        let state = store.get("ds-a").await.expect("state persisted");
        assert_eq!(state.status, SyncStatus::Complete);
        assert!(state.last_synced_at.is_some());
        assert_eq!(state.cursor, 3, "cursor advanced past the last page");
    }

    #[tokio::test]
    async fn test_pages_fetched_in_cursor_order() {
        let transport = Arc::new(PagedTransport::new(&[("ds-a", 6)]));
        let store = Arc::new(MemoryStateStore::default());
        let engine = build_engine(Arc::clone(&transport), store, engine_config(2));

        engine.run(&ids(&["ds-a"]), None).await.expect("run succeeds");

        assert_eq!(transport.cursors_for("ds-a-exp"), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_partial_failure_isolation() {
        let transport =
            Arc::new(PagedTransport::new(&[("ds-a", 10), ("ds-b", 4)]).with_failing("ds-a"));
        let store = Arc::new(MemoryStateStore::default());
        let engine = build_engine(Arc::clone(&transport), Arc::clone(&store), engine_config(2));

        let result = engine.run(&ids(&["ds-a", "ds-b"]), None).await.expect("run still succeeds");

        let report_a = &result.datasets[0];
        assert_eq!(report_a.status, SyncStatus::Failed);
        assert_eq!(report_a.errors.len(), 3, "one record per failed page");
        assert_eq!(report_a.items_failed, 6, "each lost page counts its capacity");

        let report_b = &result.datasets[1];
        assert_eq!(report_b.status, SyncStatus::Complete, "healthy dataset is unaffected");
        assert_eq!(report_b.items_succeeded, 4);

        let state_a = store.get("ds-a").await.expect("state persisted");
        assert_eq!(state_a.status, SyncStatus::Failed);
        assert_eq!(state_a.retry_count, 3);
        assert!(state_a.last_error.is_some());

        let state_b = store.get("ds-b").await.expect("state persisted");
        assert_eq!(state_b.status, SyncStatus::Complete);
    }

    #[tokio::test]
    async fn test_resumes_from_persisted_cursor() {
        let transport = Arc::new(PagedTransport::new(&[("ds-a", 6)]));
        let store = Arc::new(MemoryStateStore::default());

        let mut interrupted = SyncState::new("ds-a");
        interrupted.cursor = 2;
        interrupted.status = SyncStatus::InProgress;
        store.seed(interrupted).await;

        let engine = build_engine(Arc::clone(&transport), Arc::clone(&store), engine_config(2));
        let result = engine.run(&ids(&["ds-a"]), None).await.expect("run succeeds");

        // Only the final page (items 4 and 5) is fetched.
        assert_eq!(transport.cursors_for("ds-a-exp"), vec![2]);
        assert_eq!(result.items_succeeded, 2);

        let state = store.get("ds-a").await.expect("state persisted");
        assert_eq!(state.status, SyncStatus::Complete);
        assert_eq!(state.cursor, 3);
    }

    #[tokio::test]
    async fn test_skips_fresh_complete_dataset() {
        let transport = Arc::new(PagedTransport::new(&[("ds-a", 6)]));
        let store = Arc::new(MemoryStateStore::default());

        let mut fresh = SyncState::new("ds-a");
        fresh.status = SyncStatus::Complete;
        fresh.cursor = 3;
        fresh.last_synced_at = Some(Utc::now() - chrono::Duration::hours(1));
        store.seed(fresh).await;

        let engine = build_engine(Arc::clone(&transport), Arc::clone(&store), engine_config(2));
        let result = engine.run(&ids(&["ds-a"]), None).await.expect("run succeeds");

        assert_eq!(result.datasets[0].status, SyncStatus::Complete);
        assert_eq!(result.items_processed, 0, "skip is an idempotent no-op");
        assert_eq!(transport.result_call_count(), 0, "no remote calls for a fresh dataset");
    }

    #[tokio::test]
    async fn test_stale_complete_dataset_resyncs_incrementally() {
        let transport = Arc::new(PagedTransport::new(&[("ds-a", 8)]));
        let store = Arc::new(MemoryStateStore::default());

        // Completed long ago at cursor 3; new results have appeared since.
        let mut stale = SyncState::new("ds-a");
        stale.status = SyncStatus::Complete;
        stale.cursor = 3;
        stale.last_synced_at = Some(Utc::now() - chrono::Duration::days(3));
        store.seed(stale).await;

        let engine = build_engine(Arc::clone(&transport), Arc::clone(&store), engine_config(2));
        let result = engine.run(&ids(&["ds-a"]), None).await.expect("run succeeds");

        assert_eq!(transport.cursors_for("ds-a-exp"), vec![3]);
        assert_eq!(result.items_succeeded, 2, "only the new tail is fetched");

        let state = store.get("ds-a").await.expect("state persisted");
        assert_eq!(state.status, SyncStatus::Complete);
        assert_eq!(state.cursor, 4);
    }

    #[tokio::test]
    async fn test_cancellation_fails_in_progress_datasets_and_persists_state() {
        let transport = Arc::new(PagedTransport::new(&[("ds-a", 6)]));
        let store = Arc::new(MemoryStateStore::default());
        let engine = build_engine(Arc::clone(&transport), Arc::clone(&store), engine_config(2));

        engine.cancellation_token().cancel();
        let result = engine.run(&ids(&["ds-a"]), None).await.expect("run returns a result");

        let report = &result.datasets[0];
        assert_eq!(report.status, SyncStatus::Failed);
        assert!(report.errors.iter().any(|e| e.message.contains("cancelled")));

        let state = store.get("ds-a").await.expect("partial state persisted");
        assert_eq!(state.status, SyncStatus::Failed);
    }

    #[tokio::test]
    async fn test_deadline_stops_dispatching_pages() {
        let transport = Arc::new(PagedTransport::new(&[("ds-a", 6), ("ds-b", 6)]));
        let store = Arc::new(MemoryStateStore::default());

        let config = BatchSyncConfig { batch_timeout: Duration::ZERO, ..engine_config(2) };
        let engine = build_engine(Arc::clone(&transport), Arc::clone(&store), config);

        let result = engine.run(&ids(&["ds-a", "ds-b"]), None).await.expect("run returns");

        for report in &result.datasets {
            assert_eq!(report.status, SyncStatus::Failed);
            assert!(report.errors.iter().any(|e| e.message.contains("timed out")));
        }
        assert_eq!(transport.result_call_count(), 0, "no pages dispatched past the deadline");
    }

    #[tokio::test]
    async fn test_progress_callback_reports_running_totals() {
        let transport = Arc::new(PagedTransport::new(&[("ds-a", 6)]));
        let store = Arc::new(MemoryStateStore::default());
        let engine = build_engine(Arc::clone(&transport), store, engine_config(2));

        let seen: Arc<Mutex<Vec<(u64, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |processed, _total, dataset_id| {
            seen_clone.lock().expect("progress lock").push((processed, dataset_id.to_string()));
        });

        engine.run(&ids(&["ds-a"]), Some(callback)).await.expect("run succeeds");

        let seen = seen.lock().expect("progress lock");
        // progress_interval is 2: one report per completed page of 2 items.
        assert_eq!(
            *seen,
            vec![
                (2, "ds-a".to_string()),
                (4, "ds-a".to_string()),
                (6, "ds-a".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_dataset_fails_without_blocking_others() {
        let transport = Arc::new(PagedTransport::new(&[("ds-b", 2)]));
        let store = Arc::new(MemoryStateStore::default());
        let engine = build_engine(Arc::clone(&transport), Arc::clone(&store), engine_config(2));

        let result =
            engine.run(&ids(&["ds-missing", "ds-b"]), None).await.expect("run returns");

        assert_eq!(result.datasets[0].status, SyncStatus::Failed);
        assert_eq!(result.datasets[1].status, SyncStatus::Complete);
    }

    #[tokio::test]
    async fn test_corrupted_store_is_fatal() {
        let transport = Arc::new(PagedTransport::new(&[("ds-a", 2)]));
        let client = Arc::new(
            ResilientClient::new(transport as _, fast_resilience()).expect("client built"),
        );
        let engine =
            BatchSyncEngine::new(client, Arc::new(CorruptStateStore) as _, engine_config(2))
                .expect("engine built");

        let err = engine.run(&ids(&["ds-a"]), None).await.expect_err("corrupt store is fatal");
        assert!(matches!(err, SyncError::Database(_)));
    }
}
