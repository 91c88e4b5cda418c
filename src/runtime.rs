//! Composition root. Builds each service once and wires them together;
//! embedders hold one `TranslationRuntime` for the life of the process.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::access::{AccessTracker, FamilyUsageMetrics};
use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::error::{EnqueueError, StartupError, StoreError};
use crate::metrics::{MetricSummary, MetricsRegistry};
use crate::queue::{EnqueueOutcome, JobId, JobQueue, NewJob, Priority, QueueConfig, QueueStatus};
use crate::scheduler::{SchedulerHandle, SchedulerLoop};
use crate::store::{
    InMemoryStore, JobStatus, PersistenceStore, SqliteStore, StatusUpdate, StoreWrite, StoreWriter,
    StrategyName,
};
use crate::strategy::{StrategyAdvisor, TranslationDecision};
use crate::translate::{HttpTranslationProvider, ResultCache, StubProvider, TranslationProvider};

/// Result of [`TranslationRuntime::submit_content`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Enqueued(EnqueueOutcome),
    /// Left for an on-demand request; persisted as NotNeeded unless the store
    /// already holds Pending or InProgress work for it.
    Deferred(TranslationDecision),
}

pub struct TranslationRuntime {
    config: SchedulerConfig,
    store: Arc<dyn PersistenceStore>,
    writer: StoreWriter,
    cache: Arc<ResultCache>,
    queue: Arc<JobQueue>,
    tracker: Arc<AccessTracker>,
    advisor: StrategyAdvisor,
    metrics: Arc<MetricsRegistry>,
}

impl TranslationRuntime {
    /// Wire the services around the given store, provider and clock.
    /// Must be called inside a Tokio runtime.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn PersistenceStore>,
        provider: Arc<dyn TranslationProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let writer = StoreWriter::spawn(Arc::clone(&store));
        let cache = Arc::new(ResultCache::from_config(&config, Arc::clone(&clock)));
        let queue = Arc::new(JobQueue::new(
            QueueConfig::from_config(&config),
            Arc::clone(&cache),
            provider,
            writer.clone(),
            Arc::clone(&clock),
            Arc::clone(&metrics),
        ));
        let tracker = Arc::new(AccessTracker::new(clock).with_writer(writer.clone()));
        let advisor = StrategyAdvisor::new(Arc::clone(&tracker), Arc::clone(&store));

        Self {
            config,
            store,
            writer,
            cache,
            queue,
            tracker,
            advisor,
            metrics,
        }
    }

    /// Validate `config` and build the default adapters: SQLite when a
    /// database path is set (in-memory otherwise), HTTP when an endpoint is
    /// set (echo stub otherwise).
    pub fn from_config(config: SchedulerConfig) -> Result<Self, StartupError> {
        config.validate()?;

        let store: Arc<dyn PersistenceStore> = match &config.database_path {
            Some(path) => Arc::new(SqliteStore::open(path)?),
            None => Arc::new(InMemoryStore::new()),
        };
        let provider: Arc<dyn TranslationProvider> =
            match HttpTranslationProvider::from_config(&config)? {
                Some(http) => Arc::new(http),
                None => {
                    info!("no provider endpoint configured, using stub provider");
                    Arc::new(StubProvider)
                }
            };

        info!(
            max_concurrent = config.max_concurrent,
            max_retries = config.max_retries,
            persistent = config.database_path.is_some(),
            "translation runtime configured"
        );
        Ok(Self::new(config, store, provider, Arc::new(SystemClock)))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn enqueue(&self, job: NewJob) -> Result<EnqueueOutcome, EnqueueError> {
        self.queue.enqueue(job)
    }

    /// On-demand read path: the content is wanted now.
    pub fn request_translation(&self, job: NewJob) -> Result<EnqueueOutcome, EnqueueError> {
        self.queue.enqueue(job.with_priority(Priority::High))
    }

    /// Producer path: enqueue at Medium priority if the family's strategy
    /// says so, otherwise record the content as NotNeeded. Persisted work the
    /// scheduler has not refilled yet is left alone.
    pub async fn submit_content(&self, job: NewJob) -> Result<SubmitOutcome, EnqueueError> {
        job.validate()?;
        if self.queue.contains(&job.content_id, &job.target_language_code) {
            return Ok(SubmitOutcome::Enqueued(EnqueueOutcome::AlreadyQueued));
        }

        let decision = self.advisor.decide(&job.content_id, &job.family_id).await;
        if decision.translate_now {
            return self
                .queue
                .enqueue(job.with_priority(Priority::Medium))
                .map(SubmitOutcome::Enqueued);
        }

        self.writer.flush().await;
        match self
            .store
            .job_status(&job.content_id, &job.target_language_code)
            .await
        {
            Ok(Some(status @ (JobStatus::Pending | JobStatus::InProgress))) => {
                debug!(
                    content_id = %job.content_id,
                    language = %job.target_language_code,
                    status = %status,
                    "translation deferred, persisted work kept"
                );
                return Ok(SubmitOutcome::Deferred(decision));
            }
            Ok(_) => {}
            Err(e) => warn!(
                content_id = %job.content_id,
                error = %e,
                "persisted status lookup failed"
            ),
        }

        debug!(
            content_id = %job.content_id,
            language = %job.target_language_code,
            reason = %decision.reason,
            "translation deferred"
        );
        self.writer.submit(StoreWrite::Status(StatusUpdate {
            content_id: job.content_id,
            language_code: job.target_language_code,
            status: JobStatus::NotNeeded,
            error_message: None,
        }));
        Ok(SubmitOutcome::Deferred(decision))
    }

    pub fn status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn cancel(&self, id: JobId) -> bool {
        self.queue.cancel(id)
    }

    /// Dispatch immediately instead of waiting for the next scheduler tick.
    pub fn drain(&self) -> usize {
        self.queue.drain()
    }

    pub fn record_access(&self, content_id: &str, family_id: &str, user_id: &str, language: &str) {
        self.tracker
            .record_access(content_id, family_id, user_id, language);
    }

    pub fn metrics_for(&self, family_id: &str) -> FamilyUsageMetrics {
        self.tracker.metrics_for(family_id)
    }

    pub async fn should_translate_now(&self, content_id: &str, family_id: &str) -> bool {
        self.advisor.should_translate_now(content_id, family_id).await
    }

    pub async fn decide(&self, content_id: &str, family_id: &str) -> TranslationDecision {
        self.advisor.decide(content_id, family_id).await
    }

    pub fn suggest_strategy(&self, family_id: &str) -> StrategyName {
        self.advisor.suggest_strategy(family_id)
    }

    pub async fn apply_suggested_strategy(&self, family_id: &str) -> Result<StrategyName, StoreError> {
        self.advisor.apply_suggested_strategy(family_id).await
    }

    /// Rebuild access records from the store's log (last `access_log_lookback_days`).
    pub async fn load_access_history(&self) -> Result<usize, StoreError> {
        // Include accesses still sitting in the write-behind queue.
        self.writer.flush().await;
        self.tracker
            .load_from_store(
                self.store.as_ref(),
                i64::from(self.config.access_log_lookback_days),
            )
            .await
    }

    pub fn metrics_summary(&self) -> HashMap<String, MetricSummary> {
        self.metrics.summary()
    }

    pub fn metrics_counters(&self) -> HashMap<String, u64> {
        self.metrics.counters()
    }

    /// Wait until every store write submitted so far has been applied.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    /// Spawn the scheduler loop; it stops when `shutdown` is cancelled.
    pub fn start(&self, shutdown: CancellationToken) -> SchedulerHandle {
        SchedulerLoop::new(
            &self.config,
            Arc::clone(&self.queue),
            Arc::clone(&self.cache),
            Arc::clone(&self.store),
            self.writer.clone(),
            Arc::clone(&self.metrics),
        )
        .spawn(shutdown)
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn tracker(&self) -> &Arc<AccessTracker> {
        &self.tracker
    }

    pub fn store(&self) -> &Arc<dyn PersistenceStore> {
        &self.store
    }
}
