//! Priority job queue with a bounded-concurrency dispatcher.
//!
//! Pending jobs are kept sorted by (priority desc, created_at asc). `drain`
//! moves jobs into the active set until `max_concurrent` is reached and spawns
//! one dispatch task per job. Failed attempts sleep off the active set and
//! re-enter pending with a lowered priority; the scheduler tick picks them up.
//! While a job sleeps its persisted status is Failed, so a restart can find
//! it (see [`crate::store::PersistenceStore::recover_interrupted_jobs`]).
//!
//! Every store write is submitted while the state lock is held, so the
//! persisted status sequence follows the in-memory transitions exactly.

pub mod job;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::{EnqueueError, TranslateError};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::store::{JobStatus, StatusUpdate, StoreWrite, StoreWriter};
use crate::translate::{validate_translation, ResultCache, TranslationProvider};

pub use job::{JobId, NewJob, Priority, TranslationJob};
use job::JobKey;

/// Dispatcher limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl QueueConfig {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            max_retries: config.max_retries,
            base_backoff: Duration::from_secs(config.base_backoff_seconds),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// Delay before the next attempt, given how many retries were already spent:
/// `base * 2^prior_retries` (5s, 10s, 20s with the default base).
pub fn backoff_delay(base: Duration, prior_retries: u32) -> Duration {
    base.saturating_mul(1u32 << prior_retries.min(16))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued(JobId),
    /// A job for the same content and language is already pending, active or backing off.
    AlreadyQueued,
}

/// Point-in-time counters. Each field is consistent on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub active: usize,
    /// Jobs sleeping between attempts.
    pub retrying: usize,
    pub completed: u64,
    pub failed: u64,
    pub validation_warnings: u64,
}

struct ActiveJob {
    key: JobKey,
    cancel: CancellationToken,
}

struct BackoffJob {
    key: JobKey,
    timer: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<TranslationJob>,
    active: HashMap<JobId, ActiveJob>,
    backoff: HashMap<JobId, BackoffJob>,
    /// Owner of each (content, language) pair currently tracked.
    keys: HashMap<JobKey, JobId>,
    completed: u64,
    failed: u64,
    validation_warnings: u64,
    next_seq: u64,
}

impl QueueState {
    fn insert_pending(&mut self, job: TranslationJob) {
        let pos = self
            .pending
            .partition_point(|queued| queued.dispatch_order(&job).is_lt());
        self.pending.insert(pos, job);
    }

    /// Drop the duplicate-suppression key, unless a newer job already owns it.
    fn release_key(&mut self, key: &JobKey, id: JobId) {
        if self.keys.get(key) == Some(&id) {
            self.keys.remove(key);
        }
    }
}

pub struct JobQueue {
    state: RwLock<QueueState>,
    config: QueueConfig,
    cache: Arc<ResultCache>,
    provider: Arc<dyn TranslationProvider>,
    writer: StoreWriter,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
}

impl JobQueue {
    pub fn new(
        config: QueueConfig,
        cache: Arc<ResultCache>,
        provider: Arc<dyn TranslationProvider>,
        writer: StoreWriter,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            state: RwLock::new(QueueState::default()),
            config,
            cache,
            provider,
            writer,
            clock,
            metrics,
        }
    }

    pub fn config(&self) -> QueueConfig {
        self.config
    }

    /// Validate and insert a job. Does not dispatch; see [`JobQueue::drain`].
    pub fn enqueue(&self, job: NewJob) -> Result<EnqueueOutcome, EnqueueError> {
        job.validate()?;

        let created_at = self.clock.now();
        let mut state = self.state.write();
        let key = JobKey {
            content_id: job.content_id.clone(),
            language_code: job.target_language_code.clone(),
        };
        if state.keys.contains_key(&key) {
            debug!(
                content_id = %key.content_id,
                language = %key.language_code,
                "duplicate enqueue ignored"
            );
            return Ok(EnqueueOutcome::AlreadyQueued);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let job = TranslationJob::from_new(job, created_at, seq);
        let id = job.id;
        info!(
            job_id = %id,
            content_id = %job.content_id,
            language = %job.target_language_code,
            priority = ?job.priority,
            retry_count = job.retry_count,
            "job enqueued"
        );
        self.writer.submit(StoreWrite::PendingJob(job.to_record()));
        state.keys.insert(key, id);
        state.insert_pending(job);
        Ok(EnqueueOutcome::Queued(id))
    }

    /// Dispatch pending jobs until the concurrency ceiling or an empty
    /// pending set. Returns how many jobs were started.
    pub fn drain(self: &Arc<Self>) -> usize {
        let mut started = Vec::new();
        {
            let mut state = self.state.write();
            while state.active.len() < self.config.max_concurrent {
                let Some(job) = state.pending.pop_front() else {
                    break;
                };
                let cancel = CancellationToken::new();
                state.active.insert(
                    job.id,
                    ActiveJob {
                        key: job.key(),
                        cancel: cancel.clone(),
                    },
                );
                self.submit_status(&job.content_id, &job.target_language_code, JobStatus::InProgress, None);
                started.push((job, cancel));
            }
        }

        let count = started.len();
        for (job, cancel) in started {
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.dispatch(job, cancel).await });
        }
        if count > 0 {
            debug!(started = count, "queue drained");
        }
        count
    }

    async fn dispatch(self: Arc<Self>, job: TranslationJob, cancel: CancellationToken) {
        self.metrics.record(
            metric_names::QUEUE_WAIT,
            job.queued_at.elapsed().as_secs_f64() * 1000.0,
        );
        let total = self.metrics.span(metric_names::DISPATCH_TOTAL);
        let cache_key = ResultCache::key(&job.source_text, &job.target_language_name);

        let outcome = match self.cache.get(&cache_key) {
            Some(cached) => {
                self.metrics.increment(metric_names::CACHE_HIT);
                debug!(job_id = %job.id, content_id = %job.content_id, "cache hit, skipping provider");
                Ok(cached)
            }
            None => {
                self.metrics.increment(metric_names::CACHE_MISS);
                let call = self.metrics.span(metric_names::PROVIDER_CALL);
                let result = self
                    .provider
                    .translate(&job.source_text, &job.target_language_name, &job.credential)
                    .await;
                call.finish();
                if let Ok(translated) = &result {
                    if !cancel.is_cancelled() {
                        self.check_translation(&job, translated);
                        self.cache.set(cache_key, translated.clone());
                    }
                }
                result
            }
        };

        match outcome {
            Ok(translated) => self.complete(&job, translated, &cancel),
            Err(e) => self.fail(job, e, &cancel),
        }
        total.finish();
        self.drain();
    }

    /// Advisory only: a suspect translation is still accepted.
    fn check_translation(&self, job: &TranslationJob, translated: &str) {
        let warnings = validate_translation(&job.source_text, translated);
        if warnings.is_empty() {
            return;
        }
        self.state.write().validation_warnings += 1;
        let reasons: Vec<String> = warnings.iter().map(ToString::to_string).collect();
        warn!(
            job_id = %job.id,
            content_id = %job.content_id,
            language = %job.target_language_code,
            warnings = ?reasons,
            "suspect translation accepted"
        );
    }

    fn complete(&self, job: &TranslationJob, translated: String, cancel: &CancellationToken) {
        let mut state = self.state.write();
        let Some(active) = state.active.remove(&job.id) else {
            return;
        };
        state.release_key(&active.key, job.id);
        if cancel.is_cancelled() {
            info!(job_id = %job.id, content_id = %job.content_id, "cancelled job finished, result discarded");
            return;
        }
        state.completed += 1;
        self.writer.submit(StoreWrite::TranslationResult {
            content_id: job.content_id.clone(),
            language_code: job.target_language_code.clone(),
            translated_text: translated,
        });
        self.submit_status(&job.content_id, &job.target_language_code, JobStatus::Completed, None);
        info!(
            job_id = %job.id,
            content_id = %job.content_id,
            language = %job.target_language_code,
            retry_count = job.retry_count,
            "job completed"
        );
    }

    fn fail(self: &Arc<Self>, mut job: TranslationJob, err: TranslateError, cancel: &CancellationToken) {
        let mut state = self.state.write();
        let Some(active) = state.active.remove(&job.id) else {
            return;
        };
        if cancel.is_cancelled() {
            state.release_key(&active.key, job.id);
            info!(job_id = %job.id, error = %err, "cancelled job failed, not retrying");
            return;
        }

        if job.retry_count >= self.config.max_retries {
            state.release_key(&active.key, job.id);
            state.failed += 1;
            self.submit_status(
                &job.content_id,
                &job.target_language_code,
                JobStatus::Failed,
                Some(err.to_string()),
            );
            error!(
                job_id = %job.id,
                content_id = %job.content_id,
                language = %job.target_language_code,
                retry_count = job.retry_count,
                error = %err,
                "job failed permanently"
            );
            return;
        }

        let delay = backoff_delay(self.config.base_backoff, job.retry_count);
        job.retry_count += 1;
        job.priority = job.priority.lowered();
        let timer = CancellationToken::new();
        state.backoff.insert(
            job.id,
            BackoffJob {
                key: active.key,
                timer: timer.clone(),
            },
        );
        // The stored retry count moves when the job re-enters pending.
        self.submit_status(
            &job.content_id,
            &job.target_language_code,
            JobStatus::Failed,
            Some(err.to_string()),
        );
        drop(state);

        warn!(
            job_id = %job.id,
            content_id = %job.content_id,
            language = %job.target_language_code,
            retry_count = job.retry_count,
            delay_secs = delay.as_secs(),
            error = %err,
            "translation attempt failed, retry scheduled"
        );

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => queue.requeue(job),
                _ = timer.cancelled() => debug!(job_id = %job.id, "backoff cancelled"),
            }
        });
    }

    /// Back into pending after a backoff sleep. No-op if the job was cancelled meanwhile.
    fn requeue(&self, mut job: TranslationJob) {
        let mut state = self.state.write();
        if state.backoff.remove(&job.id).is_none() {
            return;
        }
        job.queued_at = tokio::time::Instant::now();
        self.writer.submit(StoreWrite::PendingJob(job.to_record()));
        debug!(
            job_id = %job.id,
            content_id = %job.content_id,
            priority = ?job.priority,
            retry_count = job.retry_count,
            "job re-entered pending"
        );
        state.insert_pending(job);
    }

    /// Best-effort cancellation. Pending and backing-off jobs are dropped; an
    /// in-flight call is allowed to finish but its result is discarded.
    /// Returns `false` if the job is unknown or already cancelled.
    pub fn cancel(&self, id: JobId) -> bool {
        let mut state = self.state.write();

        if let Some(pos) = state.pending.iter().position(|j| j.id == id) {
            if let Some(job) = state.pending.remove(pos) {
                state.release_key(&job.key(), id);
                self.submit_status(&job.content_id, &job.target_language_code, JobStatus::NotNeeded, None);
                info!(job_id = %id, content_id = %job.content_id, "pending job cancelled");
                return true;
            }
        }

        if let Some(backoff) = state.backoff.remove(&id) {
            backoff.timer.cancel();
            state.release_key(&backoff.key, id);
            self.submit_status(
                &backoff.key.content_id,
                &backoff.key.language_code,
                JobStatus::NotNeeded,
                None,
            );
            info!(job_id = %id, content_id = %backoff.key.content_id, "backing-off job cancelled");
            return true;
        }

        let key = match state.active.get(&id) {
            Some(active) if !active.cancel.is_cancelled() => {
                active.cancel.cancel();
                active.key.clone()
            }
            _ => return false,
        };
        // The slot stays occupied until the provider call returns.
        state.release_key(&key, id);
        self.submit_status(&key.content_id, &key.language_code, JobStatus::NotNeeded, None);
        info!(job_id = %id, content_id = %key.content_id, "in-flight job cancelled");
        true
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.state.read();
        QueueStatus {
            pending: state.pending.len(),
            active: state.active.len(),
            retrying: state.backoff.len(),
            completed: state.completed,
            failed: state.failed,
            validation_warnings: state.validation_warnings,
        }
    }

    /// Whether a job for this content and language is currently tracked.
    pub fn contains(&self, content_id: &str, language_code: &str) -> bool {
        self.state.read().keys.contains_key(&JobKey {
            content_id: content_id.to_string(),
            language_code: language_code.to_string(),
        })
    }

    /// Pending jobs in dispatch order.
    pub fn pending_jobs(&self) -> Vec<TranslationJob> {
        self.state.read().pending.iter().cloned().collect()
    }

    fn submit_status(
        &self,
        content_id: &str,
        language_code: &str,
        status: JobStatus,
        error_message: Option<String>,
    ) {
        self.writer.submit(StoreWrite::Status(StatusUpdate {
            content_id: content_id.to_string(),
            language_code: language_code.to_string(),
            status,
            error_message,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;
    use crate::translate::StubProvider;

    #[test]
    fn backoff_doubles_from_base() {
        let base = Duration::from_secs(5);
        let delays: Vec<u64> = (0..3).map(|n| backoff_delay(base, n).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20]);
        assert_eq!(backoff_delay(base, 40), base * (1 << 16));
    }

    #[test]
    fn queue_config_follows_scheduler_config() {
        let config = QueueConfig::default();
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_backoff, Duration::from_secs(5));
    }

    fn queue() -> (JobQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(ResultCache::new(
            100,
            10,
            chrono::Duration::hours(24),
            clock.clone(),
        ));
        let store = Arc::new(InMemoryStore::new());
        let queue = JobQueue::new(
            QueueConfig::default(),
            cache,
            Arc::new(StubProvider),
            StoreWriter::spawn(store),
            clock.clone(),
            Arc::new(MetricsRegistry::new()),
        );
        (queue, clock)
    }

    fn new_job(content: &str, priority: Priority) -> NewJob {
        NewJob::new(content, "hello", "es", "Spanish", "fam", "key").with_priority(priority)
    }

    #[tokio::test]
    async fn pending_set_is_kept_in_dispatch_order() {
        let (queue, clock) = queue();
        queue.enqueue(new_job("a", Priority::Low)).unwrap();
        clock.advance(chrono::Duration::seconds(1));
        queue.enqueue(new_job("b", Priority::High)).unwrap();
        clock.advance(chrono::Duration::seconds(1));
        queue.enqueue(new_job("c", Priority::Medium)).unwrap();
        queue.enqueue(new_job("d", Priority::Medium)).unwrap();

        let order: Vec<String> = queue
            .pending_jobs()
            .into_iter()
            .map(|j| j.content_id)
            .collect();
        assert_eq!(order, vec!["b", "c", "d", "a"]);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (queue, _) = queue();
        let EnqueueOutcome::Queued(id) = queue.enqueue(new_job("a", Priority::Medium)).unwrap()
        else {
            panic!("expected a fresh job");
        };
        assert!(queue.contains("a", "es"));
        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(!queue.contains("a", "es"));
        assert_eq!(queue.status().pending, 0);
    }
}
