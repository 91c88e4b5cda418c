//! Periodic driver: refill the queue from persisted pending work, drain it,
//! and sweep expired cache entries. Runs as one Tokio task until its
//! cancellation token fires. Work stranded by a previous process is
//! returned to pending once, before the first tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::queue::{EnqueueOutcome, JobQueue, NewJob};
use crate::store::{JobStatus, PersistenceStore, StatusUpdate, StoreWrite, StoreWriter};
use crate::translate::ResultCache;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub refilled: usize,
    pub dispatched: usize,
}

pub struct SchedulerLoop {
    queue: Arc<JobQueue>,
    cache: Arc<ResultCache>,
    store: Arc<dyn PersistenceStore>,
    writer: StoreWriter,
    metrics: Arc<MetricsRegistry>,
    tick_interval: Duration,
    cleanup_interval: Duration,
    refill_batch_size: usize,
    fallback_credential: Option<String>,
}

impl SchedulerLoop {
    pub fn new(
        config: &SchedulerConfig,
        queue: Arc<JobQueue>,
        cache: Arc<ResultCache>,
        store: Arc<dyn PersistenceStore>,
        writer: StoreWriter,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            queue,
            cache,
            store,
            writer,
            metrics,
            tick_interval: config.tick_interval(),
            cleanup_interval: config.cache_cleanup_interval(),
            refill_batch_size: config.refill_batch_size,
            fallback_credential: config.provider_api_key.clone(),
        }
    }

    /// Return jobs left InProgress or backing off by a previous process to
    /// Pending. Returns the number recovered.
    pub async fn recover(&self) -> usize {
        self.writer.flush().await;
        let max_retries = self.queue.config().max_retries;
        match self.store.recover_interrupted_jobs(max_retries).await {
            Ok(recovered) => {
                if recovered > 0 {
                    info!(recovered, "interrupted jobs returned to pending");
                }
                recovered
            }
            Err(e) => {
                warn!(error = %e, "interrupted job recovery failed");
                0
            }
        }
    }

    /// Pull persisted pending jobs into the queue. Records that fail input
    /// validation are marked Failed with their retries spent, so they are
    /// never picked up again. Returns the number newly queued.
    pub async fn refill(&self) -> usize {
        // The store must reflect every transition already made in memory.
        self.writer.flush().await;

        let records = match self.store.query_pending_jobs(self.refill_batch_size).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "pending job query failed, skipping refill");
                return 0;
            }
        };

        let mut queued = 0;
        for record in records {
            let content_id = record.content_id.clone();
            let language = record.target_language_code.clone();
            let job = NewJob::from_record(record, self.fallback_credential.as_deref());
            match self.queue.enqueue(job) {
                Ok(EnqueueOutcome::Queued(_)) => queued += 1,
                Ok(EnqueueOutcome::AlreadyQueued) => {}
                Err(e) => {
                    warn!(
                        content_id = %content_id,
                        language = %language,
                        error = %e,
                        "persisted job rejected"
                    );
                    self.writer.submit(StoreWrite::RetryCount {
                        content_id: content_id.clone(),
                        language_code: language.clone(),
                        count: self.queue.config().max_retries,
                    });
                    self.writer.submit(StoreWrite::Status(StatusUpdate {
                        content_id,
                        language_code: language,
                        status: JobStatus::Failed,
                        error_message: Some(e.to_string()),
                    }));
                }
            }
        }
        queued
    }

    /// One scheduling pass: refill, then drain up to the concurrency limit.
    pub async fn tick(&self) -> TickReport {
        let span = self.metrics.span(metric_names::SCHEDULER_TICK);
        let refilled = self.refill().await;
        let dispatched = self.queue.drain();
        span.finish();
        if refilled > 0 || dispatched > 0 {
            debug!(refilled, dispatched, "scheduler tick");
        }
        TickReport {
            refilled,
            dispatched,
        }
    }

    /// Run until `shutdown` is cancelled. The first tick fires immediately
    /// after recovery; the first cache sweep fires after one cleanup interval.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            tick_secs = self.tick_interval.as_secs(),
            cleanup_secs = self.cleanup_interval.as_secs(),
            "scheduler loop started"
        );
        self.recover().await;
        let mut tick = time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup = time::interval_at(
            Instant::now() + self.cleanup_interval,
            self.cleanup_interval,
        );
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    self.tick().await;
                }
                _ = cleanup.tick() => {
                    let removed = self.cache.cleanup();
                    debug!(removed, remaining = self.cache.len(), "cache sweep");
                }
            }
        }

        self.writer.flush().await;
        info!(status = ?self.queue.status(), "scheduler loop stopped");
    }

    /// Spawn [`SchedulerLoop::run`] on the current runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> SchedulerHandle {
        let task = tokio::spawn(self.run(shutdown.clone()));
        SchedulerHandle { shutdown, task }
    }
}

pub struct SchedulerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Ask the loop to stop after its current pass.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit (and its final flush to complete).
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }
}
