//! In-memory persistence store for tests and embedders without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{
    AccessLogRow, JobStatus, PersistedJobRecord, PersistenceStore, StatusUpdate, StrategyName,
};
use crate::error::StoreError;

type JobKey = (String, String);

/// Per (content, language) row mirrored from the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredJob {
    pub status: JobStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub translated_text: Option<String>,
    pub record: Option<PersistedJobRecord>,
    /// Every status written, in order.
    pub history: Vec<JobStatus>,
    /// When the row last (re)entered Pending; FIFO tiebreak within a priority.
    queued_seq: u64,
}

impl StoredJob {
    fn new(status: JobStatus) -> Self {
        Self {
            status,
            retry_count: 0,
            error_message: None,
            translated_text: None,
            record: None,
            history: vec![status],
            queued_seq: 0,
        }
    }

    fn set_status(&mut self, status: JobStatus) {
        if self.status != status {
            self.status = status;
            self.history.push(status);
        }
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    jobs: Mutex<HashMap<JobKey, StoredJob>>,
    access_log: Mutex<Vec<AccessLogRow>>,
    strategies: Mutex<HashMap<String, StrategyName>>,
    next_seq: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job(&self, content_id: &str, language_code: &str) -> Option<StoredJob> {
        self.jobs
            .lock()
            .get(&(content_id.to_string(), language_code.to_string()))
            .cloned()
    }

    pub fn status_of(&self, content_id: &str, language_code: &str) -> Option<JobStatus> {
        self.job(content_id, language_code).map(|j| j.status)
    }

    pub fn access_log(&self) -> Vec<AccessLogRow> {
        self.access_log.lock().clone()
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
    async fn update_status(&self, update: StatusUpdate) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock();
        let key = (update.content_id, update.language_code);
        match jobs.get_mut(&key) {
            Some(job) => {
                if !job.status.can_transition_to(update.status) {
                    return Err(StoreError::InvalidTransition {
                        from: job.status,
                        to: update.status,
                    });
                }
                job.status = update.status;
                job.history.push(update.status);
                job.error_message = update.error_message;
            }
            None => {
                let mut job = StoredJob::new(update.status);
                job.error_message = update.error_message;
                jobs.insert(key, job);
            }
        }
        Ok(())
    }

    async fn update_retry_count(
        &self,
        content_id: &str,
        language_code: &str,
        count: u32,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(&(content_id.to_string(), language_code.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                content_id: content_id.to_string(),
                language: language_code.to_string(),
            })?;
        job.retry_count = count;
        if let Some(record) = job.record.as_mut() {
            record.retry_count = count;
        }
        Ok(())
    }

    async fn write_translation_result(
        &self,
        content_id: &str,
        translated_text: &str,
        language_code: &str,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock();
        jobs.entry((content_id.to_string(), language_code.to_string()))
            .or_insert_with(|| StoredJob::new(JobStatus::InProgress))
            .translated_text = Some(translated_text.to_string());
        Ok(())
    }

    async fn insert_pending_job(&self, record: PersistedJobRecord) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock();
        let key = (record.content_id.clone(), record.target_language_code.clone());
        let job = jobs
            .entry(key)
            .or_insert_with(|| StoredJob::new(JobStatus::Pending));
        if !job.status.can_transition_to(JobStatus::Pending) {
            return Err(StoreError::InvalidTransition {
                from: job.status,
                to: JobStatus::Pending,
            });
        }
        job.set_status(JobStatus::Pending);
        job.error_message = None;
        job.retry_count = record.retry_count;
        job.record = Some(record);
        job.queued_seq = self.next_seq();
        Ok(())
    }

    async fn query_pending_jobs(
        &self,
        limit: usize,
    ) -> Result<Vec<PersistedJobRecord>, StoreError> {
        let jobs = self.jobs.lock();
        let mut pending: Vec<(u64, PersistedJobRecord)> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .filter_map(|j| j.record.clone().map(|r| (j.queued_seq, r)))
            .collect();
        pending.sort_by(|(a_seq, a), (b_seq, b)| {
            b.priority.cmp(&a.priority).then(a_seq.cmp(b_seq))
        });
        Ok(pending
            .into_iter()
            .take(limit)
            .map(|(_, record)| record)
            .collect())
    }

    async fn job_status(
        &self,
        content_id: &str,
        language_code: &str,
    ) -> Result<Option<JobStatus>, StoreError> {
        Ok(self.status_of(content_id, language_code))
    }

    async fn recover_interrupted_jobs(&self, max_retries: u32) -> Result<usize, StoreError> {
        let mut jobs = self.jobs.lock();
        let mut recovered = 0;
        for job in jobs.values_mut() {
            let Some(record) = job.record.as_mut() else {
                continue;
            };
            match job.status {
                JobStatus::InProgress => {}
                JobStatus::Failed if job.retry_count < max_retries => {
                    job.retry_count += 1;
                    record.retry_count = job.retry_count;
                    record.priority = record.priority.lowered();
                }
                _ => continue,
            }
            job.set_status(JobStatus::Pending);
            job.error_message = None;
            job.queued_seq = self.next_seq();
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn append_access_log(&self, row: AccessLogRow) -> Result<(), StoreError> {
        self.access_log.lock().push(row);
        Ok(())
    }

    async fn query_access_logs(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AccessLogRow>, StoreError> {
        Ok(self
            .access_log
            .lock()
            .iter()
            .filter(|row| row.accessed_at >= since)
            .cloned()
            .collect())
    }

    async fn get_family_strategy(&self, family_id: &str) -> Result<StrategyName, StoreError> {
        Ok(self
            .strategies
            .lock()
            .get(family_id)
            .copied()
            .unwrap_or_default())
    }

    async fn set_family_strategy(
        &self,
        family_id: &str,
        strategy: StrategyName,
    ) -> Result<(), StoreError> {
        self.strategies
            .lock()
            .insert(family_id.to_string(), strategy);
        Ok(())
    }
}
