//! Translation job types: priority, the enqueue request, and the queued job.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::EnqueueError;
use crate::store::PersistedJobRecord;

/// ISO 639 code with optional subtags, e.g. "es", "pt-BR", "zh-Hant".
static LANGUAGE_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z]{2,3}(-[A-Za-z0-9]{2,8})*$").expect("language code pattern is valid")
});

/// Scheduling weight. Ordered Low < Medium < High.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// One step lower, saturating at Low. Applied on every retry.
    pub fn lowered(self) -> Self {
        match self {
            Priority::High => Priority::Medium,
            Priority::Medium | Priority::Low => Priority::Low,
        }
    }

    /// Numeric rank used by persistent stores (higher is more urgent).
    pub fn rank(self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
        }
    }

    pub fn from_rank(rank: i64) -> Self {
        match rank {
            r if r <= 0 => Priority::Low,
            1 => Priority::Medium,
            _ => Priority::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Duplicate-suppression key: one job per content and target language.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct JobKey {
    pub content_id: String,
    pub language_code: String,
}

/// A request to translate one content item into one language.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub content_id: String,
    pub source_text: String,
    pub target_language_code: String,
    pub target_language_name: String,
    pub family_id: String,
    pub credential: String,
    pub priority: Priority,
    pub retry_count: u32,
}

impl NewJob {
    pub fn new(
        content_id: impl Into<String>,
        source_text: impl Into<String>,
        target_language_code: impl Into<String>,
        target_language_name: impl Into<String>,
        family_id: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            source_text: source_text.into(),
            target_language_code: target_language_code.into(),
            target_language_name: target_language_name.into(),
            family_id: family_id.into(),
            credential: credential.into(),
            priority: Priority::default(),
            retry_count: 0,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Resume a persisted job: its stored retry count carries over.
    pub fn from_record(record: PersistedJobRecord, fallback_credential: Option<&str>) -> Self {
        let credential = record
            .credential
            .filter(|c| !c.trim().is_empty())
            .or_else(|| fallback_credential.map(str::to_string))
            .unwrap_or_default();
        Self {
            content_id: record.content_id,
            source_text: record.source_text,
            target_language_code: record.target_language_code,
            target_language_name: record.target_language_name,
            family_id: record.family_id,
            credential,
            priority: record.priority,
            retry_count: record.retry_count,
        }
    }

    /// Input checks performed before a job may enter the queue.
    pub fn validate(&self) -> Result<(), EnqueueError> {
        if self.source_text.trim().is_empty() {
            return Err(EnqueueError::EmptySourceText);
        }
        if self.credential.trim().is_empty() {
            return Err(EnqueueError::MissingCredential);
        }
        if !LANGUAGE_CODE.is_match(&self.target_language_code) {
            return Err(EnqueueError::InvalidLanguage {
                code: self.target_language_code.clone(),
            });
        }
        if self.target_language_name.trim().is_empty() {
            return Err(EnqueueError::MissingLanguageName);
        }
        Ok(())
    }

    pub fn to_record(&self) -> PersistedJobRecord {
        PersistedJobRecord {
            content_id: self.content_id.clone(),
            source_text: self.source_text.clone(),
            target_language_code: self.target_language_code.clone(),
            target_language_name: self.target_language_name.clone(),
            family_id: self.family_id.clone(),
            credential: Some(self.credential.clone()),
            priority: self.priority,
            retry_count: self.retry_count,
        }
    }
}

/// A job owned by the queue. `source_text` never changes once enqueued.
#[derive(Debug, Clone)]
pub struct TranslationJob {
    pub id: JobId,
    pub content_id: String,
    pub source_text: String,
    pub target_language_code: String,
    pub target_language_name: String,
    pub family_id: String,
    pub credential: String,
    pub priority: Priority,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    /// Enqueue sequence number, breaks ties between equal `created_at`.
    pub(crate) seq: u64,
    /// Last entry into the pending set, for queue-wait metrics.
    pub(crate) queued_at: Instant,
}

impl TranslationJob {
    pub(crate) fn from_new(job: NewJob, created_at: DateTime<Utc>, seq: u64) -> Self {
        Self {
            id: JobId::new(),
            content_id: job.content_id,
            source_text: job.source_text,
            target_language_code: job.target_language_code,
            target_language_name: job.target_language_name,
            family_id: job.family_id,
            credential: job.credential,
            priority: job.priority,
            retry_count: job.retry_count,
            created_at,
            seq,
            queued_at: Instant::now(),
        }
    }

    pub(crate) fn key(&self) -> JobKey {
        JobKey {
            content_id: self.content_id.clone(),
            language_code: self.target_language_code.clone(),
        }
    }

    /// Snapshot for the store, reflecting the current retry count and priority.
    pub fn to_record(&self) -> PersistedJobRecord {
        PersistedJobRecord {
            content_id: self.content_id.clone(),
            source_text: self.source_text.clone(),
            target_language_code: self.target_language_code.clone(),
            target_language_name: self.target_language_name.clone(),
            family_id: self.family_id.clone(),
            credential: Some(self.credential.clone()),
            priority: self.priority,
            retry_count: self.retry_count,
        }
    }

    /// Dispatch order: priority descending, then oldest first.
    pub(crate) fn dispatch_order(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.created_at.cmp(&other.created_at))
            .then(self.seq.cmp(&other.seq))
    }
}
