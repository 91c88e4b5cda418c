//! Persistence Store boundary: job status mirror, translation results,
//! content-access log and per-family strategy.
//!
//! The in-memory queue state is authoritative; the store is a durable mirror
//! written behind the queue through [`writer::StoreWriter`].

pub mod memory;
pub mod sqlite;
pub mod writer;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::queue::job::Priority;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use writer::{StoreWrite, StoreWriter};

/// Externally visible lifecycle of a (content, language) translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    NotNeeded,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::NotNeeded => "not_needed",
        }
    }

    /// Returns whether moving from `self` to `next` is a legal transition.
    /// Writing the current status again is always allowed.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, InProgress)
                    | (Pending, Completed)
                    | (Pending, NotNeeded)
                    | (Pending, Failed)
                    | (InProgress, Completed)
                    | (InProgress, Failed)
                    | (InProgress, Pending) // attempt interrupted by a restart
                    | (InProgress, NotNeeded) // cancelled in flight
                    | (Failed, Pending) // scheduled retry
                    | (Failed, NotNeeded) // cancelled while backing off
                    | (NotNeeded, Pending) // on-demand request
                    | (Completed, Pending) // explicit re-translation
            )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "not_needed" => Ok(JobStatus::NotNeeded),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Family-level translation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyName {
    Immediate,
    OnDemand,
    #[default]
    Hybrid,
}

impl StrategyName {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyName::Immediate => "immediate",
            StrategyName::OnDemand => "on_demand",
            StrategyName::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(StrategyName::Immediate),
            "on_demand" => Ok(StrategyName::OnDemand),
            "hybrid" => Ok(StrategyName::Hybrid),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// A persisted unit of pending work, as returned by `query_pending_jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedJobRecord {
    pub content_id: String,
    pub source_text: String,
    pub target_language_code: String,
    pub target_language_name: String,
    pub family_id: String,
    pub credential: Option<String>,
    pub priority: Priority,
    pub retry_count: u32,
}

/// One row of the content-access log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogRow {
    pub content_id: String,
    pub family_id: String,
    pub user_id: String,
    pub language: String,
    pub accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub content_id: String,
    pub language_code: String,
    pub status: JobStatus,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Record a status change. Implementations reject illegal transitions.
    async fn update_status(&self, update: StatusUpdate) -> Result<(), StoreError>;

    async fn update_retry_count(
        &self,
        content_id: &str,
        language_code: &str,
        count: u32,
    ) -> Result<(), StoreError>;

    /// Persisted status of a pair, `None` if it was never written.
    async fn job_status(
        &self,
        content_id: &str,
        language_code: &str,
    ) -> Result<Option<JobStatus>, StoreError>;

    async fn write_translation_result(
        &self,
        content_id: &str,
        translated_text: &str,
        language_code: &str,
    ) -> Result<(), StoreError>;

    /// Register work to be picked up by the scheduler's refill pass.
    async fn insert_pending_job(&self, record: PersistedJobRecord) -> Result<(), StoreError>;

    /// Pending jobs, highest priority first, at most `limit`.
    async fn query_pending_jobs(&self, limit: usize)
        -> Result<Vec<PersistedJobRecord>, StoreError>;

    /// Return work stranded by a previous process to Pending. Rows left
    /// InProgress are retried as they were; Failed rows still inside the
    /// retry budget are charged one retry and lowered one priority step, as
    /// the in-process backoff would have done. Returns the number recovered.
    async fn recover_interrupted_jobs(&self, max_retries: u32) -> Result<usize, StoreError>;

    async fn append_access_log(&self, row: AccessLogRow) -> Result<(), StoreError>;

    async fn query_access_logs(&self, since: DateTime<Utc>)
        -> Result<Vec<AccessLogRow>, StoreError>;

    /// Families without a stored value get [`StrategyName::default`].
    async fn get_family_strategy(&self, family_id: &str) -> Result<StrategyName, StoreError>;

    async fn set_family_strategy(
        &self,
        family_id: &str,
        strategy: StrategyName,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic_except_retry_paths() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(Failed.can_transition_to(NotNeeded));
        assert!(NotNeeded.can_transition_to(Pending));
        assert!(Completed.can_transition_to(Completed));

        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!NotNeeded.can_transition_to(InProgress));
    }

    #[test]
    fn names_round_trip_through_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::NotNeeded,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert_eq!("on_demand".parse::<StrategyName>(), Ok(StrategyName::OnDemand));
        assert!("sometimes".parse::<StrategyName>().is_err());
        assert_eq!(StrategyName::default(), StrategyName::Hybrid);
    }
}
