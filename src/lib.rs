//! Background translation scheduling for multilingual family content.
//!
//! A priority [`queue::JobQueue`] dispatches translation jobs to a
//! [`translate::TranslationProvider`] under a concurrency bound, with
//! retry/backoff, a TTL-bound [`translate::ResultCache`] in front of the
//! provider, and a [`store::PersistenceStore`] mirror written behind the
//! queue. An [`access::AccessTracker`] feeds a [`strategy::StrategyAdvisor`]
//! that decides whether new content is translated now or on demand.
//! [`TranslationRuntime`] wires everything together.

pub mod access;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod strategy;
pub mod telemetry;
pub mod translate;

pub use access::{AccessTracker, ContentAccessRecord, FamilyUsageMetrics, UsagePattern};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigLoader, SchedulerConfig};
pub use error::{ConfigError, EnqueueError, StartupError, StoreError, TranslateError};
pub use metrics::{MetricSummary, MetricsRegistry};
pub use queue::{
    backoff_delay, EnqueueOutcome, JobId, JobQueue, NewJob, Priority, QueueConfig, QueueStatus,
    TranslationJob,
};
pub use runtime::{SubmitOutcome, TranslationRuntime};
pub use scheduler::{SchedulerHandle, SchedulerLoop, TickReport};
pub use store::{
    AccessLogRow, InMemoryStore, JobStatus, PersistedJobRecord, PersistenceStore, SqliteStore,
    StatusUpdate, StoreWrite, StoreWriter, StrategyName,
};
pub use strategy::{recommended_strategy, StrategyAdvisor, TranslationDecision};
pub use telemetry::init_tracing;
pub use translate::{
    validate_translation, HttpTranslationProvider, ResultCache, StubProvider, TranslationProvider,
    ValidationWarning,
};
