//! Error taxonomy: input validation, provider, persistence, configuration.
//! Cache lookups have no error type; a miss is just `None`.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::JobStatus;

/// Rejected at enqueue time. Never retried, never queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("source text is empty")]
    EmptySourceText,
    #[error("no credential supplied for translation")]
    MissingCredential,
    #[error("invalid target language code '{code}'")]
    InvalidLanguage { code: String },
    #[error("target language display name is empty")]
    MissingLanguageName,
}

/// Failure reported by the translation provider. The queue retries all of these.
#[derive(Debug, Clone, Error)]
pub enum TranslateError {
    #[error("API error: {0}")]
    Api(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("translation timeout")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Persistence failures. Logged by callers, never surfaced through enqueue/drain.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
    #[error("no record for content {content_id} ({language})")]
    NotFound { content_id: String, language: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },
    #[error("cache eviction batch {batch} exceeds cache capacity {capacity}")]
    EvictionBatchTooLarge { batch: usize, capacity: usize },
    #[error("unknown log format '{0}', expected 'pretty' or 'json'")]
    UnknownLogFormat(String),
}

/// Failure to assemble a [`crate::TranslationRuntime`] from configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),
    #[error("failed to build translation provider: {0}")]
    Provider(#[from] TranslateError),
}
