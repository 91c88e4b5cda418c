//! Translation provider boundary, result validation and the result cache.

pub mod cache;
pub mod http;
pub mod validate;

use async_trait::async_trait;

use crate::error::TranslateError;

pub use cache::ResultCache;
pub use http::HttpTranslationProvider;
pub use validate::{validate_translation, ValidationWarning};

/// Translator adapter. One call per job attempt; the queue owns retries.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        target_language_name: &str,
        credential: &str,
    ) -> Result<String, TranslateError>;
}

/// Provider that echoes the source text with a language tag.
/// Stand-in when no endpoint is configured.
pub struct StubProvider;

#[async_trait]
impl TranslationProvider for StubProvider {
    async fn translate(
        &self,
        text: &str,
        target_language_name: &str,
        _credential: &str,
    ) -> Result<String, TranslateError> {
        Ok(format!("[{target_language_name}] {text}"))
    }
}
