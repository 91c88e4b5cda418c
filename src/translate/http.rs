//! HTTP translation provider.
//! Connection pooling via reqwest, simple min-interval rate limiting.
//! No retries here: every failure goes back to the queue's backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::TranslationProvider;
use crate::config::SchedulerConfig;
use crate::error::TranslateError;

pub struct HttpTranslationProvider {
    http: reqwest::Client,
    endpoint: String,
    /// Simple token-bucket: tracks the next allowed request time.
    next_allowed: Arc<tokio::sync::Mutex<Instant>>,
    min_interval: Duration,
}

impl HttpTranslationProvider {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        min_interval: Duration,
    ) -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(timeout)
            .build()
            .map_err(|e| TranslateError::Network(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            next_allowed: Arc::new(tokio::sync::Mutex::new(Instant::now())),
            min_interval,
        })
    }

    /// Build from config. Returns `None` when no endpoint is configured.
    pub fn from_config(config: &SchedulerConfig) -> Result<Option<Self>, TranslateError> {
        let Some(endpoint) = config.provider_endpoint.as_deref() else {
            return Ok(None);
        };
        Self::new(
            endpoint,
            Duration::from_secs(config.provider_timeout_seconds),
            Duration::from_millis(config.provider_min_interval_ms),
        )
        .map(Some)
    }

    /// Wait until the rate limiter allows a request.
    async fn rate_limit_wait(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.min_interval;
    }
}

#[derive(Deserialize)]
struct TranslateResponse {
    translated_text: String,
}

#[async_trait]
impl TranslationProvider for HttpTranslationProvider {
    async fn translate(
        &self,
        text: &str,
        target_language_name: &str,
        credential: &str,
    ) -> Result<String, TranslateError> {
        self.rate_limit_wait().await;

        let start = Instant::now();
        let body = serde_json::json!({
            "text": text,
            "target_language": target_language_name,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranslateError::Timeout
                } else {
                    TranslateError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(0);
            warn!(retry_after_ms, "provider rate limited");
            return Err(TranslateError::RateLimited { retry_after_ms });
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(TranslateError::Api(format!(
                "unexpected status {}: {}",
                status,
                body_text.chars().take(200).collect::<String>()
            )));
        }

        let parsed: TranslateResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::MalformedResponse(e.to_string()))?;

        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = parsed.translated_text.chars().count(),
            "provider call finished"
        );
        Ok(parsed.translated_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_endpoint_means_no_provider() {
        let config = SchedulerConfig::default();
        assert!(HttpTranslationProvider::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn configured_endpoint_builds_client() {
        let config = SchedulerConfig {
            provider_endpoint: Some("http://127.0.0.1:9/translate".into()),
            ..SchedulerConfig::default()
        };
        assert!(HttpTranslationProvider::from_config(&config).unwrap().is_some());
    }
}
