//! Configuration loading.
//!
//! Layers `.env`, `.env.local` and the process environment (`TRANSLATION_*`
//! variables, process env wins) into a typed [`SchedulerConfig`].

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const ENV_PREFIX: &str = "TRANSLATION_";

/// Every tunable of the queue, cache, tracker, scheduler and provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrent provider calls allowed by the dispatcher.
    pub max_concurrent: usize,
    /// Failures tolerated before a job is marked Failed.
    pub max_retries: u32,
    /// Backoff for retry n is `2^n * base_backoff_seconds`.
    pub base_backoff_seconds: u64,
    pub tick_interval_seconds: u64,
    pub cache_capacity: usize,
    pub cache_eviction_batch: usize,
    pub cache_ttl_seconds: u64,
    pub cache_cleanup_interval_seconds: u64,
    /// Persisted pending jobs pulled into memory per tick.
    pub refill_batch_size: usize,
    pub access_log_lookback_days: u32,
    pub log_level: String,
    /// "pretty" or "json".
    pub log_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_endpoint: Option<String>,
    /// Fallback credential for persisted jobs that do not carry one.
    #[serde(default, skip_serializing)]
    pub provider_api_key: Option<String>,
    pub provider_timeout_seconds: u64,
    pub provider_min_interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 3,
            base_backoff_seconds: 5,
            tick_interval_seconds: 30,
            cache_capacity: 100,
            cache_eviction_batch: 10,
            cache_ttl_seconds: 24 * 3600,
            cache_cleanup_interval_seconds: 3600,
            refill_batch_size: 50,
            access_log_lookback_days: 30,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            provider_endpoint: None,
            provider_api_key: None,
            provider_timeout_seconds: 30,
            provider_min_interval_ms: 100,
            database_path: None,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    pub fn cache_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cache_cleanup_interval_seconds)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl_seconds as i64)
    }

    /// Reject values the queue, cache or scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive: [(&'static str, u64); 5] = [
            ("max_concurrent", self.max_concurrent as u64),
            ("tick_interval_seconds", self.tick_interval_seconds),
            ("cache_capacity", self.cache_capacity as u64),
            ("cache_cleanup_interval_seconds", self.cache_cleanup_interval_seconds),
            ("refill_batch_size", self.refill_batch_size as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::MustBePositive { field });
            }
        }

        if self.cache_eviction_batch > self.cache_capacity {
            return Err(ConfigError::EvictionBatchTooLarge {
                batch: self.cache_eviction_batch,
                capacity: self.cache_capacity,
            });
        }

        match self.log_format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::UnknownLogFormat(other.to_string())),
        }
    }
}

/// Loads configuration from layered `.env` files and `TRANSLATION_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Loader rooted at `base_dir` (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<SchedulerConfig, ConfigError> {
        let mut layered = BTreeMap::new();
        self.merge_dotenv(self.base_dir.join(".env"), &mut layered)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut layered)?;

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        self.resolve(layered)
    }

    fn resolve(
        &self,
        mut layered: BTreeMap<String, String>,
    ) -> Result<SchedulerConfig, ConfigError> {
        let mut cfg = SchedulerConfig::default();

        parse_into(&mut layered, "MAX_CONCURRENT", &mut cfg.max_concurrent)?;
        parse_into(&mut layered, "MAX_RETRIES", &mut cfg.max_retries)?;
        parse_into(&mut layered, "BASE_BACKOFF_SECONDS", &mut cfg.base_backoff_seconds)?;
        parse_into(&mut layered, "TICK_INTERVAL_SECONDS", &mut cfg.tick_interval_seconds)?;
        parse_into(&mut layered, "CACHE_CAPACITY", &mut cfg.cache_capacity)?;
        parse_into(&mut layered, "CACHE_EVICTION_BATCH", &mut cfg.cache_eviction_batch)?;
        parse_into(&mut layered, "CACHE_TTL_SECONDS", &mut cfg.cache_ttl_seconds)?;
        parse_into(
            &mut layered,
            "CACHE_CLEANUP_INTERVAL_SECONDS",
            &mut cfg.cache_cleanup_interval_seconds,
        )?;
        parse_into(&mut layered, "REFILL_BATCH_SIZE", &mut cfg.refill_batch_size)?;
        parse_into(
            &mut layered,
            "ACCESS_LOG_LOOKBACK_DAYS",
            &mut cfg.access_log_lookback_days,
        )?;
        parse_into(
            &mut layered,
            "PROVIDER_TIMEOUT_SECONDS",
            &mut cfg.provider_timeout_seconds,
        )?;
        parse_into(
            &mut layered,
            "PROVIDER_MIN_INTERVAL_MS",
            &mut cfg.provider_min_interval_ms,
        )?;

        if let Some(level) = non_empty(layered.remove("LOG_LEVEL")) {
            cfg.log_level = level;
        }
        if let Some(format) = non_empty(layered.remove("LOG_FORMAT")) {
            cfg.log_format = format.to_lowercase();
        }
        cfg.provider_endpoint = non_empty(layered.remove("PROVIDER_ENDPOINT"));
        cfg.provider_api_key = non_empty(layered.remove("PROVIDER_API_KEY"));
        cfg.database_path = non_empty(layered.remove("DATABASE_PATH")).map(PathBuf::from);

        cfg.validate()?;
        Ok(cfg)
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_into<T: FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = non_empty(layered.remove(key)) {
        *slot = raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layered(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.max_concurrent, 3);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.base_backoff_seconds, 5);
        assert_eq!(cfg.tick_interval(), Duration::from_secs(30));
        assert_eq!(cfg.cache_capacity, 100);
        assert_eq!(cfg.cache_eviction_batch, 10);
        assert_eq!(cfg.cache_ttl(), chrono::Duration::hours(24));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn layered_values_override_defaults() {
        let loader = ConfigLoader::with_base_dir(PathBuf::from("."));
        let cfg = loader
            .resolve(layered(&[
                ("MAX_CONCURRENT", "5"),
                ("LOG_FORMAT", "JSON"),
                ("PROVIDER_API_KEY", "  secret  "),
                ("DATABASE_PATH", ""),
            ]))
            .unwrap();
        assert_eq!(cfg.max_concurrent, 5);
        assert_eq!(cfg.log_format, "json");
        assert_eq!(cfg.provider_api_key.as_deref(), Some("secret"));
        assert!(cfg.database_path.is_none());
    }

    #[test]
    fn unparsable_value_is_rejected() {
        let loader = ConfigLoader::with_base_dir(PathBuf::from("."));
        let err = loader
            .resolve(layered(&[("MAX_RETRIES", "three")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "MAX_RETRIES", .. }));
    }

    #[test]
    fn validation_rejects_unrunnable_values() {
        let mut cfg = SchedulerConfig::default();
        cfg.max_concurrent = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MustBePositive { field: "max_concurrent" })
        ));

        let mut cfg = SchedulerConfig::default();
        cfg.cache_eviction_batch = 101;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::EvictionBatchTooLarge { .. })
        ));

        let mut cfg = SchedulerConfig::default();
        cfg.log_format = "xml".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::UnknownLogFormat(_))));
    }

    #[test]
    fn dotenv_files_are_layered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "TRANSLATION_CACHE_CAPACITY=200\nTRANSLATION_LOG_LEVEL=debug\nOTHER=1\n",
        )
        .unwrap();
        std::fs::write(dir.path().join(".env.local"), "TRANSLATION_CACHE_CAPACITY=300\n").unwrap();

        let loader = ConfigLoader::with_base_dir(dir.path().to_path_buf());
        let mut values = BTreeMap::new();
        loader.merge_dotenv(dir.path().join(".env"), &mut values).unwrap();
        loader
            .merge_dotenv(dir.path().join(".env.local"), &mut values)
            .unwrap();
        let cfg = loader.resolve(values).unwrap();

        assert_eq!(cfg.cache_capacity, 300);
        assert_eq!(cfg.log_level, "debug");
    }
}
