//! In-memory translation result cache with TTL and bounded size.
//! Key: blake3 hex of (source_text | target_language_name).
//! Capacity: 100, eviction batch: 10, TTL: 24 hours.
//!
//! Reads only `peek`, so the LRU order is insertion order and the tail is
//! always the entry with the oldest `computed_at`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::SchedulerConfig;

#[derive(Debug, Clone)]
struct CacheEntry {
    translated_text: String,
    computed_at: DateTime<Utc>,
}

pub struct ResultCache {
    inner: RwLock<LruCache<String, CacheEntry>>,
    capacity: usize,
    eviction_batch: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ResultCache {
    pub fn new(capacity: usize, eviction_batch: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(LruCache::unbounded()),
            capacity,
            eviction_batch: eviction_batch.max(1),
            ttl,
            clock,
        }
    }

    pub fn from_config(config: &SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config.cache_capacity,
            config.cache_eviction_batch,
            config.cache_ttl(),
            clock,
        )
    }

    /// Compute the cache key for a (text, language) pair.
    pub fn key(text: &str, target_language_name: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(text.as_bytes());
        hasher.update(b"|");
        hasher.update(target_language_name.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Look up a cached translation. Expired entries read as absent but stay
    /// in place until the next `cleanup`.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let cache = self.inner.read();
        cache
            .peek(key)
            .filter(|entry| now - entry.computed_at <= self.ttl)
            .map(|entry| entry.translated_text.clone())
    }

    /// Insert a result, evicting the oldest batch first when full.
    pub fn set(&self, key: String, translated_text: String) {
        let computed_at = self.clock.now();
        let mut cache = self.inner.write();
        if !cache.contains(&key) && cache.len() >= self.capacity {
            let mut evicted = 0;
            while evicted < self.eviction_batch && cache.pop_lru().is_some() {
                evicted += 1;
            }
            debug!(evicted, "result cache at capacity, evicted oldest entries");
        }
        cache.put(
            key,
            CacheEntry {
                translated_text,
                computed_at,
            },
        );
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut cache = self.inner.write();
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| now - entry.computed_at > self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            cache.pop(key);
        }
        if !expired.is_empty() {
            info!(removed = expired.len(), remaining = cache.len(), "result cache cleanup");
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
