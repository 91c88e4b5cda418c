//! Content-access tracking and per-family usage aggregation.
//!
//! Records live in memory behind one RwLock. Each access is also mirrored to
//! the store's access log through the write-behind writer, outside the lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::store::{AccessLogRow, PersistenceStore, StoreWrite, StoreWriter};

/// Average accesses per content above which a family counts as high usage.
const HIGH_USAGE_AVG: f64 = 5.0;
/// The least-used language needs more than this many accesses for dual-language activity.
const DUAL_LANGUAGE_MIN: u64 = 2;
/// Accesses per day above which content is considered high priority.
const HIGH_PRIORITY_FREQUENCY: f64 = 2.0;

/// Counters for one content item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentAccessRecord {
    pub content_id: String,
    pub family_id: String,
    pub access_count: u64,
    pub last_accessed_at: DateTime<Utc>,
    /// First time the tracker saw this content.
    pub created_at: DateTime<Utc>,
    pub language_access_counts: HashMap<String, u64>,
    pub user_access_counts: HashMap<String, u64>,
}

impl ContentAccessRecord {
    fn new(content_id: &str, family_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            content_id: content_id.to_string(),
            family_id: family_id.to_string(),
            access_count: 0,
            last_accessed_at: at,
            created_at: at,
            language_access_counts: HashMap::new(),
            user_access_counts: HashMap::new(),
        }
    }

    fn bump(&mut self, user_id: &str, language: &str, at: DateTime<Utc>) {
        self.access_count += 1;
        *self
            .language_access_counts
            .entry(language.to_string())
            .or_default() += 1;
        *self.user_access_counts.entry(user_id.to_string()).or_default() += 1;
        if at > self.last_accessed_at {
            self.last_accessed_at = at;
        }
        if at < self.created_at {
            self.created_at = at;
        }
    }

    /// Accesses per day since creation, counting whole days and at least one.
    pub fn access_frequency(&self, now: DateTime<Utc>) -> f64 {
        self.access_count as f64 / whole_days_since(self.created_at, now) as f64
    }
}

fn whole_days_since(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_days().max(1)
}

/// Aggregate over one family's records. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyUsageMetrics {
    pub family_id: String,
    pub total_accesses: u64,
    pub unique_content: usize,
    pub avg_accesses_per_content: f64,
    pub language_breakdown: HashMap<String, u64>,
}

impl FamilyUsageMetrics {
    pub fn is_high_usage_family(&self) -> bool {
        self.avg_accesses_per_content > HIGH_USAGE_AVG
    }

    pub fn is_dual_language_active(&self) -> bool {
        self.language_breakdown.len() > 1
            && self
                .language_breakdown
                .values()
                .min()
                .is_some_and(|&least| least > DUAL_LANGUAGE_MIN)
    }
}

/// Input to strategy suggestions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsagePattern {
    pub avg_accesses_per_day: f64,
    /// Share of the family's content accessed more than once.
    pub content_reuse_rate: f64,
}

pub struct AccessTracker {
    records: RwLock<HashMap<String, ContentAccessRecord>>,
    clock: Arc<dyn Clock>,
    writer: Option<StoreWriter>,
}

impl AccessTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
            writer: None,
        }
    }

    /// Mirror every recorded access to the store's access log.
    pub fn with_writer(mut self, writer: StoreWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn record_access(&self, content_id: &str, family_id: &str, user_id: &str, language: &str) {
        let now = self.clock.now();
        {
            let mut records = self.records.write();
            records
                .entry(content_id.to_string())
                .or_insert_with(|| ContentAccessRecord::new(content_id, family_id, now))
                .bump(user_id, language, now);
        }
        debug!(content_id, family_id, user_id, language, "access recorded");

        if let Some(writer) = &self.writer {
            writer.submit(StoreWrite::AccessLog(AccessLogRow {
                content_id: content_id.to_string(),
                family_id: family_id.to_string(),
                user_id: user_id.to_string(),
                language: language.to_string(),
                accessed_at: now,
            }));
        }
    }

    pub fn record(&self, content_id: &str) -> Option<ContentAccessRecord> {
        self.records.read().get(content_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn metrics_for(&self, family_id: &str) -> FamilyUsageMetrics {
        let records = self.records.read();
        let mut total_accesses = 0;
        let mut unique_content = 0;
        let mut language_breakdown: HashMap<String, u64> = HashMap::new();
        for record in records.values().filter(|r| r.family_id == family_id) {
            total_accesses += record.access_count;
            unique_content += 1;
            for (language, count) in &record.language_access_counts {
                *language_breakdown.entry(language.clone()).or_default() += count;
            }
        }
        let avg_accesses_per_content = if unique_content == 0 {
            0.0
        } else {
            total_accesses as f64 / unique_content as f64
        };
        FamilyUsageMetrics {
            family_id: family_id.to_string(),
            total_accesses,
            unique_content,
            avg_accesses_per_content,
            language_breakdown,
        }
    }

    /// Up to `limit` records accessed more than twice a day, most frequent first.
    pub fn high_priority_content(&self, family_id: &str, limit: usize) -> Vec<ContentAccessRecord> {
        let now = self.clock.now();
        let records = self.records.read();
        let mut hot: Vec<(f64, &ContentAccessRecord)> = records
            .values()
            .filter(|r| r.family_id == family_id)
            .map(|r| (r.access_frequency(now), r))
            .filter(|(freq, _)| *freq > HIGH_PRIORITY_FREQUENCY)
            .collect();
        hot.sort_by(|a, b| b.0.total_cmp(&a.0));
        hot.into_iter()
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn usage_pattern(&self, family_id: &str) -> UsagePattern {
        let now = self.clock.now();
        let records = self.records.read();
        let family: Vec<&ContentAccessRecord> =
            records.values().filter(|r| r.family_id == family_id).collect();
        let Some(oldest) = family.iter().map(|r| r.created_at).min() else {
            return UsagePattern {
                avg_accesses_per_day: 0.0,
                content_reuse_rate: 0.0,
            };
        };
        let total: u64 = family.iter().map(|r| r.access_count).sum();
        let reused = family.iter().filter(|r| r.access_count > 1).count();
        UsagePattern {
            avg_accesses_per_day: total as f64 / whole_days_since(oldest, now) as f64,
            content_reuse_rate: reused as f64 / family.len() as f64,
        }
    }

    /// Rebuild records from the store's access log over the last `lookback_days`.
    /// Records for contents seen in the window are replaced, so repeated loads
    /// give the same result. Returns the number of records rebuilt.
    pub async fn load_from_store(
        &self,
        store: &dyn PersistenceStore,
        lookback_days: i64,
    ) -> Result<usize, StoreError> {
        let since = self.clock.now() - Duration::days(lookback_days);
        let rows = store.query_access_logs(since).await?;

        let mut rebuilt: HashMap<String, ContentAccessRecord> = HashMap::new();
        for row in &rows {
            rebuilt
                .entry(row.content_id.clone())
                .or_insert_with(|| {
                    ContentAccessRecord::new(&row.content_id, &row.family_id, row.accessed_at)
                })
                .bump(&row.user_id, &row.language, row.accessed_at);
        }

        let count = rebuilt.len();
        self.records.write().extend(rebuilt);
        info!(rows = rows.len(), records = count, lookback_days, "access history loaded");
        Ok(count)
    }
}
