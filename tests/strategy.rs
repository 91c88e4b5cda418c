use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use translation_scheduler::{
    AccessLogRow, AccessTracker, InMemoryStore, JobStatus, ManualClock, PersistedJobRecord,
    PersistenceStore, StatusUpdate, StoreError, StrategyAdvisor, StrategyName,
};

/// Store whose every call fails.
struct UnavailableStore;

fn down() -> StoreError {
    StoreError::Unavailable("connection refused".into())
}

#[async_trait]
impl PersistenceStore for UnavailableStore {
    async fn update_status(&self, _: StatusUpdate) -> Result<(), StoreError> {
        Err(down())
    }
    async fn update_retry_count(&self, _: &str, _: &str, _: u32) -> Result<(), StoreError> {
        Err(down())
    }
    async fn job_status(&self, _: &str, _: &str) -> Result<Option<JobStatus>, StoreError> {
        Err(down())
    }
    async fn write_translation_result(&self, _: &str, _: &str, _: &str) -> Result<(), StoreError> {
        Err(down())
    }
    async fn insert_pending_job(&self, _: PersistedJobRecord) -> Result<(), StoreError> {
        Err(down())
    }
    async fn query_pending_jobs(&self, _: usize) -> Result<Vec<PersistedJobRecord>, StoreError> {
        Err(down())
    }
    async fn recover_interrupted_jobs(&self, _: u32) -> Result<usize, StoreError> {
        Err(down())
    }
    async fn append_access_log(&self, _: AccessLogRow) -> Result<(), StoreError> {
        Err(down())
    }
    async fn query_access_logs(&self, _: DateTime<Utc>) -> Result<Vec<AccessLogRow>, StoreError> {
        Err(down())
    }
    async fn get_family_strategy(&self, _: &str) -> Result<StrategyName, StoreError> {
        Err(down())
    }
    async fn set_family_strategy(&self, _: &str, _: StrategyName) -> Result<(), StoreError> {
        Err(down())
    }
}

fn access(tracker: &AccessTracker, family: &str, content: &str, language: &str, times: usize) {
    for _ in 0..times {
        tracker.record_access(content, family, "user", language);
    }
}

fn setup() -> (Arc<AccessTracker>, Arc<InMemoryStore>, StrategyAdvisor) {
    let tracker = Arc::new(AccessTracker::new(Arc::new(ManualClock::default())));
    let store = Arc::new(InMemoryStore::new());
    let advisor = StrategyAdvisor::new(tracker.clone(), store.clone());
    (tracker, store, advisor)
}

#[tokio::test]
async fn hybrid_needs_high_usage_and_two_active_languages() {
    let (tracker, _, advisor) = setup();

    // avg 8 accesses per content, en 4 / es 4.
    access(&tracker, "busy-bilingual", "c1", "en", 4);
    access(&tracker, "busy-bilingual", "c1", "es", 4);
    assert!(advisor.should_translate_now("c1", "busy-bilingual").await);

    // Dual-language but only 3 accesses per content.
    access(&tracker, "quiet-bilingual", "c2", "en", 3);
    access(&tracker, "quiet-bilingual", "c3", "es", 3);
    assert!(!advisor.should_translate_now("c2", "quiet-bilingual").await);

    // High usage but a single language.
    access(&tracker, "busy-monolingual", "c4", "en", 8);
    assert!(!advisor.should_translate_now("c4", "busy-monolingual").await);

    let decision = advisor.decide("c1", "busy-bilingual").await;
    assert_eq!(decision.strategy, StrategyName::Hybrid);
    assert!(decision.reason.contains("hybrid"));
}

#[tokio::test]
async fn immediate_and_on_demand_ignore_usage() {
    let (tracker, store, advisor) = setup();
    access(&tracker, "fam", "c1", "en", 4);
    access(&tracker, "fam", "c1", "es", 4);

    store
        .set_family_strategy("fam", StrategyName::OnDemand)
        .await
        .unwrap();
    assert!(!advisor.should_translate_now("c1", "fam").await);

    store
        .set_family_strategy("new-family", StrategyName::Immediate)
        .await
        .unwrap();
    assert!(advisor.should_translate_now("anything", "new-family").await);
}

#[tokio::test]
async fn lookup_failure_defers() {
    let tracker = Arc::new(AccessTracker::new(Arc::new(ManualClock::default())));
    let advisor = StrategyAdvisor::new(tracker, Arc::new(UnavailableStore));

    let decision = advisor.decide("c1", "fam").await;
    assert!(!decision.translate_now);
    assert!(decision.reason.contains("connection refused"));
    assert!(advisor.apply_suggested_strategy("fam").await.is_err());
}

#[tokio::test]
async fn suggested_strategy_is_persisted_when_it_changes() {
    let (tracker, store, advisor) = setup();

    // One access per content on a single day: on-demand usage.
    access(&tracker, "light", "c1", "en", 1);
    assert_eq!(advisor.suggest_strategy("light"), StrategyName::OnDemand);
    assert_eq!(
        advisor.apply_suggested_strategy("light").await.unwrap(),
        StrategyName::OnDemand
    );
    assert_eq!(
        store.get_family_strategy("light").await.unwrap(),
        StrategyName::OnDemand
    );

    // 12 accesses a day, all content reused.
    access(&tracker, "heavy", "c2", "en", 6);
    access(&tracker, "heavy", "c3", "es", 6);
    assert_eq!(advisor.suggest_strategy("heavy"), StrategyName::Immediate);

    // 5 accesses a day sits in the middle band.
    access(&tracker, "medium", "c4", "en", 5);
    assert_eq!(advisor.suggest_strategy("medium"), StrategyName::Hybrid);
    advisor.apply_suggested_strategy("medium").await.unwrap();
    assert_eq!(
        store.get_family_strategy("medium").await.unwrap(),
        StrategyName::Hybrid
    );
}
