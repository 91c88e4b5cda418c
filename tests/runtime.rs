mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{job, wait_for, FailingProvider, ScriptedProvider};
use tokio_util::sync::CancellationToken;
use translation_scheduler::{
    EnqueueOutcome, InMemoryStore, JobStatus, ManualClock, NewJob, PersistenceStore, Priority,
    SchedulerConfig, SqliteStore, StrategyName, SubmitOutcome, TranslationRuntime,
};

fn runtime_with(store: Arc<InMemoryStore>, provider: Arc<ScriptedProvider>) -> TranslationRuntime {
    TranslationRuntime::new(
        SchedulerConfig::default(),
        store,
        provider,
        Arc::new(ManualClock::default()),
    )
}

#[tokio::test]
async fn deferred_content_is_translated_on_request() {
    let store = Arc::new(InMemoryStore::new());
    let runtime = runtime_with(store.clone(), Arc::new(ScriptedProvider::new()));

    // Hybrid family with no usage yet: defer.
    let outcome = runtime.submit_content(job("c1", "Hello")).await.unwrap();
    let SubmitOutcome::Deferred(decision) = &outcome else {
        panic!("expected deferral, got {outcome:?}");
    };
    assert_eq!(decision.strategy, StrategyName::Hybrid);
    runtime.flush().await;
    assert_eq!(store.status_of("c1", "es"), Some(JobStatus::NotNeeded));
    assert_eq!(runtime.status().pending, 0);

    // A reader asks for it.
    assert!(matches!(
        runtime.request_translation(job("c1", "Hello")),
        Ok(EnqueueOutcome::Queued(_))
    ));
    assert_eq!(runtime.queue().pending_jobs()[0].priority, Priority::High);
    runtime.drain();
    wait_for(|| runtime.status().completed == 1).await;
    runtime.flush().await;
    assert_eq!(store.status_of("c1", "es"), Some(JobStatus::Completed));
}

#[tokio::test]
async fn immediate_family_content_is_queued_at_medium() {
    let store = Arc::new(InMemoryStore::new());
    store
        .set_family_strategy("fam-1", StrategyName::Immediate)
        .await
        .unwrap();
    let runtime = runtime_with(store.clone(), Arc::new(ScriptedProvider::new()));

    let outcome = runtime
        .submit_content(job("c1", "Hello").with_priority(Priority::Low))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        SubmitOutcome::Enqueued(EnqueueOutcome::Queued(_))
    ));
    assert_eq!(runtime.queue().pending_jobs()[0].priority, Priority::Medium);

    // A second submission for queued content does not touch its status.
    assert_eq!(
        runtime.submit_content(job("c1", "Hello")).await.unwrap(),
        SubmitOutcome::Enqueued(EnqueueOutcome::AlreadyQueued)
    );
    runtime.flush().await;
    assert_eq!(store.status_of("c1", "es"), Some(JobStatus::Pending));
}

#[tokio::test]
async fn scheduler_refills_persisted_work_and_stops_on_shutdown() {
    let store = Arc::new(InMemoryStore::new());
    let mut stored = job("persisted", "Good night").to_record();
    stored.credential = None;
    store.insert_pending_job(stored).await.unwrap();
    let mut broken = job("broken", "   ").to_record();
    broken.credential = None;
    store.insert_pending_job(broken).await.unwrap();

    let config = SchedulerConfig {
        provider_api_key: Some("fallback-key".into()),
        ..SchedulerConfig::default()
    };
    let provider = Arc::new(ScriptedProvider::new());
    let runtime = TranslationRuntime::new(
        config,
        store.clone(),
        provider.clone(),
        Arc::new(ManualClock::default()),
    );

    let handle = runtime.start(CancellationToken::new());
    wait_for(|| runtime.status().completed == 1).await;
    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("scheduler did not stop")
        .unwrap();

    assert_eq!(provider.calls(), vec!["Good night"]);
    assert_eq!(store.status_of("persisted", "es"), Some(JobStatus::Completed));
    let broken = store.job("broken", "es").unwrap();
    assert_eq!(broken.status, JobStatus::Failed);
    assert_eq!(broken.retry_count, 3);
    assert_eq!(broken.error_message.as_deref(), Some("source text is empty"));
    assert!(runtime.metrics_summary().contains_key("scheduler_tick"));
}

#[tokio::test]
async fn rejected_rows_do_not_hold_the_refill_window() {
    let store = Arc::new(InMemoryStore::new());
    let mut broken = job("broken", "   ").with_priority(Priority::High).to_record();
    broken.credential = None;
    store.insert_pending_job(broken).await.unwrap();
    let good = job("good", "Good night").with_priority(Priority::Low).to_record();
    store.insert_pending_job(good).await.unwrap();

    let config = SchedulerConfig {
        refill_batch_size: 1,
        tick_interval_seconds: 1,
        ..SchedulerConfig::default()
    };
    let provider = Arc::new(ScriptedProvider::new());
    let runtime = TranslationRuntime::new(
        config,
        store.clone(),
        provider.clone(),
        Arc::new(ManualClock::default()),
    );

    let handle = runtime.start(CancellationToken::new());
    wait_for(|| runtime.status().completed == 1).await;
    handle.shutdown();
    handle.join().await.unwrap();

    assert_eq!(provider.calls(), vec!["Good night"]);
    assert_eq!(store.status_of("broken", "es"), Some(JobStatus::Failed));
    assert_eq!(store.status_of("good", "es"), Some(JobStatus::Completed));
}

#[test]
fn retry_interrupted_by_a_restart_resumes_from_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("translations.db");
    let tokio_runtime = || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    };

    let first = tokio_runtime();
    first.block_on(async {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let runtime = TranslationRuntime::new(
            SchedulerConfig::default(),
            store.clone(),
            Arc::new(FailingProvider::default()),
            Arc::new(ManualClock::default()),
        );
        runtime
            .enqueue(job("c1", "Good evening").with_priority(Priority::High))
            .unwrap();
        runtime.drain();
        wait_for(|| runtime.status().retrying == 1).await;
        runtime.flush().await;
        assert_eq!(store.status_of("c1", "es").unwrap(), Some(JobStatus::Failed));
    });
    // The backoff timer dies with the process.
    drop(first);

    let second = tokio_runtime();
    second.block_on(async {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let provider = Arc::new(ScriptedProvider::new());
        let runtime = TranslationRuntime::new(
            SchedulerConfig::default(),
            store.clone(),
            provider.clone(),
            Arc::new(ManualClock::default()),
        );
        let handle = runtime.start(CancellationToken::new());
        wait_for(|| runtime.status().completed == 1).await;
        handle.shutdown();
        handle.join().await.unwrap();

        assert_eq!(provider.calls(), vec!["Good evening"]);
        assert_eq!(store.status_of("c1", "es").unwrap(), Some(JobStatus::Completed));
    });
}

#[tokio::test]
async fn deferral_keeps_persisted_pending_work() {
    let store = Arc::new(InMemoryStore::new());
    store
        .insert_pending_job(job("c1", "Hello").to_record())
        .await
        .unwrap();
    let runtime = runtime_with(store.clone(), Arc::new(ScriptedProvider::new()));

    // Hybrid family with no usage would defer, but the stored job stays.
    let outcome = runtime.submit_content(job("c1", "Hello")).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Deferred(_)));
    runtime.flush().await;
    assert_eq!(store.status_of("c1", "es"), Some(JobStatus::Pending));
}

#[tokio::test]
async fn access_history_survives_a_restart() {
    let store = Arc::new(InMemoryStore::new());
    let first = runtime_with(store.clone(), Arc::new(ScriptedProvider::new()));
    first.record_access("c1", "fam", "mom", "en");
    first.record_access("c1", "fam", "kid", "es");
    first.record_access("c2", "fam", "kid", "es");
    assert_eq!(first.metrics_for("fam").total_accesses, 3);
    first.flush().await;

    let second = runtime_with(store, Arc::new(ScriptedProvider::new()));
    assert_eq!(second.metrics_for("fam").total_accesses, 0);
    assert_eq!(second.load_access_history().await.unwrap(), 2);
    let metrics = second.metrics_for("fam");
    assert_eq!(metrics.total_accesses, 3);
    assert_eq!(metrics.language_breakdown["es"], 2);
}

#[tokio::test]
async fn sqlite_runtime_persists_results() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("translations.db");
    let config = SchedulerConfig {
        database_path: Some(db_path.clone()),
        ..SchedulerConfig::default()
    };
    let runtime = TranslationRuntime::from_config(config).unwrap();

    runtime
        .enqueue(NewJob::new("c1", "Thank you", "de", "German", "fam", "key"))
        .unwrap();
    runtime.drain();
    wait_for(|| runtime.status().completed == 1).await;
    runtime.flush().await;

    let reopened = SqliteStore::open(&db_path).unwrap();
    assert_eq!(
        reopened.status_of("c1", "de").unwrap(),
        Some(JobStatus::Completed)
    );
    assert_eq!(
        reopened.translated_text("c1", "de").unwrap().as_deref(),
        Some("[German] Thank you")
    );
}

#[test]
fn invalid_config_is_rejected_at_startup() {
    let config = SchedulerConfig {
        max_concurrent: 0,
        ..SchedulerConfig::default()
    };
    assert!(TranslationRuntime::from_config(config).is_err());
}
