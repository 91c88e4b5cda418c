#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use translation_scheduler::{
    Clock, JobQueue, ManualClock, MetricsRegistry, NewJob, QueueConfig, ResultCache,
    StoreWriter, InMemoryStore, TranslateError, TranslationProvider,
};

/// Replays queued responses in order, then falls back to `[lang] text`.
/// Records the text of every call.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, TranslateError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<String, TranslateError>) {
        self.script.lock().push_back(response);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl TranslationProvider for ScriptedProvider {
    async fn translate(
        &self,
        text: &str,
        target_language_name: &str,
        _credential: &str,
    ) -> Result<String, TranslateError> {
        self.calls.lock().push(text.to_string());
        match self.script.lock().pop_front() {
            Some(response) => response,
            None => Ok(format!("[{target_language_name}] {text}")),
        }
    }
}

/// Always fails with a timeout.
#[derive(Default)]
pub struct FailingProvider {
    pub calls: AtomicUsize,
}

#[async_trait]
impl TranslationProvider for FailingProvider {
    async fn translate(&self, _: &str, _: &str, _: &str) -> Result<String, TranslateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TranslateError::Timeout)
    }
}

/// Blocks every call until the test releases a permit. Tracks in-flight calls.
pub struct GatedProvider {
    gate: Semaphore,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: AtomicUsize,
}

impl GatedProvider {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
        }
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranslationProvider for GatedProvider {
    async fn translate(
        &self,
        text: &str,
        target_language_name: &str,
        _credential: &str,
    ) -> Result<String, TranslateError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(format!("[{target_language_name}] {text}"))
    }
}

pub struct Harness {
    pub queue: Arc<JobQueue>,
    pub cache: Arc<ResultCache>,
    pub store: Arc<InMemoryStore>,
    pub writer: StoreWriter,
    pub clock: Arc<ManualClock>,
    pub metrics: Arc<MetricsRegistry>,
}

pub fn harness(provider: Arc<dyn TranslationProvider>, config: QueueConfig) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let cache = Arc::new(ResultCache::new(
        100,
        10,
        chrono::Duration::hours(24),
        Arc::clone(&dyn_clock),
    ));
    let store = Arc::new(InMemoryStore::new());
    let writer = StoreWriter::spawn(store.clone());
    let metrics = Arc::new(MetricsRegistry::new());
    let queue = Arc::new(JobQueue::new(
        config,
        Arc::clone(&cache),
        provider,
        writer.clone(),
        dyn_clock,
        Arc::clone(&metrics),
    ));
    Harness {
        queue,
        cache,
        store,
        writer,
        clock,
        metrics,
    }
}

pub fn job(content_id: &str, text: &str) -> NewJob {
    NewJob::new(content_id, text, "es", "Spanish", "fam-1", "test-key")
}

/// Let spawned tasks run without moving (paused) time.
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
