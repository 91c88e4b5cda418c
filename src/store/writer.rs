//! Write-behind persistence.
//! Writes are queued on an unbounded channel and applied in submission order
//! by one background task, so callers never block on disk and status
//! transitions for the same content cannot overtake each other.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{AccessLogRow, PersistedJobRecord, PersistenceStore, StatusUpdate};

/// A single deferred write against the store.
#[derive(Debug, Clone)]
pub enum StoreWrite {
    /// Full job record, (re)registered as Pending.
    PendingJob(PersistedJobRecord),
    Status(StatusUpdate),
    RetryCount {
        content_id: String,
        language_code: String,
        count: u32,
    },
    TranslationResult {
        content_id: String,
        language_code: String,
        translated_text: String,
    },
    AccessLog(AccessLogRow),
}

enum Message {
    Write(StoreWrite),
    Flush(oneshot::Sender<()>),
}

/// Cheap to clone; every clone feeds the same background task.
#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<Message>,
}

impl StoreWriter {
    /// Start the background apply loop. Must be called inside a Tokio runtime.
    pub fn spawn(store: Arc<dyn PersistenceStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(apply_loop(rx, store));
        Self { tx }
    }

    /// Queue a write. Never blocks.
    pub fn submit(&self, write: StoreWrite) {
        if let Err(e) = self.tx.send(Message::Write(write)) {
            warn!(error = %e, "store writer channel closed, dropping write");
        }
    }

    /// Resolves once every write submitted before this call has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(done_tx)).is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

async fn apply_loop(mut rx: mpsc::UnboundedReceiver<Message>, store: Arc<dyn PersistenceStore>) {
    let mut applied: u64 = 0;
    while let Some(msg) = rx.recv().await {
        match msg {
            Message::Write(write) => {
                apply(store.as_ref(), write).await;
                applied += 1;
            }
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    info!(applied, "store writer exiting (channel closed)");
}

async fn apply(store: &dyn PersistenceStore, write: StoreWrite) {
    let start = Instant::now();
    let result = match &write {
        StoreWrite::PendingJob(record) => store.insert_pending_job(record.clone()).await,
        StoreWrite::Status(update) => store.update_status(update.clone()).await,
        StoreWrite::RetryCount {
            content_id,
            language_code,
            count,
        } => {
            store
                .update_retry_count(content_id, language_code, *count)
                .await
        }
        StoreWrite::TranslationResult {
            content_id,
            language_code,
            translated_text,
        } => {
            store
                .write_translation_result(content_id, translated_text, language_code)
                .await
        }
        StoreWrite::AccessLog(row) => store.append_access_log(row.clone()).await,
    };

    match result {
        Ok(()) => debug!(
            elapsed_us = start.elapsed().as_micros() as u64,
            write = ?write,
            "store write applied"
        ),
        Err(e) => warn!(error = %e, write = ?write, "store write failed"),
    }
}
