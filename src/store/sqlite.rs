//! SQLite-backed persistence store.
//! Tables: translation_jobs, content_access_log, family_strategy.
//! Timestamps are stored as unix milliseconds.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::{
    AccessLogRow, JobStatus, PersistedJobRecord, PersistenceStore, StatusUpdate, StrategyName,
};
use crate::error::StoreError;
use crate::queue::job::Priority;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS translation_jobs (
        content_id TEXT NOT NULL,
        language_code TEXT NOT NULL,
        language_name TEXT,
        source_text TEXT,
        family_id TEXT,
        credential TEXT,
        priority INTEGER NOT NULL DEFAULT 1,
        status TEXT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        translated_text TEXT,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (content_id, language_code)
    );
    CREATE INDEX IF NOT EXISTS idx_jobs_status_priority
        ON translation_jobs(status, priority);
    CREATE TABLE IF NOT EXISTS content_access_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content_id TEXT NOT NULL,
        family_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        language TEXT NOT NULL,
        accessed_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_access_log_at
        ON content_access_log(accessed_at);
    CREATE TABLE IF NOT EXISTS family_strategy (
        family_id TEXT PRIMARY KEY,
        strategy TEXT NOT NULL
    );";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %db_path.display(), "sqlite persistence store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn status_of(
        &self,
        content_id: &str,
        language_code: &str,
    ) -> Result<Option<JobStatus>, StoreError> {
        let conn = self.conn.lock();
        current_status(&conn, content_id, language_code)
    }

    pub fn translated_text(
        &self,
        content_id: &str,
        language_code: &str,
    ) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let text: Option<Option<String>> = conn
            .query_row(
                "SELECT translated_text FROM translation_jobs
                 WHERE content_id = ?1 AND language_code = ?2",
                params![content_id, language_code],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text.flatten())
    }
}

fn current_status(
    conn: &Connection,
    content_id: &str,
    language_code: &str,
) -> Result<Option<JobStatus>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM translation_jobs WHERE content_id = ?1 AND language_code = ?2",
            params![content_id, language_code],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|s| s.parse::<JobStatus>().map_err(StoreError::Unavailable))
        .transpose()
}

fn check_transition(current: Option<JobStatus>, next: JobStatus) -> Result<(), StoreError> {
    match current {
        Some(from) if !from.can_transition_to(next) => {
            Err(StoreError::InvalidTransition { from, to: next })
        }
        _ => Ok(()),
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[async_trait]
impl PersistenceStore for SqliteStore {
    async fn update_status(&self, update: StatusUpdate) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let current = current_status(&conn, &update.content_id, &update.language_code)?;
        check_transition(current, update.status)?;
        conn.execute(
            "INSERT INTO translation_jobs
                 (content_id, language_code, status, error_message, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(content_id, language_code) DO UPDATE SET
                 status = excluded.status,
                 error_message = excluded.error_message,
                 updated_at = excluded.updated_at",
            params![
                update.content_id,
                update.language_code,
                update.status.as_str(),
                update.error_message,
                now_millis(),
            ],
        )?;
        debug!(
            content_id = %update.content_id,
            language = %update.language_code,
            status = %update.status,
            "status persisted"
        );
        Ok(())
    }

    async fn update_retry_count(
        &self,
        content_id: &str,
        language_code: &str,
        count: u32,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE translation_jobs SET retry_count = ?3, updated_at = ?4
             WHERE content_id = ?1 AND language_code = ?2",
            params![content_id, language_code, count, now_millis()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                content_id: content_id.to_string(),
                language: language_code.to_string(),
            });
        }
        Ok(())
    }

    async fn job_status(
        &self,
        content_id: &str,
        language_code: &str,
    ) -> Result<Option<JobStatus>, StoreError> {
        let conn = self.conn.lock();
        current_status(&conn, content_id, language_code)
    }

    async fn write_translation_result(
        &self,
        content_id: &str,
        translated_text: &str,
        language_code: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO translation_jobs
                 (content_id, language_code, status, translated_text, updated_at)
             VALUES (?1, ?2, 'in_progress', ?3, ?4)
             ON CONFLICT(content_id, language_code) DO UPDATE SET
                 translated_text = excluded.translated_text,
                 updated_at = excluded.updated_at",
            params![content_id, language_code, translated_text, now_millis()],
        )?;
        Ok(())
    }

    async fn insert_pending_job(&self, record: PersistedJobRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let current = current_status(&conn, &record.content_id, &record.target_language_code)?;
        check_transition(current, JobStatus::Pending)?;
        conn.execute(
            "INSERT INTO translation_jobs
                 (content_id, language_code, language_name, source_text, family_id,
                  credential, priority, status, retry_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9)
             ON CONFLICT(content_id, language_code) DO UPDATE SET
                 language_name = excluded.language_name,
                 source_text = excluded.source_text,
                 family_id = excluded.family_id,
                 credential = excluded.credential,
                 priority = excluded.priority,
                 status = 'pending',
                 retry_count = excluded.retry_count,
                 error_message = NULL,
                 updated_at = excluded.updated_at",
            params![
                record.content_id,
                record.target_language_code,
                record.target_language_name,
                record.source_text,
                record.family_id,
                record.credential,
                record.priority.rank(),
                record.retry_count,
                now_millis(),
            ],
        )?;
        Ok(())
    }

    async fn query_pending_jobs(
        &self,
        limit: usize,
    ) -> Result<Vec<PersistedJobRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT content_id, language_code, language_name, source_text, family_id,
                    credential, priority, retry_count
             FROM translation_jobs
             WHERE status = 'pending' AND source_text IS NOT NULL
             ORDER BY priority DESC, updated_at ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(PersistedJobRecord {
                content_id: row.get(0)?,
                target_language_code: row.get(1)?,
                target_language_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                source_text: row.get(3)?,
                family_id: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                credential: row.get(5)?,
                priority: Priority::from_rank(row.get(6)?),
                retry_count: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn recover_interrupted_jobs(&self, max_retries: u32) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_millis();
        let interrupted = tx.execute(
            "UPDATE translation_jobs SET status = 'pending', updated_at = ?1
             WHERE status = 'in_progress' AND source_text IS NOT NULL",
            params![now],
        )?;
        let retried = tx.execute(
            "UPDATE translation_jobs
             SET status = 'pending',
                 retry_count = retry_count + 1,
                 priority = MAX(priority - 1, ?3),
                 error_message = NULL,
                 updated_at = ?2
             WHERE status = 'failed' AND retry_count < ?1 AND source_text IS NOT NULL",
            params![max_retries, now, Priority::Low.rank()],
        )?;
        tx.commit()?;
        if interrupted + retried > 0 {
            info!(interrupted, retried, "stranded jobs returned to pending");
        }
        Ok(interrupted + retried)
    }

    async fn append_access_log(&self, row: AccessLogRow) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO content_access_log
                 (content_id, family_id, user_id, language, accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.content_id,
                row.family_id,
                row.user_id,
                row.language,
                row.accessed_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    async fn query_access_logs(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AccessLogRow>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT content_id, family_id, user_id, language, accessed_at
             FROM content_access_log WHERE accessed_at >= ?1 ORDER BY accessed_at ASC",
        )?;
        let rows = stmt.query_map(params![since.timestamp_millis()], |row| {
            Ok(AccessLogRow {
                content_id: row.get(0)?,
                family_id: row.get(1)?,
                user_id: row.get(2)?,
                language: row.get(3)?,
                accessed_at: from_millis(row.get(4)?),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn get_family_strategy(&self, family_id: &str) -> Result<StrategyName, StoreError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT strategy FROM family_strategy WHERE family_id = ?1",
                params![family_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(s) => s.parse().map_err(StoreError::Unavailable),
            None => Ok(StrategyName::default()),
        }
    }

    async fn set_family_strategy(
        &self,
        family_id: &str,
        strategy: StrategyName,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO family_strategy (family_id, strategy) VALUES (?1, ?2)
             ON CONFLICT(family_id) DO UPDATE SET strategy = excluded.strategy",
            params![family_id, strategy.as_str()],
        )?;
        Ok(())
    }
}
