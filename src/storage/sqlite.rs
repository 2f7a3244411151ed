// SQLite-backed store (default backend). Structure follows the teacher's
// SqliteStorage: lazily-opened connections, a one-time init guard, JSON
// payload columns for nested structures.
use super::Store;
use crate::models::{CachedAnswer, Job, Quiz};
use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct SqliteStore {
    db_path: PathBuf,
    initialized: AtomicBool,
    init_guard: Mutex<()>,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    pub fn new(db_path: String) -> Self {
        let path = if db_path.trim().is_empty() {
            PathBuf::from("./data/quizforge.db")
        } else {
            PathBuf::from(db_path)
        };
        Self {
            db_path: path,
            initialized: AtomicBool::new(false),
            init_guard: Mutex::new(()),
            write_lock: Mutex::new(()),
        }
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Ok(conn)
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn quiz_from_row(row: &rusqlite::Row) -> rusqlite::Result<Quiz> {
        let payload: String = row.get("payload")?;
        serde_json::from_str(&payload).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
    }

    fn job_from_row(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        Ok(Job {
            id: row.get("id")?,
            quiz_id: row.get("quiz_id")?,
            document_url: row.get("document_url")?,
            document_type: row.get("document_type")?,
            retry_count: row.get::<_, i64>("retry_count")? as u32,
            next_attempt_at: row.get("next_attempt_at")?,
        })
    }
}

impl Store for SqliteStore {
    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.init_guard.lock();
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS quizzes (
              id TEXT PRIMARY KEY,
              content_hash TEXT NOT NULL,
              created_by TEXT NOT NULL,
              created_at INTEGER NOT NULL,
              deleted INTEGER NOT NULL DEFAULT 0,
              payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_quizzes_content_hash ON quizzes (content_hash);
            CREATE INDEX IF NOT EXISTS idx_quizzes_owner ON quizzes (created_by, created_at);

            CREATE TABLE IF NOT EXISTS cached_answers (
              stem_hash TEXT NOT NULL,
              choices_hash TEXT NOT NULL,
              correct_key TEXT NOT NULL,
              explanation TEXT,
              confidence REAL,
              provider TEXT NOT NULL,
              hit_count INTEGER NOT NULL DEFAULT 0,
              last_hit_at INTEGER NOT NULL,
              PRIMARY KEY (stem_hash, choices_hash)
            );

            CREATE TABLE IF NOT EXISTS jobs (
              id TEXT PRIMARY KEY,
              quiz_id TEXT NOT NULL,
              document_url TEXT NOT NULL,
              document_type TEXT NOT NULL,
              retry_count INTEGER NOT NULL DEFAULT 0,
              next_attempt_at INTEGER NOT NULL,
              created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_next_attempt ON jobs (next_attempt_at);
            "#,
        )?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn insert_quiz(&self, quiz: &Quiz) -> Result<()> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        let payload = serde_json::to_string(quiz)?;
        conn.execute(
            "INSERT INTO quizzes (id, content_hash, created_by, created_at, deleted, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![quiz.id, quiz.content_hash, quiz.created_by, quiz.created_at, quiz.deleted as i64, payload],
        )?;
        Ok(())
    }

    fn get_quiz(&self, id: &str) -> Result<Option<Quiz>> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        conn.query_row("SELECT payload FROM quizzes WHERE id = ?1", params![id], |row| {
            Self::quiz_from_row(row)
        })
        .optional()
        .map_err(Into::into)
    }

    fn find_quiz_by_content_hash(&self, content_hash: &str) -> Result<Option<Quiz>> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        conn.query_row(
            "SELECT payload FROM quizzes WHERE content_hash = ?1 AND deleted = 0 LIMIT 1",
            params![content_hash],
            |row| Self::quiz_from_row(row),
        )
        .optional()
        .map_err(Into::into)
    }

    fn save_quiz(&self, quiz: &Quiz) -> Result<()> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        let payload = serde_json::to_string(quiz)?;
        conn.execute(
            "UPDATE quizzes SET content_hash = ?2, created_by = ?3, created_at = ?4, deleted = ?5, payload = ?6
             WHERE id = ?1",
            params![quiz.id, quiz.content_hash, quiz.created_by, quiz.created_at, quiz.deleted as i64, payload],
        )?;
        Ok(())
    }

    fn delete_quiz(&self, id: &str) -> Result<()> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        conn.execute("DELETE FROM quizzes WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn list_quizzes_by_owner(&self, owner: &str) -> Result<Vec<Quiz>> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM quizzes WHERE created_by = ?1 AND deleted = 0 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![owner], |row| Self::quiz_from_row(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn lookup_cached_answer(&self, stem_hash: &str, choices_hash: &str) -> Result<Option<CachedAnswer>> {
        self.ensure_initialized()?;
        let _guard = self.write_lock.lock();
        let conn = self.open()?;
        let now = Self::now_ms();
        let found = conn
            .query_row(
                "SELECT stem_hash, choices_hash, correct_key, explanation, confidence, provider, hit_count, last_hit_at
                 FROM cached_answers WHERE stem_hash = ?1 AND choices_hash = ?2",
                params![stem_hash, choices_hash],
                |row| {
                    Ok(CachedAnswer {
                        stem_hash: row.get(0)?,
                        choices_hash: row.get(1)?,
                        correct_key: row.get(2)?,
                        explanation: row.get(3)?,
                        confidence: row.get(4)?,
                        provider: row.get(5)?,
                        hit_count: row.get::<_, i64>(6)? as u64,
                        last_hit_at: row.get(7)?,
                    })
                },
            )
            .optional()?;

        if found.is_some() {
            conn.execute(
                "UPDATE cached_answers SET hit_count = hit_count + 1, last_hit_at = ?3
                 WHERE stem_hash = ?1 AND choices_hash = ?2",
                params![stem_hash, choices_hash, now],
            )?;
        }
        Ok(found)
    }

    fn write_cached_answers(&self, answers: &[CachedAnswer]) -> Result<()> {
        self.ensure_initialized()?;
        let _guard = self.write_lock.lock();
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        for answer in answers {
            tx.execute(
                "INSERT INTO cached_answers (stem_hash, choices_hash, correct_key, explanation, confidence, provider, hit_count, last_hit_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
                 ON CONFLICT (stem_hash, choices_hash) DO NOTHING",
                params![
                    answer.stem_hash,
                    answer.choices_hash,
                    answer.correct_key,
                    answer.explanation,
                    answer.confidence,
                    answer.provider,
                    answer.last_hit_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn enqueue_job(&self, job: &Job) -> Result<()> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO jobs (id, quiz_id, document_url, document_type, retry_count, next_attempt_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![job.id, job.quiz_id, job.document_url, job.document_type, job.retry_count, job.next_attempt_at, Self::now_ms()],
        )?;
        Ok(())
    }

    fn claim_next_job(&self, now: i64) -> Result<Option<Job>> {
        self.ensure_initialized()?;
        let _guard = self.write_lock.lock();
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let claimed = tx
            .query_row(
                "SELECT id, quiz_id, document_url, document_type, retry_count, next_attempt_at
                 FROM jobs WHERE next_attempt_at <= ?1 ORDER BY created_at LIMIT 1",
                params![now],
                |row| Self::job_from_row(row),
            )
            .optional()?;
        if let Some(job) = &claimed {
            tx.execute("DELETE FROM jobs WHERE id = ?1", params![job.id])?;
        }
        tx.commit()?;
        Ok(claimed)
    }

    fn delete_job(&self, id: &str) -> Result<()> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn list_pending_jobs(&self) -> Result<Vec<Job>> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT id, quiz_id, document_url, document_type, retry_count, next_attempt_at FROM jobs ORDER BY created_at")?;
        let rows = stmt
            .query_map([], |row| Self::job_from_row(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
