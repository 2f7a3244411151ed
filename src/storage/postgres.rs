// Postgres-backed store, grounded in the teacher's PostgresStorage: a
// deadpool-postgres pool bridged into a synchronous trait via a dedicated
// fallback runtime, so callers never need to be async themselves.
use super::Store;
use crate::models::{CachedAnswer, Job, Quiz};
use anyhow::{anyhow, Result};
use chrono::Utc;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

const DEFAULT_POOL_SIZE: usize = 16;

pub struct PostgresStore {
    pool: Pool,
    initialized: AtomicBool,
    init_guard: Mutex<()>,
    fallback_runtime: tokio::runtime::Runtime,
}

struct PgConn<'a> {
    store: &'a PostgresStore,
    client: deadpool_postgres::Client,
}

impl PgConn<'_> {
    fn batch_execute(&mut self, query: &str) -> Result<()> {
        self.store.block_on(self.client.batch_execute(query))??;
        Ok(())
    }

    fn execute(&mut self, query: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        Ok(self.store.block_on(self.client.execute(query, params))??)
    }

    fn query(&mut self, query: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        Ok(self.store.block_on(self.client.query(query, params))??)
    }

    fn query_opt(&mut self, query: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Option<Row>> {
        Ok(self.store.block_on(self.client.query_opt(query, params))??)
    }
}

impl PostgresStore {
    pub fn new(dsn: String, connect_timeout_s: u64, pool_size: usize) -> Result<Self> {
        let cleaned = dsn.trim().to_string();
        if cleaned.is_empty() {
            return Err(anyhow!("postgres dsn is empty"));
        }
        let timeout = Duration::from_secs(connect_timeout_s.max(1));
        let pool_size = if pool_size == 0 { DEFAULT_POOL_SIZE } else { pool_size };
        let mut config = cleaned.parse::<tokio_postgres::Config>()?;
        config.connect_timeout(timeout);
        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = Manager::from_config(config, NoTls, manager_config);
        let pool = Pool::builder(manager).max_size(pool_size).build()?;
        let fallback_runtime =
            tokio::runtime::Runtime::new().map_err(|err| anyhow!("create tokio runtime for postgres: {err}"))?;
        Ok(Self {
            pool,
            initialized: AtomicBool::new(false),
            init_guard: Mutex::new(()),
            fallback_runtime,
        })
    }

    fn block_on<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Ok(tokio::task::block_in_place(|| handle.block_on(fut))),
            Err(_) => Ok(self.fallback_runtime.block_on(fut)),
        }
    }

    fn conn(&self) -> Result<PgConn<'_>> {
        let client = self.block_on(self.pool.get())??;
        Ok(PgConn { store: self, client })
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn quiz_from_row(row: &Row) -> Result<Quiz> {
        let payload: String = row.get("payload");
        Ok(serde_json::from_str(&payload)?)
    }

    fn job_from_row(row: &Row) -> Job {
        Job {
            id: row.get("id"),
            quiz_id: row.get("quiz_id"),
            document_url: row.get("document_url"),
            document_type: row.get("document_type"),
            retry_count: row.get::<_, i32>("retry_count") as u32,
            next_attempt_at: row.get("next_attempt_at"),
        }
    }
}

impl Store for PostgresStore {
    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.init_guard.lock();
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut conn = self.conn()?;
        conn.batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS quizzes (
              id TEXT PRIMARY KEY,
              content_hash TEXT NOT NULL,
              created_by TEXT NOT NULL,
              created_at BIGINT NOT NULL,
              deleted BOOLEAN NOT NULL DEFAULT FALSE,
              payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_quizzes_content_hash ON quizzes (content_hash);
            CREATE INDEX IF NOT EXISTS idx_quizzes_owner ON quizzes (created_by, created_at);

            CREATE TABLE IF NOT EXISTS cached_answers (
              stem_hash TEXT NOT NULL,
              choices_hash TEXT NOT NULL,
              correct_key TEXT NOT NULL,
              explanation TEXT,
              confidence DOUBLE PRECISION,
              provider TEXT NOT NULL,
              hit_count BIGINT NOT NULL DEFAULT 0,
              last_hit_at BIGINT NOT NULL,
              PRIMARY KEY (stem_hash, choices_hash)
            );

            CREATE TABLE IF NOT EXISTS jobs (
              id TEXT PRIMARY KEY,
              quiz_id TEXT NOT NULL,
              document_url TEXT NOT NULL,
              document_type TEXT NOT NULL,
              retry_count INTEGER NOT NULL DEFAULT 0,
              next_attempt_at BIGINT NOT NULL,
              created_at BIGINT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_next_attempt ON jobs (next_attempt_at);
            "#,
        )?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn insert_quiz(&self, quiz: &Quiz) -> Result<()> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        let payload = serde_json::to_string(quiz)?;
        conn.execute(
            "INSERT INTO quizzes (id, content_hash, created_by, created_at, deleted, payload)
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[&quiz.id, &quiz.content_hash, &quiz.created_by, &quiz.created_at, &quiz.deleted, &payload],
        )?;
        Ok(())
    }

    fn get_quiz(&self, id: &str) -> Result<Option<Quiz>> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        match conn.query_opt("SELECT payload FROM quizzes WHERE id = $1", &[&id])? {
            Some(row) => Ok(Some(Self::quiz_from_row(&row)?)),
            None => Ok(None),
        }
    }

    fn find_quiz_by_content_hash(&self, content_hash: &str) -> Result<Option<Quiz>> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        match conn.query_opt(
            "SELECT payload FROM quizzes WHERE content_hash = $1 AND deleted = FALSE LIMIT 1",
            &[&content_hash],
        )? {
            Some(row) => Ok(Some(Self::quiz_from_row(&row)?)),
            None => Ok(None),
        }
    }

    fn save_quiz(&self, quiz: &Quiz) -> Result<()> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        let payload = serde_json::to_string(quiz)?;
        conn.execute(
            "UPDATE quizzes SET content_hash = $2, created_by = $3, created_at = $4, deleted = $5, payload = $6
             WHERE id = $1",
            &[&quiz.id, &quiz.content_hash, &quiz.created_by, &quiz.created_at, &quiz.deleted, &payload],
        )?;
        Ok(())
    }

    fn delete_quiz(&self, id: &str) -> Result<()> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        conn.execute("DELETE FROM quizzes WHERE id = $1", &[&id])?;
        Ok(())
    }

    fn list_quizzes_by_owner(&self, owner: &str) -> Result<Vec<Quiz>> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        let rows = conn.query(
            "SELECT payload FROM quizzes WHERE created_by = $1 AND deleted = FALSE ORDER BY created_at",
            &[&owner],
        )?;
        rows.iter().map(Self::quiz_from_row).collect()
    }

    fn lookup_cached_answer(&self, stem_hash: &str, choices_hash: &str) -> Result<Option<CachedAnswer>> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        let now = Self::now_ms();
        let found = conn
            .query_opt(
                "SELECT stem_hash, choices_hash, correct_key, explanation, confidence, provider, hit_count, last_hit_at
                 FROM cached_answers WHERE stem_hash = $1 AND choices_hash = $2",
                &[&stem_hash, &choices_hash],
            )?
            .map(|row| CachedAnswer {
                stem_hash: row.get(0),
                choices_hash: row.get(1),
                correct_key: row.get(2),
                explanation: row.get(3),
                confidence: row.get::<_, Option<f64>>(4).map(|v| v as f32),
                provider: row.get(5),
                hit_count: row.get::<_, i64>(6) as u64,
                last_hit_at: row.get(7),
            });

        if found.is_some() {
            conn.execute(
                "UPDATE cached_answers SET hit_count = hit_count + 1, last_hit_at = $3
                 WHERE stem_hash = $1 AND choices_hash = $2",
                &[&stem_hash, &choices_hash, &now],
            )?;
        }
        Ok(found)
    }

    fn write_cached_answers(&self, answers: &[CachedAnswer]) -> Result<()> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        for answer in answers {
            let confidence = answer.confidence.map(|v| v as f64);
            conn.execute(
                "INSERT INTO cached_answers (stem_hash, choices_hash, correct_key, explanation, confidence, provider, hit_count, last_hit_at)
                 VALUES ($1, $2, $3, $4, $5, $6, 1, $7)
                 ON CONFLICT (stem_hash, choices_hash) DO NOTHING",
                &[
                    &answer.stem_hash,
                    &answer.choices_hash,
                    &answer.correct_key,
                    &answer.explanation,
                    &confidence,
                    &answer.provider,
                    &answer.last_hit_at,
                ],
            )?;
        }
        Ok(())
    }

    fn enqueue_job(&self, job: &Job) -> Result<()> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        conn.execute(
            "INSERT INTO jobs (id, quiz_id, document_url, document_type, retry_count, next_attempt_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &job.id,
                &job.quiz_id,
                &job.document_url,
                &job.document_type,
                &(job.retry_count as i32),
                &job.next_attempt_at,
                &Self::now_ms(),
            ],
        )?;
        Ok(())
    }

    fn claim_next_job(&self, now: i64) -> Result<Option<Job>> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "DELETE FROM jobs WHERE id = (
                SELECT id FROM jobs WHERE next_attempt_at <= $1 ORDER BY created_at LIMIT 1
             ) RETURNING id, quiz_id, document_url, document_type, retry_count, next_attempt_at",
            &[&now],
        )?;
        Ok(row.map(|r| Self::job_from_row(&r)))
    }

    fn delete_job(&self, id: &str) -> Result<()> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        conn.execute("DELETE FROM jobs WHERE id = $1", &[&id])?;
        Ok(())
    }

    fn list_pending_jobs(&self) -> Result<Vec<Job>> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        let rows = conn.query(
            "SELECT id, quiz_id, document_url, document_type, retry_count, next_attempt_at FROM jobs ORDER BY created_at",
            &[],
        )?;
        Ok(rows.iter().map(Self::job_from_row).collect())
    }
}
