// Persistence for quizzes, the semantic cache, and the job queue (components
// C, F, G). One trait behind two backends, selected by `storage.backend`,
// mirroring the teacher's single `StorageBackend` abstraction.
mod postgres;
mod sqlite;

use crate::config::StorageConfig;
use crate::models::{CachedAnswer, Job, Quiz};
use anyhow::{anyhow, Result};

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Persistence backend for quizzes, the answer cache, and the job queue.
/// Implementations are synchronous (blocking I/O); async callers wrap calls
/// in `tokio::task::spawn_blocking`.
pub trait Store: Send + Sync {
    fn ensure_initialized(&self) -> Result<()>;

    fn insert_quiz(&self, quiz: &Quiz) -> Result<()>;
    fn get_quiz(&self, id: &str) -> Result<Option<Quiz>>;
    fn find_quiz_by_content_hash(&self, content_hash: &str) -> Result<Option<Quiz>>;
    /// Read-modify-write save: replaces the whole record (spec.md §4.6 step 6).
    fn save_quiz(&self, quiz: &Quiz) -> Result<()>;
    fn delete_quiz(&self, id: &str) -> Result<()>;
    fn list_quizzes_by_owner(&self, owner: &str) -> Result<Vec<Quiz>>;

    /// Cache lookup. Bumps `hit_count`/`last_hit_at` atomically on hit.
    fn lookup_cached_answer(&self, stem_hash: &str, choices_hash: &str) -> Result<Option<CachedAnswer>>;
    /// Upsert-on-insert: rows that already exist are left untouched
    /// (spec.md §4.3's `setOnInsert` semantics).
    fn write_cached_answers(&self, answers: &[CachedAnswer]) -> Result<()>;

    /// Also used to re-enqueue a failed job for retry: the claimed job is
    /// gone from the table (see `claim_next_job`), so rescheduling means
    /// inserting it again with an advanced `retry_count`/`next_attempt_at`,
    /// not updating a row that no longer exists.
    fn enqueue_job(&self, job: &Job) -> Result<()>;
    /// Pops the oldest job whose `next_attempt_at <= now`, atomically.
    fn claim_next_job(&self, now: i64) -> Result<Option<Job>>;
    fn delete_job(&self, id: &str) -> Result<()>;
    /// Admin introspection query (SPEC_FULL §3 supplement): jobs currently
    /// queued, ordered oldest-first.
    fn list_pending_jobs(&self) -> Result<Vec<Job>>;
}

/// Selects a backend per `storage.backend` ∈ {sqlite, postgres, auto}. `auto`
/// prefers Postgres and falls back to SQLite if the connection can't be
/// established, mirroring the teacher's richer `db.config` variant (SPEC_FULL
/// Open Question 3).
pub fn build_store(config: &StorageConfig) -> Result<std::sync::Arc<dyn Store>> {
    let backend = config.backend.trim().to_lowercase();
    let backend = if backend.is_empty() { "sqlite".to_string() } else { backend };

    match backend.as_str() {
        "sqlite" | "default" => Ok(std::sync::Arc::new(SqliteStore::new(config.db_path.clone()))),
        "postgres" | "postgresql" | "pg" => Ok(std::sync::Arc::new(PostgresStore::new(
            config.postgres.dsn.clone(),
            config.postgres.connect_timeout_s,
            config.postgres.pool_size,
        )?)),
        "auto" => match PostgresStore::new(
            config.postgres.dsn.clone(),
            config.postgres.connect_timeout_s,
            config.postgres.pool_size,
        ) {
            Ok(store) => match store.ensure_initialized() {
                Ok(()) => Ok(std::sync::Arc::new(store)),
                Err(err) => {
                    tracing::warn!(error = %err, "postgres unreachable, falling back to sqlite");
                    Ok(std::sync::Arc::new(SqliteStore::new(config.db_path.clone())))
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "postgres init failed, falling back to sqlite");
                Ok(std::sync::Arc::new(SqliteStore::new(config.db_path.clone())))
            }
        },
        other => Err(anyhow!("unknown storage backend: {other}")),
    }
}
