// Job Queue & Worker (component G, spec.md §4.7): a durable FIFO backed by
// `Store`'s job table, drained by a single worker loop with bounded
// concurrency and a jobs/min limiter. Retries use fixed backoff; a claimed
// job's record is gone from the table (see `claim_next_job`), so a failed
// job is re-enqueued with an advanced `retry_count`/`next_attempt_at` rather
// than updated in place, until `max_attempts` is exhausted.
use crate::cache::CacheStore;
use crate::config::Config;
use crate::file_storage::FileStorage;
use crate::models::{Job, JobPayload};
use crate::orchestrator::ProviderSlot;
use crate::pipeline;
use crate::storage::Store;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

const POLL_INTERVAL_MS: u64 = 500;

pub struct WorkerConfig {
    pub concurrency: usize,
    pub jobs_per_minute: u32,
    pub max_attempts: u32,
    pub backoff_secs: u64,
    pub orchestrator_chunk_size: usize,
    pub section_default: String,
}

impl WorkerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.server.worker_concurrency.max(1),
            jobs_per_minute: config.server.jobs_per_minute,
            max_attempts: config.server.job_max_attempts,
            backoff_secs: config.server.job_backoff_secs,
            orchestrator_chunk_size: config.parser.orchestrator_chunk_size,
            section_default: config.parser.section_default.clone(),
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A simple token-bucket: `try_acquire` returns `true` at most
/// `jobs_per_minute` times per rolling 60s window. Guards against piling
/// requests onto rate-limited providers, independent of `concurrency`.
struct JobsPerMinuteLimiter {
    capacity: u32,
    window: parking_lot::Mutex<(i64, u32)>,
}

impl JobsPerMinuteLimiter {
    fn new(capacity: u32) -> Self {
        Self {
            capacity: capacity.max(1),
            window: parking_lot::Mutex::new((now_ms(), 0)),
        }
    }

    fn try_acquire(&self) -> bool {
        let mut window = self.window.lock();
        let now = now_ms();
        if now - window.0 >= 60_000 {
            *window = (now, 0);
        }
        if window.1 >= self.capacity {
            return false;
        }
        window.1 += 1;
        true
    }
}

/// Drives the durable job queue: claims one job at a time, dispatches it to
/// `pipeline::process_job` under a bounded-concurrency semaphore, and
/// reschedules failures with fixed backoff until `max_attempts` is reached.
pub struct Worker {
    store: Arc<dyn Store>,
    cache: Arc<CacheStore>,
    providers: Arc<Vec<ProviderSlot>>,
    file_storage: Arc<dyn FileStorage>,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
    limiter: Arc<JobsPerMinuteLimiter>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<CacheStore>,
        providers: Vec<ProviderSlot>,
        file_storage: Arc<dyn FileStorage>,
        config: WorkerConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        let limiter = Arc::new(JobsPerMinuteLimiter::new(config.jobs_per_minute));
        Self {
            store,
            cache,
            providers: Arc::new(providers),
            file_storage,
            config,
            semaphore,
            limiter,
        }
    }

    /// Runs forever, polling the queue. Intended as the worker binary's
    /// top-level loop; cancel the surrounding task to stop it.
    pub async fn run(&self) -> ! {
        info!(concurrency = self.config.concurrency, "worker started");
        loop {
            if !self.limiter.try_acquire() {
                tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
                continue;
            }

            let store = self.store.clone();
            let claimed = tokio::task::spawn_blocking(move || store.claim_next_job(now_ms()))
                .await
                .unwrap_or_else(|err| {
                    error!(error = %err, "claim_next_job task panicked");
                    Ok(None)
                });

            let job = match claimed {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "failed to claim next job");
                    tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
                    continue;
                }
            };

            let permit = self.semaphore.clone().acquire_owned().await.expect("semaphore never closed");
            let store = self.store.clone();
            let cache = self.cache.clone();
            let providers = self.providers.clone();
            let file_storage = self.file_storage.clone();
            let chunk_size = self.config.orchestrator_chunk_size;
            let section_default = self.config.section_default.clone();
            let max_attempts = self.config.max_attempts;
            let backoff_secs = self.config.backoff_secs;

            tokio::spawn(async move {
                let _permit = permit;
                run_one_job(job, store, cache, providers, file_storage, chunk_size, &section_default, max_attempts, backoff_secs).await;
            });
        }
    }
}

async fn run_one_job(
    job: Job,
    store: Arc<dyn Store>,
    cache: Arc<CacheStore>,
    providers: Arc<Vec<ProviderSlot>>,
    file_storage: Arc<dyn FileStorage>,
    chunk_size: usize,
    section_default: &str,
    max_attempts: u32,
    backoff_secs: u64,
) {
    let payload = JobPayload {
        quiz_id: job.quiz_id.clone(),
        document_url: job.document_url.clone(),
        document_type: job.document_type.clone(),
    };

    let result = pipeline::process_job(&payload, &store, &cache, &providers, chunk_size, section_default, &file_storage).await;

    match result {
        Ok(()) => {
            info!(job_id = %job.id, quiz_id = %job.quiz_id, "job completed");
        }
        Err(err) => {
            if err.kind() == crate::error::AppErrorKind::Parser {
                error!(job_id = %job.id, quiz_id = %job.quiz_id, error = %err, "job failed with a parser error, not retrying");
                return;
            }
            let next_retry = job.retry_count + 1;
            if next_retry >= max_attempts {
                error!(job_id = %job.id, quiz_id = %job.quiz_id, attempts = next_retry, error = %err, "job exhausted retries, leaving in failed partition");
                return;
            }
            warn!(job_id = %job.id, quiz_id = %job.quiz_id, attempt = next_retry, error = %err, "job failed, rescheduling");
            let next_attempt_at = now_ms() + (backoff_secs as i64 * 1000);
            let mut retry_job = job.clone();
            retry_job.retry_count = next_retry;
            retry_job.next_attempt_at = next_attempt_at;
            let store = store.clone();
            let rescheduled = tokio::task::spawn_blocking(move || store.enqueue_job(&retry_job)).await;
            if let Ok(Err(err)) = rescheduled {
                error!(job_id = %job.id, error = %err, "failed to reschedule job");
            }
        }
    }
}
