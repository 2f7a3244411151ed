// quizforge-cli: a small operator CLI standing in for the out-of-scope
// upload handler (spec.md §1) and a foreground way to run the worker loop —
// grounded in the teacher's `wunder-cli/args.rs` clap-derive + subcommand
// dispatch style (SPEC_FULL §3).
mod args;

use anyhow::{Context, Result};
use args::{Cli, Command, EnqueueCommand, QueueCommand};
use chrono::Utc;
use clap::Parser;
use quizforge::app::App;
use quizforge::config;
use quizforge::hashing;
use quizforge::models::{Job, Quiz, QuizState, SectionCount};
use quizforge::parser::validate_upload;
use quizforge::queue::{Worker, WorkerConfig};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config();
    let _log_guard = config::init_tracing(&config);

    match cli.command {
        Command::Enqueue(cmd) => enqueue(&config, cmd).await,
        Command::RunWorker => run_worker(&config).await,
        Command::Queue { command } => queue(&config, command).await,
    }
}

/// Hashes the file, creates a Pending Quiz (or reports the existing one on a
/// duplicate upload, spec.md §3's `UploadOutcome`), and enqueues a Job for
/// the worker to pick up — the local stand-in for the real upload handler.
async fn enqueue(config: &config::Config, cmd: EnqueueCommand) -> Result<()> {
    let app = App::build(config)?;
    let path = cmd.file.canonicalize().with_context(|| format!("resolve {}", cmd.file.display()))?;

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let document_kind = validate_upload(&path, extension)?;
    let content_hash = hashing::hash_file(&path)?;

    if let Some(existing) = app.store.find_quiz_by_content_hash(&content_hash)? {
        println!("duplicate upload: existing quiz id = {}", existing.id);
        return Ok(());
    }

    let now = Utc::now().timestamp_millis();
    let quiz_id = Uuid::new_v4().to_string();
    let document_url = format!("file://{}", path.display());

    let quiz = Quiz {
        id: quiz_id.clone(),
        title: cmd.title,
        source_document: document_url.clone(),
        document_kind,
        content_hash,
        state: QuizState::Pending,
        total_questions: 0,
        processed_questions: 0,
        questions: Vec::new(),
        sections: Vec::new(),
        section_counts: Vec::<SectionCount>::new(),
        created_by: cmd.owner,
        created_at: now,
        updated_at: now,
        deleted: false,
    };
    app.store.insert_quiz(&quiz)?;

    let job = Job {
        id: Uuid::new_v4().to_string(),
        quiz_id: quiz_id.clone(),
        document_url,
        document_type: extension.to_string(),
        retry_count: 0,
        next_attempt_at: now,
    };
    app.store.enqueue_job(&job)?;

    println!("enqueued quiz {quiz_id} (job {})", job.id);
    Ok(())
}

async fn run_worker(config: &config::Config) -> Result<()> {
    let app = App::build(config)?;
    let worker_config = WorkerConfig::from_config(config);
    let worker = Worker::new(app.store, app.cache, app.providers, app.file_storage, worker_config);
    worker.run().await
}

/// Admin introspection (SPEC_FULL §3): inspect the durable queue without
/// draining it.
async fn queue(config: &config::Config, cmd: QueueCommand) -> Result<()> {
    let app = App::build(config)?;
    match cmd {
        QueueCommand::Depth => {
            let pending = app.store.list_pending_jobs()?;
            println!("{}", pending.len());
        }
        QueueCommand::List => {
            let pending = app.store.list_pending_jobs()?;
            if pending.is_empty() {
                println!("queue is empty");
            }
            for job in pending {
                println!(
                    "{}  quiz={}  next_attempt_at={}  retries={}",
                    job.id, job.quiz_id, job.next_attempt_at, job.retry_count
                );
            }
        }
    }
    Ok(())
}
