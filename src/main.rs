// Worker binary (component G, spec.md §4.7): loads configuration, wires the
// store/cache/provider cascade/file storage, and runs the job queue worker
// loop in the foreground until the process is terminated.
use quizforge::app::App;
use quizforge::config;
use quizforge::queue::{Worker, WorkerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load_config();
    let _log_guard = config::init_tracing(&config);

    let app = App::build(&config)?;
    let worker_config = WorkerConfig::from_config(&config);

    info!(
        backend = %config.storage.backend,
        concurrency = worker_config.concurrency,
        "quizforge-worker starting"
    );

    let worker = Worker::new(app.store, app.cache, app.providers, app.file_storage, worker_config);
    worker.run().await
}
