use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// quizforge-cli
///
/// Operator tool for the quiz ingestion pipeline: drives the out-of-scope
/// upload handler for local testing, runs the worker loop, and inspects the
/// durable job queue.
#[derive(Debug, Parser)]
#[command(author, version, bin_name = "quizforge-cli")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Hash a document, create a Pending quiz, and enqueue a job for it.
    Enqueue(EnqueueCommand),

    /// Run the job queue worker loop in the foreground.
    RunWorker,

    /// Inspect the durable job queue.
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
}

#[derive(Debug, clap::Args)]
pub struct EnqueueCommand {
    /// Path to the document to ingest (.pdf, .docx, .doc, .txt, .rtf, .odt).
    pub file: PathBuf,

    /// Title to record on the created quiz.
    pub title: String,

    /// Owner reference recorded on the created quiz.
    pub owner: String,
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Print the number of jobs currently pending.
    Depth,
    /// List pending jobs with their next-attempt timestamp.
    List,
}
