// Processing Pipeline (component F, spec.md §4.6): turns one claimed job into
// a parsed, answered, persisted Quiz. `Store` is synchronous; every call into
// it here goes through `spawn_blocking`, per its own doc comment.
use crate::error::AppError;
use crate::file_storage::FileStorage;
use crate::models::{AnswerSource, Choice, JobPayload, Question, Quiz, QuizState, SectionCount};
use crate::orchestrator::{self, ProviderSlot};
use crate::parser::{self, ParsedQuestion};
use crate::storage::Store;
use anyhow::{anyhow, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Infrastructure failures (store I/O, task panics) don't carry their own
/// `AppErrorKind` — spec.md §7 only distinguishes `ParserError` from
/// everything else on the retry path, so everything that isn't a parser
/// failure collapses to `App`.
fn to_app_error(err: anyhow::Error) -> AppError {
    AppError::new(crate::error::AppErrorKind::App, err.to_string())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

async fn load_quiz(store: &Arc<dyn Store>, id: &str) -> Result<Quiz> {
    let store = store.clone();
    let id = id.to_string();
    let quiz = tokio::task::spawn_blocking(move || store.get_quiz(&id)).await??;
    quiz.ok_or_else(|| anyhow!("quiz not found"))
}

async fn persist_quiz(store: &Arc<dyn Store>, quiz: Quiz) -> Result<()> {
    let store = store.clone();
    tokio::task::spawn_blocking(move || store.save_quiz(&quiz)).await?
}

async fn discard_quiz(store: &Arc<dyn Store>, id: &str) -> Result<()> {
    let store = store.clone();
    let id = id.to_string();
    tokio::task::spawn_blocking(move || store.delete_quiz(&id)).await?
}

async fn parse_at(path: PathBuf, kind: crate::models::DocumentKind, section_default: String) -> Result<parser::ParsedDocument> {
    tokio::task::spawn_blocking(move || parser::parse_document(&path, kind, &section_default)).await?
}

/// Runs spec.md §4.6's seven steps for a single claimed job. A parser failure
/// (unreadable document, zero questions) is terminal: the source file and the
/// Quiz record are both deleted, and the error carries `AppErrorKind::Parser`
/// so the worker can recognize it as non-retryable (§7 — only a parser error
/// is fatal to the job). Provider exhaustion is not terminal — unanswered
/// questions fall back to `"A"` and the quiz still completes.
pub async fn process_job(
    payload: &JobPayload,
    store: &Arc<dyn Store>,
    cache: &crate::cache::CacheStore,
    providers: &[ProviderSlot],
    orchestrator_chunk_size: usize,
    section_default: &str,
    file_storage: &Arc<dyn FileStorage>,
) -> std::result::Result<(), AppError> {
    let mut quiz = load_quiz(store, &payload.quiz_id).await.map_err(to_app_error)?;

    quiz.state = QuizState::Processing;
    quiz.updated_at = now_ms();
    persist_quiz(store, quiz.clone()).await.map_err(to_app_error)?;

    let local_path = payload
        .document_url
        .strip_prefix("file://")
        .unwrap_or(&payload.document_url);
    let path = PathBuf::from(local_path);
    let kind = quiz.document_kind;

    let parsed = match parse_at(path.clone(), kind, section_default.to_string()).await {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(quiz_id = %quiz.id, error = %err, "parser failed, discarding quiz");
            let _ = std::fs::remove_file(&path);
            if let Err(discard_err) = discard_quiz(store, &quiz.id).await {
                warn!(quiz_id = %quiz.id, error = %discard_err, "failed to discard quiz after parser failure");
            }
            return Err(AppError::parser(err.to_string()));
        }
    };

    // Questions with an explicit visual mark already carry their answer; only
    // the rest go to the orchestrator (spec.md §4.6 step 3).
    let to_solve: Vec<ParsedQuestion> = parsed
        .questions
        .iter()
        .cloned()
        .filter(|q| !(q.style_detected && !q.correct_answer_key.is_empty()))
        .collect();

    let orchestrator_result =
        orchestrator::solve_questions(&to_solve, providers, cache, orchestrator_chunk_size).await;

    let mut section_order: Vec<String> = Vec::new();
    let mut section_counts: HashMap<String, usize> = HashMap::new();
    let mut questions = Vec::with_capacity(parsed.questions.len());

    for pq in &parsed.questions {
        let (correct_answer_key, explanation, source) =
            if pq.style_detected && !pq.correct_answer_key.is_empty() {
                (pq.correct_answer_key.clone(), None, AnswerSource::StyleDetected)
            } else if let Some(answer) = orchestrator_result.answers.get(&pq.index) {
                (answer.correct_key.clone(), answer.explanation.clone(), AnswerSource::AiGenerated)
            } else {
                ("A".to_string(), None, AnswerSource::AiGenerated)
            };

        if !section_counts.contains_key(&pq.section) {
            section_order.push(pq.section.clone());
        }
        *section_counts.entry(pq.section.clone()).or_insert(0) += 1;

        questions.push(Question {
            index: pq.index,
            stem: pq.stem.clone(),
            choices: pq
                .choices
                .iter()
                .map(|c| Choice {
                    key: c.key,
                    text: c.text.clone(),
                    is_visually_marked: c.is_visually_marked,
                })
                .collect(),
            correct_answer_key,
            explanation,
            source,
            section: pq.section.clone(),
        });
    }

    quiz.total_questions = questions.len();
    quiz.processed_questions = questions.len();
    quiz.questions = questions;
    quiz.section_counts = section_order
        .iter()
        .map(|name| SectionCount {
            name: name.clone(),
            count: section_counts[name],
        })
        .collect();
    quiz.sections = section_order;
    quiz.state = QuizState::Completed;
    quiz.updated_at = now_ms();

    if let Err(err) = quiz.check_invariants() {
        warn!(quiz_id = %quiz.id, error = %err, "quiz failed invariant check before persisting");
    }

    persist_quiz(store, quiz.clone()).await.map_err(to_app_error)?;
    migrate_to_remote_storage(quiz, &path, store, file_storage).await;

    Ok(())
}

/// Best-effort step 7: moving the source document off local disk once the
/// quiz is answered. Failure here is a warning, not a pipeline failure — the
/// quiz is already complete and the local file is still a valid source.
async fn migrate_to_remote_storage(
    quiz: Quiz,
    local_path: &Path,
    store: &Arc<dyn Store>,
    file_storage: &Arc<dyn FileStorage>,
) {
    if !local_path.exists() {
        return;
    }
    let name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document");

    match file_storage.upload_file(local_path, name, "application/octet-stream").await {
        Ok(uploaded) => {
            let mut quiz = quiz;
            quiz.source_document = uploaded.url;
            quiz.updated_at = now_ms();
            let quiz_id = quiz.id.clone();
            if let Err(err) = persist_quiz(store, quiz).await {
                warn!(quiz_id = %quiz_id, error = %err, "failed to persist migrated source_document");
                return;
            }
            if let Err(err) = std::fs::remove_file(local_path) {
                warn!(quiz_id = %quiz_id, error = %err, "failed to delete local file after migration");
            }
        }
        Err(err) => {
            warn!(quiz_id = %quiz.id, error = %err, "file storage migration failed, keeping local file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_storage::LocalFileStorage;
    use crate::models::{DocumentKind, QuizState};
    use crate::providers::{BatchResult, Provider, ProviderQuestion, RateLimitStatus};
    use crate::storage::SqliteStore;
    use async_trait::async_trait;
    use std::io::Write;

    fn leaked_tempdir() -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        std::mem::forget(dir);
        path
    }

    fn new_store() -> Arc<dyn Store> {
        let root = leaked_tempdir();
        Arc::new(SqliteStore::new(root.join("t.db").to_string_lossy().to_string()))
    }

    fn sample_quiz(id: &str, source: &str) -> Quiz {
        Quiz {
            id: id.to_string(),
            title: "Sample".into(),
            source_document: source.to_string(),
            document_kind: DocumentKind::TextLike,
            content_hash: "hash".into(),
            state: QuizState::Pending,
            total_questions: 0,
            processed_questions: 0,
            questions: vec![],
            sections: vec![],
            section_counts: vec![],
            created_by: "owner".into(),
            created_at: 0,
            updated_at: 0,
            deleted: false,
        }
    }

    struct AlwaysA;

    #[async_trait]
    impl Provider for AlwaysA {
        fn name(&self) -> &str {
            "Primary"
        }
        fn priority(&self) -> u8 {
            0
        }
        fn is_available(&self) -> bool {
            true
        }
        fn rate_limit_status(&self) -> RateLimitStatus {
            RateLimitStatus::default()
        }
        async fn solve_batch(&self, questions: &[ProviderQuestion]) -> BatchResult {
            let responses = questions.iter().map(|q| (q.index, "B".to_string())).collect();
            BatchResult {
                responses,
                provider: "Primary".to_string(),
                tokens_used: 5,
                duration_ms: 1,
                questions_answered: questions.len(),
                questions_failed: 0,
            }
        }
    }

    #[tokio::test]
    async fn test_process_job_completes_quiz_and_assigns_answers() {
        let root = leaked_tempdir();
        let store = new_store();
        store.ensure_initialized().unwrap();

        let mut doc = tempfile::NamedTempFile::new_in(&root).unwrap();
        writeln!(doc, "Câu 1: What is 2+2?\n A. 3\n B. 4\n C. 5\n").unwrap();
        let doc_path = doc.into_temp_path().keep().unwrap();

        let quiz = sample_quiz("quiz-1", &format!("file://{}", doc_path.display()));
        store.insert_quiz(&quiz).unwrap();

        let payload = JobPayload {
            quiz_id: "quiz-1".to_string(),
            document_url: quiz.source_document.clone(),
            document_type: "txt".to_string(),
        };

        let cache = crate::cache::CacheStore::new(store.clone());
        let providers = vec![ProviderSlot {
            provider: Arc::new(AlwaysA),
            max_retries: 1,
            max_batch_size: 30,
        }];
        let file_storage: Arc<dyn FileStorage> = Arc::new(LocalFileStorage::new(root.join("uploads")));

        process_job(&payload, &store, &cache, &providers, 30, "Nội dung chung", &file_storage)
            .await
            .unwrap();

        let saved = store.get_quiz("quiz-1").unwrap().unwrap();
        assert_eq!(saved.state, QuizState::Completed);
        assert_eq!(saved.total_questions, 1);
        assert_eq!(saved.questions[0].correct_answer_key, "B");
        assert_eq!(saved.section_counts.iter().map(|s| s.count).sum::<usize>(), 1);
    }

    #[tokio::test]
    async fn test_process_job_deletes_quiz_on_parser_failure() {
        let root = leaked_tempdir();
        let store = new_store();
        store.ensure_initialized().unwrap();

        let mut doc = tempfile::NamedTempFile::new_in(&root).unwrap();
        writeln!(doc, "just some prose, no questions here").unwrap();
        let doc_path = doc.into_temp_path().keep().unwrap();

        let quiz = sample_quiz("quiz-2", &format!("file://{}", doc_path.display()));
        store.insert_quiz(&quiz).unwrap();

        let payload = JobPayload {
            quiz_id: "quiz-2".to_string(),
            document_url: quiz.source_document.clone(),
            document_type: "txt".to_string(),
        };

        let cache = crate::cache::CacheStore::new(store.clone());
        let providers: Vec<ProviderSlot> = Vec::new();
        let file_storage: Arc<dyn FileStorage> = Arc::new(LocalFileStorage::new(root.join("uploads")));

        let result = process_job(&payload, &store, &cache, &providers, 30, "Nội dung chung", &file_storage).await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), crate::error::AppErrorKind::Parser);
        assert!(store.get_quiz("quiz-2").unwrap().is_none());
        assert!(!doc_path.exists());
    }
}
