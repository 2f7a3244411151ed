// End-to-end pipeline scenarios (spec.md §8), exercised against the public
// crate API with an in-process SQLite store and stub providers standing in
// for the external HTTP backends.
use async_trait::async_trait;
use quizforge::cache::{cache_keys, normalize_choices, normalize_stem, CacheStore};
use quizforge::file_storage::{FileStorage, LocalFileStorage};
use quizforge::models::{CachedAnswer, DocumentKind, JobPayload, Quiz, QuizState};
use quizforge::orchestrator::ProviderSlot;
use quizforge::pipeline::process_job;
use quizforge::providers::{BatchResult, Provider, ProviderQuestion, RateLimitStatus};
use quizforge::storage::{SqliteStore, Store};
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn new_store() -> Arc<dyn Store> {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("e2e.db").to_string_lossy().to_string();
    std::mem::forget(dir);
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(db_path));
    store.ensure_initialized().unwrap();
    store
}

fn pending_quiz(id: &str, source: &str) -> Quiz {
    Quiz {
        id: id.to_string(),
        title: "Sample quiz".to_string(),
        source_document: source.to_string(),
        document_kind: DocumentKind::TextLike,
        content_hash: "hash".to_string(),
        state: QuizState::Pending,
        total_questions: 0,
        processed_questions: 0,
        questions: Vec::new(),
        sections: Vec::new(),
        section_counts: Vec::new(),
        created_by: "owner".to_string(),
        created_at: 0,
        updated_at: 0,
        deleted: false,
    }
}

fn write_fixture(contents: &str) -> std::path::PathBuf {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file.into_temp_path().keep().unwrap()
}

fn local_file_storage() -> Arc<dyn FileStorage> {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("uploads");
    std::mem::forget(dir);
    Arc::new(LocalFileStorage::new(root))
}

/// Scenario 1: a pure-cache hit issues zero provider calls and completes the
/// quiz with `providersUsed == ["Cache"]` (verified indirectly: no providers
/// are configured at all, yet the quiz still completes with the cached key).
#[tokio::test]
async fn test_pure_cache_hit_completes_with_no_providers_configured() {
    let store = new_store();
    let cache = Arc::new(CacheStore::new(store.clone()));

    let stem_hash = normalize_stem("What is 2+2?");
    let choices_hash = normalize_choices(&[
        ('A', "3".to_string()),
        ('B', "4".to_string()),
        ('C', "5".to_string()),
        ('D', "6".to_string()),
    ]);
    // `normalize_stem`/`normalize_choices` return the normalized text, not the
    // hash; hash them the same way `cache_keys` does so the seeded row's key
    // matches what the pipeline will compute for this exact document.
    let stem_hash = quizforge::hashing::hash_string(&stem_hash);
    let choices_hash = quizforge::hashing::hash_string(&choices_hash);

    cache.write(&[CachedAnswer {
        stem_hash,
        choices_hash,
        correct_key: "B".to_string(),
        explanation: None,
        confidence: None,
        provider: "Primary".to_string(),
        hit_count: 0,
        last_hit_at: 0,
    }]);

    let doc_path = write_fixture("Câu 1: What is 2+2?\n A. 3\n B. 4\n C. 5\n D. 6\n");
    let quiz = pending_quiz("quiz-cache-hit", &format!("file://{}", doc_path.display()));
    store.insert_quiz(&quiz).unwrap();

    let payload = JobPayload {
        quiz_id: quiz.id.clone(),
        document_url: quiz.source_document.clone(),
        document_type: "txt".to_string(),
    };
    let providers: Vec<ProviderSlot> = Vec::new();
    let file_storage = local_file_storage();

    process_job(&payload, &store, &cache, &providers, 30, "Nội dung chung", &file_storage)
        .await
        .unwrap();

    let saved = store.get_quiz(&quiz.id).unwrap().unwrap();
    assert_eq!(saved.state, QuizState::Completed);
    assert_eq!(saved.questions[0].correct_answer_key, "B");
}

struct CountingRateLimitedThenAnswering {
    name: &'static str,
    priority: u8,
    calls: AtomicU32,
    fail_calls: u32,
    answer: &'static str,
}

#[async_trait]
impl Provider for CountingRateLimitedThenAnswering {
    fn name(&self) -> &str {
        self.name
    }
    fn priority(&self) -> u8 {
        self.priority
    }
    fn is_available(&self) -> bool {
        true
    }
    fn rate_limit_status(&self) -> RateLimitStatus {
        let calls = self.calls.load(Ordering::SeqCst);
        if calls < self.fail_calls {
            RateLimitStatus { remaining: 0, reset_at: i64::MAX }
        } else {
            RateLimitStatus { remaining: 1, reset_at: 0 }
        }
    }
    async fn solve_batch(&self, questions: &[ProviderQuestion]) -> BatchResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_calls {
            return BatchResult {
                provider: self.name.to_string(),
                questions_failed: questions.len(),
                ..Default::default()
            };
        }
        let responses = questions.iter().map(|q| (q.index, self.answer.to_string())).collect();
        BatchResult {
            responses,
            provider: self.name.to_string(),
            tokens_used: 3,
            duration_ms: 1,
            questions_answered: questions.len(),
            questions_failed: 0,
        }
    }
}

/// Scenario 3: primary is rate-limited on the first call, so the orchestrator
/// falls through to secondary without sleeping once `rateLimitStatus.remaining
/// == 0`.
#[tokio::test]
async fn test_primary_rate_limited_secondary_covers() {
    let store = new_store();
    let cache = Arc::new(CacheStore::new(store.clone()));

    let doc_path = write_fixture("Câu 1: Rate limited question?\n A. X\n B. Y\n");
    let quiz = pending_quiz("quiz-rate-limit", &format!("file://{}", doc_path.display()));
    store.insert_quiz(&quiz).unwrap();

    let primary = Arc::new(CountingRateLimitedThenAnswering {
        name: "Primary",
        priority: 0,
        calls: AtomicU32::new(0),
        fail_calls: 1,
        answer: "A",
    });
    let secondary = Arc::new(CountingRateLimitedThenAnswering {
        name: "Secondary",
        priority: 1,
        calls: AtomicU32::new(0),
        fail_calls: 0,
        answer: "D",
    });
    let providers = vec![
        ProviderSlot { provider: primary, max_retries: 2, max_batch_size: 30 },
        ProviderSlot { provider: secondary, max_retries: 2, max_batch_size: 30 },
    ];
    let file_storage = local_file_storage();

    let payload = JobPayload {
        quiz_id: quiz.id.clone(),
        document_url: quiz.source_document.clone(),
        document_type: "txt".to_string(),
    };
    process_job(&payload, &store, &cache, &providers, 30, "Nội dung chung", &file_storage)
        .await
        .unwrap();

    let saved = store.get_quiz(&quiz.id).unwrap().unwrap();
    assert_eq!(saved.questions[0].correct_answer_key, "D");
}

struct AlwaysFails {
    priority: u8,
}

#[async_trait]
impl Provider for AlwaysFails {
    fn name(&self) -> &str {
        "Flaky"
    }
    fn priority(&self) -> u8 {
        self.priority
    }
    fn is_available(&self) -> bool {
        true
    }
    fn rate_limit_status(&self) -> RateLimitStatus {
        RateLimitStatus::default()
    }
    async fn solve_batch(&self, questions: &[ProviderQuestion]) -> BatchResult {
        BatchResult {
            provider: self.name().to_string(),
            questions_failed: questions.len(),
            ..Default::default()
        }
    }
}

/// Scenario 5: every provider exhausts retries for a question; it falls back
/// to `"A"` labelled `AI_Generated`, and the quiz still reaches Completed
/// with `processedQuestions == totalQuestions`.
#[tokio::test]
async fn test_all_providers_exhausted_falls_back_to_literal_a() {
    let store = new_store();
    let cache = Arc::new(CacheStore::new(store.clone()));

    let doc_path = write_fixture(
        "Câu 1: First unanswerable question here?\n A. X\n B. Y\n\nCâu 2: Second unanswerable question here?\n A. X\n B. Y\n",
    );
    let quiz = pending_quiz("quiz-exhausted", &format!("file://{}", doc_path.display()));
    store.insert_quiz(&quiz).unwrap();

    let providers = vec![ProviderSlot { provider: Arc::new(AlwaysFails { priority: 0 }), max_retries: 1, max_batch_size: 30 }];
    let file_storage = local_file_storage();

    let payload = JobPayload {
        quiz_id: quiz.id.clone(),
        document_url: quiz.source_document.clone(),
        document_type: "txt".to_string(),
    };
    process_job(&payload, &store, &cache, &providers, 30, "Nội dung chung", &file_storage)
        .await
        .unwrap();

    let saved = store.get_quiz(&quiz.id).unwrap().unwrap();
    assert_eq!(saved.state, QuizState::Completed);
    assert_eq!(saved.processed_questions, saved.total_questions);
    for question in &saved.questions {
        assert_eq!(question.correct_answer_key, "A");
        assert_eq!(question.source.as_str(), "AI_Generated");
    }
}

/// `cache_keys` is deterministic and content-addressed: the same question
/// computed twice yields the same (stemHash, choicesHash) pair.
#[test]
fn test_cache_keys_are_deterministic() {
    let question = quizforge::parser::ParsedQuestion {
        index: 1,
        stem: "What is the capital of France?".to_string(),
        choices: vec![
            quizforge::parser::ParsedChoice { key: 'A', text: "Paris".to_string(), is_visually_marked: false },
            quizforge::parser::ParsedChoice { key: 'B', text: "London".to_string(), is_visually_marked: false },
        ],
        correct_answer_key: String::new(),
        section: "Nội dung chung".to_string(),
        style_detected: false,
    };
    assert_eq!(cache_keys(&question), cache_keys(&question));
}
