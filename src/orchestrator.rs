// Orchestrator (component E, spec.md §4.5): cache-first lookup, chunking,
// per-provider fallback with retry/backoff, and cache writeback.
use crate::cache::{cache_keys, CacheStore};
use crate::models::CachedAnswer;
use crate::parser::ParsedQuestion;
use crate::providers::{Provider, ProviderQuestion};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

const CACHE_PROVIDER_LABEL: &str = "Cache";
const RETRY_BACKOFF_MS: u64 = 1000;

/// A provider plus its configured retry budget and batch cap — kept
/// alongside the trait object since `maxRetries`/batch size are per-adapter
/// configuration (spec.md §4.4.2), not adapter state.
pub struct ProviderSlot {
    pub provider: Arc<dyn Provider>,
    pub max_retries: u32,
    pub max_batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct OrchestratorAnswer {
    pub correct_key: String,
    pub explanation: Option<String>,
    pub confidence: Option<f32>,
    pub provider: String,
}

#[derive(Debug, Default)]
pub struct OrchestratorResult {
    pub answers: HashMap<usize, OrchestratorAnswer>,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub providers_used: Vec<String>,
    pub total_tokens: u64,
    pub failed_questions: usize,
}

pub async fn solve_questions(
    questions: &[ParsedQuestion],
    providers: &[ProviderSlot],
    cache: &CacheStore,
    chunk_size: usize,
) -> OrchestratorResult {
    let mut result = OrchestratorResult::default();
    if questions.is_empty() {
        return result;
    }

    let mut uncached: Vec<&ParsedQuestion> = Vec::new();
    for question in questions {
        match cache.lookup(question) {
            Some(cached) => {
                result.cache_hits += 1;
                result.answers.insert(
                    question.index,
                    OrchestratorAnswer {
                        correct_key: cached.correct_key,
                        explanation: cached.explanation,
                        confidence: cached.confidence,
                        provider: CACHE_PROVIDER_LABEL.to_string(),
                    },
                );
            }
            None => {
                result.cache_misses += 1;
                uncached.push(question);
            }
        }
    }
    if result.cache_hits > 0 {
        result.providers_used.push(CACHE_PROVIDER_LABEL.to_string());
    }

    let mut sorted_providers: Vec<&ProviderSlot> = providers.iter().collect();
    sorted_providers.sort_by_key(|slot| slot.provider.priority());

    for chunk in uncached.chunks(chunk_size.max(1)) {
        let mut remaining: HashMap<usize, &ParsedQuestion> = chunk.iter().map(|q| (q.index, *q)).collect();

        for slot in &sorted_providers {
            if remaining.is_empty() {
                break;
            }
            if !slot.provider.is_available() {
                continue;
            }

            let name = slot.provider.name().to_string();
            if !result.providers_used.contains(&name) {
                result.providers_used.push(name);
            }

            let mut retry_count = 0u32;
            loop {
                let answered_any =
                    try_solve_in_batches(slot, &mut remaining, cache, &mut result).await;

                if answered_any {
                    break;
                }

                if slot.provider.rate_limit_status().remaining == 0 {
                    break;
                }

                retry_count += 1;
                if retry_count > slot.max_retries {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(RETRY_BACKOFF_MS * retry_count as u64)).await;
            }
        }

        if !remaining.is_empty() {
            warn!(count = remaining.len(), "questions exhausted all providers, falling back to \"A\"");
        }
    }

    result.failed_questions = questions.len() - result.answers.len();
    result
}

/// Issues one or more `solve_batch` calls against `slot`, each capped to the
/// provider's configured `max_batch_size` (spec.md §4.4.2's per-adapter batch
/// size, e.g. last-resort's smaller batches vs. primary's ~40). Counts as a
/// single try for the caller's retry/backoff bookkeeping even though it may
/// issue several network calls. Returns whether at least one question was
/// answered across all sub-batches.
async fn try_solve_in_batches(
    slot: &ProviderSlot,
    remaining: &mut HashMap<usize, &ParsedQuestion>,
    cache: &CacheStore,
    result: &mut OrchestratorResult,
) -> bool {
    let cap = slot.max_batch_size.max(1);
    let indices: Vec<usize> = remaining.keys().copied().collect();
    let mut answered_any = false;

    for group in indices.chunks(cap) {
        let batch: Vec<ProviderQuestion> = group
            .iter()
            .filter_map(|i| remaining.get(i).map(|q| to_provider_question(q)))
            .collect();
        if batch.is_empty() {
            continue;
        }

        let batch_result = slot.provider.solve_batch(&batch).await;
        if batch_result.questions_answered > 0 {
            answered_any = true;
            record_answers(result, remaining, cache, &batch_result.responses, &batch_result.provider);
            result.total_tokens += batch_result.tokens_used;
            if !result.providers_used.contains(&batch_result.provider) {
                result.providers_used.push(batch_result.provider.clone());
            }
        }

        if slot.provider.rate_limit_status().remaining == 0 {
            break;
        }
    }

    answered_any
}

fn to_provider_question(q: &ParsedQuestion) -> ProviderQuestion {
    ProviderQuestion {
        index: q.index,
        section: q.section.clone(),
        stem: q.stem.clone(),
        choices: q.choices.iter().map(|c| (c.key, c.text.clone())).collect(),
    }
}

fn record_answers(
    result: &mut OrchestratorResult,
    remaining: &mut HashMap<usize, &ParsedQuestion>,
    cache: &CacheStore,
    responses: &HashMap<usize, String>,
    provider: &str,
) {
    let mut to_cache = Vec::new();
    for (index, answer_key) in responses {
        let Some(question) = remaining.remove(index) else { continue };
        result.answers.insert(
            *index,
            OrchestratorAnswer {
                correct_key: answer_key.clone(),
                explanation: None,
                confidence: None,
                provider: provider.to_string(),
            },
        );
        let (stem_hash, choices_hash) = cache_keys(question);
        let now = chrono::Utc::now().timestamp_millis();
        to_cache.push(CachedAnswer {
            stem_hash,
            choices_hash,
            correct_key: answer_key.clone(),
            explanation: None,
            confidence: None,
            provider: provider.to_string(),
            hit_count: 1,
            last_hit_at: now,
        });
    }
    cache.write(&to_cache);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParsedChoice;
    use crate::storage::{SqliteStore, Store};
    use async_trait::async_trait;
    use crate::providers::{BatchResult, RateLimitStatus};

    fn question(index: usize, stem: &str) -> ParsedQuestion {
        ParsedQuestion {
            index,
            stem: stem.to_string(),
            choices: vec![
                ParsedChoice { key: 'A', text: "3".into(), is_visually_marked: false },
                ParsedChoice { key: 'B', text: "4".into(), is_visually_marked: false },
            ],
            correct_answer_key: String::new(),
            section: "Nội dung chung".into(),
            style_detected: false,
        }
    }

    struct StubProvider {
        name: &'static str,
        priority: u8,
        answer: &'static str,
    }

    #[async_trait]
    impl Provider for StubProvider {
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
            RateLimitStatus::default()
        }
        async fn solve_batch(&self, questions: &[crate::providers::ProviderQuestion]) -> BatchResult {
            let responses = questions.iter().map(|q| (q.index, self.answer.to_string())).collect::<HashMap<_, _>>();
            BatchResult {
                responses,
                provider: self.name.to_string(),
                tokens_used: 10,
                duration_ms: 1,
                questions_answered: questions.len(),
                questions_failed: 0,
            }
        }
    }

    fn leaked_cache_store() -> CacheStore {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("t.db").to_string_lossy().to_string();
        std::mem::forget(dir); // keep the directory alive for the test's lifetime
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(db_path));
        CacheStore::new(store)
    }

    #[tokio::test]
    async fn test_all_cache_hits_issues_zero_provider_calls() {
        let cache = leaked_cache_store();
        let q = question(1, "What is 2+2?");
        cache.write(&[CachedAnswer {
            stem_hash: cache_keys(&q).0,
            choices_hash: cache_keys(&q).1,
            correct_key: "B".into(),
            explanation: None,
            confidence: None,
            provider: "Primary".into(),
            hit_count: 1,
            last_hit_at: 0,
        }]);

        let providers: Vec<ProviderSlot> = Vec::new();
        let result = solve_questions(&[q], &providers, &cache, 30).await;
        assert_eq!(result.cache_hits, 1);
        assert_eq!(result.cache_misses, 0);
        assert_eq!(result.providers_used, vec!["Cache".to_string()]);
        assert_eq!(result.answers[&1].correct_key, "B");
    }

    #[tokio::test]
    async fn test_primary_provider_answers_all_uncached() {
        let cache = leaked_cache_store();
        let questions = vec![question(1, "Q1"), question(2, "Q2")];
        let providers = vec![ProviderSlot {
            provider: Arc::new(StubProvider { name: "Primary", priority: 0, answer: "A" }),
            max_retries: 2,
            max_batch_size: 30,
        }];
        let result = solve_questions(&questions, &providers, &cache, 30).await;
        assert_eq!(result.failed_questions, 0);
        assert_eq!(result.providers_used, vec!["Primary".to_string()]);
        assert_eq!(result.answers[&1].correct_key, "A");
    }

    struct RateLimitedStub {
        name: &'static str,
        priority: u8,
    }

    #[async_trait]
    impl Provider for RateLimitedStub {
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
            RateLimitStatus { remaining: 0, reset_at: i64::MAX }
        }
        async fn solve_batch(&self, questions: &[crate::providers::ProviderQuestion]) -> BatchResult {
            BatchResult {
                provider: self.name.to_string(),
                questions_failed: questions.len(),
                ..Default::default()
            }
        }
    }

    #[tokio::test]
    async fn test_providers_used_includes_rate_limited_provider_that_answered_nothing() {
        let cache = leaked_cache_store();
        let questions = vec![question(1, "Q1")];
        let providers = vec![
            ProviderSlot {
                provider: Arc::new(RateLimitedStub { name: "Primary", priority: 0 }),
                max_retries: 2,
                max_batch_size: 30,
            },
            ProviderSlot {
                provider: Arc::new(StubProvider { name: "Secondary", priority: 1, answer: "D" }),
                max_retries: 2,
                max_batch_size: 30,
            },
        ];
        let result = solve_questions(&questions, &providers, &cache, 30).await;
        assert_eq!(result.providers_used, vec!["Primary".to_string(), "Secondary".to_string()]);
        assert_eq!(result.answers[&1].correct_key, "D");
    }

    #[tokio::test]
    async fn test_cache_hits_plus_misses_equals_total() {
        let cache = leaked_cache_store();
        let questions = vec![question(1, "Q1"), question(2, "Q2")];
        let providers = vec![ProviderSlot {
            provider: Arc::new(StubProvider { name: "Primary", priority: 0, answer: "A" }),
            max_retries: 2,
            max_batch_size: 30,
        }];
        let result = solve_questions(&questions, &providers, &cache, 30).await;
        assert_eq!(result.cache_hits + result.cache_misses, 2);
        assert_eq!(result.answers.len() + result.failed_questions, 2);
    }
}
