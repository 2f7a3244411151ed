// Semantic Cache (component C, spec.md §4.3): normalization laws plus a thin
// wrapper over the persistence layer's cache table.
use crate::hashing::hash_string;
use crate::models::CachedAnswer;
use crate::parser::ParsedQuestion;
use crate::storage::Store;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::warn;

static STEM_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:câu\s*\d+\.|\d+\.|[a-f]\.)\s*").unwrap());

/// Lowercase, strip a leading "câu <n>."/"<n>."/"<letter>." decoration,
/// remove all whitespace, and keep only Unicode letters and digits.
/// Idempotent and case/punctuation/whitespace invariant.
pub fn normalize_stem(stem: &str) -> String {
    let lower = stem.to_lowercase();
    let stripped = STEM_PREFIX_RE.replace(&lower, "");
    stripped.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Sort by key, lowercase + trim each choice's text, join with "|".
/// Permutation-invariant: reordering the input by key yields the same output.
pub fn normalize_choices(choices: &[(char, String)]) -> String {
    let mut sorted: Vec<(char, String)> = choices.to_vec();
    sorted.sort_by_key(|(key, _)| *key);
    sorted
        .into_iter()
        .map(|(_, text)| text.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join("|")
}

pub fn stem_hash(stem: &str) -> String {
    hash_string(&normalize_stem(stem))
}

pub fn choices_hash(choices: &[(char, String)]) -> String {
    hash_string(&normalize_choices(choices))
}

pub fn cache_keys(question: &ParsedQuestion) -> (String, String) {
    let choices: Vec<(char, String)> = question.choices.iter().map(|c| (c.key, c.text.clone())).collect();
    (stem_hash(&question.stem), choices_hash(&choices))
}

/// Best-effort lookup/write over the shared store. Failures degrade to a
/// miss (lookup) or are swallowed (write) — cache errors never fail a job.
pub struct CacheStore {
    store: Arc<dyn Store>,
}

impl CacheStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn lookup(&self, question: &ParsedQuestion) -> Option<CachedAnswer> {
        let (stem_hash, choices_hash) = cache_keys(question);
        match self.store.lookup_cached_answer(&stem_hash, &choices_hash) {
            Ok(found) => found,
            Err(err) => {
                warn!(error = %err, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    pub fn write(&self, answers: &[CachedAnswer]) {
        if answers.is_empty() {
            return;
        }
        if let Err(err) = self.store.write_cached_answers(answers) {
            warn!(error = %err, "cache writeback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_stem_is_idempotent_and_invariant() {
        let a = normalize_stem("Câu 1. What IS X?");
        let b = normalize_stem("what\nis  x");
        assert_eq!(a, b);
        assert_eq!(normalize_stem(&a), a);
    }

    #[test]
    fn test_normalize_choices_is_permutation_invariant() {
        let ordered = vec![('A', "3".to_string()), ('B', "4".to_string()), ('C', "5".to_string())];
        let shuffled = vec![('C', "5".to_string()), ('A', "3".to_string()), ('B', "4".to_string())];
        assert_eq!(normalize_choices(&ordered), normalize_choices(&shuffled));
    }

    #[test]
    fn test_normalize_choices_trims_and_lowercases() {
        let choices = vec![('A', "  Paris ".to_string()), ('B', "LONDON".to_string())];
        assert_eq!(normalize_choices(&choices), "paris|london");
    }
}
