// Shared mutable state for provider adapters (spec.md §4.4 "Common
// behaviors" / §9's "per-provider base class... an interface plus a shared
// helpers record"). Adapters hold one of these instead of inheriting state.
use super::RateLimitStatus;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const DEFAULT_RETRY_AFTER_S: i64 = 60;

pub struct ProviderHelpers {
    keys: Vec<String>,
    next_key_index: AtomicUsize,
    rate_limit: Mutex<RateLimitStatus>,
}

impl ProviderHelpers {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            next_key_index: AtomicUsize::new(0),
            rate_limit: Mutex::new(RateLimitStatus::default()),
        }
    }

    pub fn is_available(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Round-robin key selection. A benign race may skip or repeat a key
    /// under concurrent access, but never loses one (spec.md §5).
    pub fn next_key(&self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let index = self.next_key_index.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        Some(self.keys[index].as_str())
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        *self.rate_limit.lock()
    }

    /// Records a 429 (or equivalent) response; `retry_after_s` defaults to
    /// 60s when the provider didn't send one.
    pub fn record_rate_limited(&self, retry_after_s: Option<i64>) {
        let reset_at = Utc::now().timestamp() + retry_after_s.unwrap_or(DEFAULT_RETRY_AFTER_S);
        *self.rate_limit.lock() = RateLimitStatus { remaining: 0, reset_at };
    }

    /// Called after any non-429 response so a prior rate-limit mark doesn't
    /// stick around once the window has genuinely passed.
    pub fn record_success(&self) {
        let mut status = self.rate_limit.lock();
        if Utc::now().timestamp() >= status.reset_at {
            *status = RateLimitStatus::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_key_round_robins() {
        let helpers = ProviderHelpers::new(vec!["a".into(), "b".into()]);
        assert_eq!(helpers.next_key(), Some("a"));
        assert_eq!(helpers.next_key(), Some("b"));
        assert_eq!(helpers.next_key(), Some("a"));
    }

    #[test]
    fn test_no_keys_is_unavailable() {
        let helpers = ProviderHelpers::new(vec![]);
        assert!(!helpers.is_available());
        assert_eq!(helpers.next_key(), None);
    }

    #[test]
    fn test_record_rate_limited_zeroes_remaining() {
        let helpers = ProviderHelpers::new(vec!["a".into()]);
        helpers.record_rate_limited(Some(30));
        assert_eq!(helpers.rate_limit_status().remaining, 0);
    }
}
