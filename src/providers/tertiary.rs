// Tertiary adapter (spec.md §4.4.2.3): low-latency inference, same
// OpenAI-compatible batch interface, modeled on Groq's endpoint.
use super::{build_question_block, parse_answer_map, BatchResult, Provider, ProviderHelpers, ProviderQuestion, RateLimitStatus};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Instant;
use tracing::warn;

const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";
const SYSTEM_MESSAGE: &str = "Return ONLY JSON mapping each question index to its single-letter answer.";

pub struct TertiaryProvider {
    http: Client,
    helpers: ProviderHelpers,
    base_url: String,
    model: String,
    prompt_max_chars: usize,
}

impl TertiaryProvider {
    pub fn new(http: Client, api_keys: Vec<String>, base_url: Option<String>, model: Option<String>, prompt_max_chars: usize) -> Self {
        Self {
            http,
            helpers: ProviderHelpers::new(api_keys),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            prompt_max_chars,
        }
    }
}

#[async_trait]
impl Provider for TertiaryProvider {
    fn name(&self) -> &str {
        "Tertiary"
    }

    fn priority(&self) -> u8 {
        2
    }

    fn is_available(&self) -> bool {
        self.helpers.is_available()
    }

    fn rate_limit_status(&self) -> RateLimitStatus {
        self.helpers.rate_limit_status()
    }

    async fn solve_batch(&self, questions: &[ProviderQuestion]) -> BatchResult {
        let start = Instant::now();
        let mut result = BatchResult {
            provider: self.name().to_string(),
            questions_failed: questions.len(),
            ..Default::default()
        };

        let Some(key) = self.helpers.next_key() else {
            return result;
        };

        let user_message = build_question_block(questions, self.prompt_max_chars);
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_MESSAGE },
                { "role": "user", "content": user_message },
            ],
        });

        let response = match self.http.post(&url).bearer_auth(key).json(&body).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(provider = self.name(), error = %err, "request failed");
                return result;
            }
        };

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok());
            self.helpers.record_rate_limited(retry_after);
            return result;
        }
        if !response.status().is_success() {
            return result;
        }
        self.helpers.record_success();

        let body: serde_json::Value = match response.json().await {
            Ok(value) => value,
            Err(_) => return result,
        };
        let content = body["choices"][0]["message"]["content"].as_str().unwrap_or("");
        let answers = parse_answer_map(content);
        if answers.is_empty() {
            return result;
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result.tokens_used = body["usage"]["total_tokens"].as_u64().unwrap_or(0);
        result.questions_answered = answers.len();
        result.questions_failed = questions.len().saturating_sub(answers.len());
        result.responses = answers;
        result
    }
}
