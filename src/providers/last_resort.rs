// Last-resort adapter (spec.md §4.4.2.4): generic inference API, smaller
// batches, 120s retry-after on rate limit, modeled on the Hugging Face
// Inference API.
use super::{build_question_block, parse_answer_map, BatchResult, Provider, ProviderHelpers, ProviderQuestion, RateLimitStatus};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Instant;
use tracing::warn;

const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co/models";
const DEFAULT_MODEL: &str = "mistralai/Mistral-7B-Instruct-v0.2";
const RATE_LIMIT_RETRY_AFTER_S: i64 = 120;
const SYSTEM_INSTRUCTION: &str =
    "Answer with ONLY a JSON object mapping each question index to its single-letter answer.";

pub struct LastResortProvider {
    http: Client,
    helpers: ProviderHelpers,
    base_url: String,
    model: String,
    prompt_max_chars: usize,
}

impl LastResortProvider {
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
impl Provider for LastResortProvider {
    fn name(&self) -> &str {
        "LastResort"
    }

    fn priority(&self) -> u8 {
        3
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

        let prompt = format!("{SYSTEM_INSTRUCTION}\n\n{}", build_question_block(questions, self.prompt_max_chars));
        let url = format!("{}/{}", self.base_url, self.model);
        let body = json!({ "inputs": prompt });

        let response = match self.http.post(&url).bearer_auth(key).json(&body).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(provider = self.name(), error = %err, "request failed");
                return result;
            }
        };

        if response.status().as_u16() == 429 {
            self.helpers.record_rate_limited(Some(RATE_LIMIT_RETRY_AFTER_S));
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
        let content = body[0]["generated_text"].as_str().unwrap_or("");
        let answers = parse_answer_map(content);
        if answers.is_empty() {
            return result;
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result.questions_answered = answers.len();
        result.questions_failed = questions.len().saturating_sub(answers.len());
        result.responses = answers;
        result
    }
}
