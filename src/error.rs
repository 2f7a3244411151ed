// Closed sum type for errors, replacing the source's prototype-chain
// hierarchy (Design Notes §9). Grounded in the teacher's OrchestratorError.
use serde_json::{json, Value};

#[derive(Debug)]
pub struct AppError {
    kind: AppErrorKind,
    message: String,
    detail: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    BadRequest,
    NotAuthorized,
    Forbidden,
    NotFound,
    Conflict,
    TooManyRequests,
    App,
    Parser,
    ProviderRateLimit,
}

impl AppErrorKind {
    pub fn http_status(&self) -> u16 {
        match self {
            AppErrorKind::BadRequest => 400,
            AppErrorKind::NotAuthorized => 401,
            AppErrorKind::Forbidden => 403,
            AppErrorKind::NotFound => 404,
            AppErrorKind::Conflict => 409,
            AppErrorKind::TooManyRequests => 429,
            AppErrorKind::App => 500,
            AppErrorKind::Parser => 422,
            AppErrorKind::ProviderRateLimit => 429,
        }
    }
}

impl AppError {
    pub fn new(kind: AppErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn parser(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Parser, message)
    }

    pub fn provider_rate_limit(message: impl Into<String>, reset_at: i64) -> Self {
        Self::new(AppErrorKind::ProviderRateLimit, message)
            .with_detail(json!({ "reset_at": reset_at }))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::NotFound, message)
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "status": self.kind.http_status(),
            "message": self.message,
        });
        if let Some(detail) = &self.detail {
            if let Value::Object(ref mut map) = payload {
                map.insert("detail".to_string(), detail.clone());
            }
        }
        payload
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}
