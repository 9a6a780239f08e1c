use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// One completion call: an optional system prompt, a user prompt, and a
/// sampling temperature. Classification runs cold (0.3), generation warm
/// (0.7).
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: Option<&'a str>,
    pub prompt: &'a str,
    pub temperature: f64,
}

/// Errors are split into rate-limit (retryable with backoff) and everything
/// else (immediate abort); the distinction drives the retry loop.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("AI backend rate limited (429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("AI backend returned {status}: {detail}")]
    Api { status: u16, detail: String },

    #[error("AI backend unreachable: {0}")]
    Network(String),

    #[error("AI backend response malformed: {0}")]
    Malformed(String),
}

impl BackendError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, BackendError::RateLimited { .. })
    }
}

/// The AI backend seam. One implementation speaks the OpenAI-compatible
/// chat completions API; tests substitute mocks.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, BackendError>;
}
