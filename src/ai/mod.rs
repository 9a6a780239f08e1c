//! AI backend abstraction: intent classification and response drafting.

pub mod classify;
pub mod openai;
pub mod respond;
pub mod retry;
pub mod traits;

pub use classify::{Intent, IntentAnalysis, IntentClassifier, Urgency, AUTO_RESPONSE_CONFIDENCE};
pub use openai::OpenAiBackend;
pub use respond::ResponseGenerator;
pub use retry::RetryPolicy;
pub use traits::{BackendError, ChatBackend, CompletionRequest};

/// Cap logged API error bodies; provider errors can embed whole payloads.
const MAX_API_ERROR_CHARS: usize = 400;

/// Sanitize a provider error body before it reaches the log: drop anything
/// that looks like a bearer credential and cap the length.
pub fn sanitize_api_error(input: &str) -> String {
    let mut scrubbed = String::with_capacity(input.len());
    for word in input.split_whitespace() {
        if !scrubbed.is_empty() {
            scrubbed.push(' ');
        }
        if word.len() > 20 && word.chars().filter(|c| c.is_alphanumeric()).count() > 16 {
            scrubbed.push_str("[redacted]");
        } else {
            scrubbed.push_str(word);
        }
    }

    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }

    let mut end = MAX_API_ERROR_CHARS;
    while end > 0 && !scrubbed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &scrubbed[..end])
}
