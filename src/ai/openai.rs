//! OpenAI-compatible chat completions backend.
//! Any API that speaks `/v1/chat/completions` works here, which covers the
//! hosted OpenAI endpoint as well as self-hosted gateways used in staging.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::sanitize_api_error;
use super::traits::{BackendError, ChatBackend, CompletionRequest};

pub struct OpenAiBackend {
    base_url: String,
    api_key: String,
    model: String,
    client: Client,
}

impl OpenAiBackend {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|error| {
                tracing::warn!("failed to build timeout client: {error}");
                Client::new()
            });

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
        }
    }

    /// Append `/chat/completions` unless the base URL already names the
    /// full endpoint (some gateways expose non-standard paths).
    fn chat_completions_url(&self) -> String {
        if self
            .base_url
            .trim_end_matches('/')
            .ends_with("/chat/completions")
        {
            self.base_url.clone()
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, BackendError> {
        let mut messages = Vec::new();
        if let Some(system) = request.system {
            messages.push(Message {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: request.prompt.to_string(),
        });

        let body = ApiChatRequest {
            model: self.model.clone(),
            messages,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(self.chat_completions_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|error| BackendError::Network(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(&response);
            return Err(BackendError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let detail = response
                .text()
                .await
                .map(|text| sanitize_api_error(&text))
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(BackendError::Api {
                status: status.as_u16(),
                detail,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|error| BackendError::Network(error.to_string()))?;
        let parsed: ApiChatResponse = serde_json::from_str(&text)
            .map_err(|error| BackendError::Malformed(format!("chat completions: {error}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| BackendError::Malformed("empty completion".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest<'static> {
        CompletionRequest {
            system: Some("You are a classifier."),
            prompt: "hello",
            temperature: 0.3,
        }
    }

    #[tokio::test]
    async fn returns_completion_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "ciao"}}]
            })))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(&format!("{}/v1", server.uri()), "test-key", "gpt-4o");
        let reply = backend.complete(request()).await.unwrap();
        assert_eq!(reply, "ciao");
    }

    #[tokio::test]
    async fn maps_429_to_rate_limited_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "5"))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(&format!("{}/v1", server.uri()), "k", "m");
        let err = backend.complete(request()).await.unwrap_err();
        match &err {
            BackendError::RateLimited { retry_after } => {
                assert_eq!(*retry_after, Some(Duration::from_secs(5)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn maps_server_error_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(&format!("{}/v1", server.uri()), "k", "m");
        let err = backend.complete(request()).await.unwrap_err();
        match &err {
            BackendError::Api { status, .. } => assert_eq!(*status, 500),
            other => panic!("expected Api, got {other:?}"),
        }
        assert!(!err.is_rate_limited());
    }

    #[tokio::test]
    async fn empty_choices_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(&format!("{}/v1", server.uri()), "k", "m");
        let err = backend.complete(request()).await.unwrap_err();
        assert!(matches!(err, BackendError::Malformed(_)));
    }

    #[test]
    fn url_appends_chat_completions_once() {
        let backend = OpenAiBackend::new("https://api.openai.com/v1", "k", "m");
        assert_eq!(
            backend.chat_completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );

        let explicit = OpenAiBackend::new("https://gw.internal/llm/chat/completions", "k", "m");
        assert_eq!(
            explicit.chat_completions_url(),
            "https://gw.internal/llm/chat/completions"
        );
    }
}
