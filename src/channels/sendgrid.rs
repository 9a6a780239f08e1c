//! SendGrid email: inbound-parse payloads and the outbound v3 mail-send API.

use async_trait::async_trait;
use serde::Deserialize;

use crate::message::{ChannelKind, InboundMessage, ProviderKind, WebhookEvent};

use super::ensure_https;
use super::traits::OutboundSender;

const SENDGRID_API_BASE: &str = "https://api.sendgrid.com/v3";

/// Inbound-parse JSON body. Email has no status variant here; delivery
/// events arrive on a different SendGrid webhook outside this scope.
#[derive(Debug, Deserialize)]
pub struct SendGridPayload {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl SendGridPayload {
    pub fn into_event(self) -> Option<WebhookEvent> {
        let from = self.from?;

        // Prefer the plaintext part; fall back to the subject line so a
        // subject-only email still reaches the pipeline.
        let body = self
            .text
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.subject.clone().filter(|s| !s.trim().is_empty()))?;

        Some(WebhookEvent::Message(InboundMessage::new(
            from,
            self.to.unwrap_or_default(),
            body.trim(),
            ChannelKind::Email,
            ProviderKind::SendGrid,
            uuid::Uuid::new_v4().to_string(),
        )))
    }
}

/// Outbound email via the SendGrid v3 mail-send API (JSON, bearer token).
pub struct SendGridSender {
    api_key: String,
    from_address: String,
    base_url: String,
    client: reqwest::Client,
}

impl SendGridSender {
    pub fn new(api_key: &str, from_address: &str) -> Self {
        Self::with_base_url(api_key, from_address, SENDGRID_API_BASE)
    }

    pub fn with_base_url(api_key: &str, from_address: &str, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            from_address: from_address.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: super::twilio::http_client(),
        }
    }
}

#[async_trait]
impl OutboundSender for SendGridSender {
    fn provider(&self) -> ProviderKind {
        ProviderKind::SendGrid
    }

    fn channel(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, recipient: &str, text: &str) -> anyhow::Result<String> {
        let url = format!("{}/mail/send", self.base_url);
        ensure_https(&url)?;

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "personalizations": [{ "to": [{ "email": recipient }] }],
                "from": { "email": self.from_address },
                "subject": "Sportello",
                "content": [{ "type": "text/plain", "value": text }],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = crate::ai::sanitize_api_error(&response.text().await.unwrap_or_default());
            anyhow::bail!("SendGrid API error ({status}): {detail}");
        }

        // Mail-send returns 202 with no body; the message id rides in a header.
        let id = response
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Ok(id)
    }
}
