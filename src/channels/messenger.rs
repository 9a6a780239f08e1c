//! Facebook Messenger: inbound page webhook payloads and the Graph send API.

use async_trait::async_trait;
use serde::Deserialize;

use crate::message::{ChannelKind, InboundMessage, ProviderKind, WebhookEvent};

use super::ensure_https;
use super::traits::OutboundSender;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0";

/// Page webhook envelope: `entry[].messaging[]`, each carrying an optional
/// `message`. Delivery/read events arrive in the same array without a
/// `message` object and are skipped.
#[derive(Debug, Deserialize)]
pub struct MessengerPayload {
    #[serde(default)]
    pub entry: Vec<MessengerEntry>,
}

#[derive(Debug, Deserialize)]
pub struct MessengerEntry {
    #[serde(default)]
    pub messaging: Vec<MessagingItem>,
}

#[derive(Debug, Deserialize)]
pub struct MessagingItem {
    pub sender: Option<MessengerParty>,
    pub recipient: Option<MessengerParty>,
    pub message: Option<MessengerMessage>,
}

#[derive(Debug, Deserialize)]
pub struct MessengerParty {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct MessengerMessage {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl MessengerPayload {
    /// One envelope can batch several messages; malformed items are skipped.
    pub fn into_events(self) -> Vec<WebhookEvent> {
        let mut events = Vec::new();
        for entry in self.entry {
            for item in entry.messaging {
                let Some(sender) = item.sender else { continue };
                let Some(message) = item.message else {
                    tracing::debug!("messenger: skipping non-message event");
                    continue;
                };
                let Some(text) = message.text.filter(|t| !t.trim().is_empty()) else {
                    tracing::debug!("messenger: skipping non-text message");
                    continue;
                };

                let message_id = message
                    .mid
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let to = item.recipient.map(|r| r.id).unwrap_or_default();

                events.push(WebhookEvent::Message(InboundMessage::new(
                    sender.id,
                    to,
                    text,
                    ChannelKind::Messenger,
                    ProviderKind::Facebook,
                    message_id,
                )));
            }
        }
        events
    }
}

/// Outbound Messenger via the Graph send API (JSON, page access token as a
/// query parameter per the Graph convention).
pub struct MessengerSender {
    page_access_token: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MessengerSendResponse {
    #[serde(default)]
    message_id: Option<String>,
}

impl MessengerSender {
    pub fn new(page_access_token: &str) -> Self {
        Self::with_base_url(page_access_token, GRAPH_API_BASE)
    }

    pub fn with_base_url(page_access_token: &str, base_url: &str) -> Self {
        Self {
            page_access_token: page_access_token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: super::twilio::http_client(),
        }
    }
}

#[async_trait]
impl OutboundSender for MessengerSender {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Facebook
    }

    fn channel(&self) -> ChannelKind {
        ChannelKind::Messenger
    }

    async fn send(&self, recipient: &str, text: &str) -> anyhow::Result<String> {
        let url = format!("{}/me/messages", self.base_url);
        ensure_https(&url)?;

        let response = self
            .client
            .post(&url)
            .query(&[("access_token", self.page_access_token.as_str())])
            .json(&serde_json::json!({
                "recipient": { "id": recipient },
                "message": { "text": text },
                "messaging_type": "RESPONSE",
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = crate::ai::sanitize_api_error(&response.text().await.unwrap_or_default());
            anyhow::bail!("Messenger API error ({status}): {detail}");
        }

        let parsed: MessengerSendResponse = response.json().await?;
        Ok(parsed
            .message_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()))
    }
}
