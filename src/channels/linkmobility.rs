//! LinkMobility WhatsApp: inbound JSON payloads and the outbound REST API.

use async_trait::async_trait;
use serde::Deserialize;

use crate::message::{
    ChannelKind, DeliveryStatus, InboundMessage, ProviderKind, WebhookEvent,
};

use super::ensure_https;
use super::traits::OutboundSender;

/// Inbound JSON body. Messages and delivery receipts share the endpoint;
/// `status` marks the receipt variant.
#[derive(Debug, Deserialize)]
pub struct LinkMobilityPayload {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(rename = "messageId", default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl LinkMobilityPayload {
    pub fn into_event(self) -> Option<WebhookEvent> {
        // Dedup needs a stable id; the gateway occasionally omits one.
        let message_id = self
            .message_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if let Some(status) = self.status {
            return Some(WebhookEvent::Status(DeliveryStatus {
                provider: ProviderKind::LinkMobility,
                message_id,
                status,
            }));
        }

        let sender = self.sender?;
        let message = self.message?;
        if message.trim().is_empty() {
            tracing::debug!("linkmobility: skipping empty message");
            return None;
        }

        Some(WebhookEvent::Message(InboundMessage::new(
            sender,
            self.recipient.unwrap_or_default(),
            message,
            ChannelKind::Whatsapp,
            ProviderKind::LinkMobility,
            message_id,
        )))
    }
}

/// Outbound WhatsApp via the LinkMobility REST API (JSON, bearer token).
pub struct LinkMobilitySender {
    api_key: String,
    sender_id: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct LinkMobilitySendResponse {
    #[serde(rename = "messageId", default)]
    message_id: Option<String>,
}

impl LinkMobilitySender {
    pub fn new(api_key: &str, sender_id: &str, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            sender_id: sender_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: super::twilio::http_client(),
        }
    }
}

#[async_trait]
impl OutboundSender for LinkMobilitySender {
    fn provider(&self) -> ProviderKind {
        ProviderKind::LinkMobility
    }

    fn channel(&self) -> ChannelKind {
        ChannelKind::Whatsapp
    }

    async fn send(&self, recipient: &str, text: &str) -> anyhow::Result<String> {
        let url = format!("{}/messages", self.base_url);
        ensure_https(&url)?;

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "sender": self.sender_id,
                "recipient": recipient,
                "channel": "whatsapp",
                "content": { "text": text },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = crate::ai::sanitize_api_error(&response.text().await.unwrap_or_default());
            anyhow::bail!("LinkMobility API error ({status}): {detail}");
        }

        let parsed: LinkMobilitySendResponse = response.json().await?;
        Ok(parsed
            .message_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn message_payload_normalizes() {
        let payload: LinkMobilityPayload = serde_json::from_str(
            r#"{"message":"Ciao","sender":"+393331234567","recipient":"+390212345678","messageId":"LM1"}"#,
        )
        .unwrap();
        match payload.into_event().unwrap() {
            WebhookEvent::Message(msg) => {
                assert_eq!(msg.provider, ProviderKind::LinkMobility);
                assert_eq!(msg.channel, ChannelKind::Whatsapp);
                assert_eq!(msg.message_id, "LM1");
                assert_eq!(msg.from, "+393331234567");
            }
            WebhookEvent::Status(_) => panic!("expected message"),
        }
    }

    #[test]
    fn status_field_routes_to_status_path() {
        let payload: LinkMobilityPayload = serde_json::from_str(
            r#"{"message":"Ciao","sender":"+39333","status":"DELIVERED","messageId":"LM2"}"#,
        )
        .unwrap();
        assert!(matches!(
            payload.into_event().unwrap(),
            WebhookEvent::Status(DeliveryStatus { ref status, .. }) if status == "DELIVERED"
        ));
    }

    #[test]
    fn missing_message_id_gets_generated() {
        let payload: LinkMobilityPayload =
            serde_json::from_str(r#"{"message":"Ciao","sender":"+39333"}"#).unwrap();
        match payload.into_event().unwrap() {
            WebhookEvent::Message(msg) => assert!(!msg.message_id.is_empty()),
            WebhookEvent::Status(_) => panic!("expected message"),
        }
    }

    #[test]
    fn missing_sender_is_skipped() {
        let payload: LinkMobilityPayload =
            serde_json::from_str(r#"{"message":"Ciao"}"#).unwrap();
        assert!(payload.into_event().is_none());
    }

    #[tokio::test]
    async fn send_posts_json_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("Authorization", "Bearer lm-key"))
            .and(body_string_contains("whatsapp"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"messageId": "LM77"})),
            )
            .mount(&server)
            .await;

        let sender = LinkMobilitySender::new("lm-key", "Sportello", &server.uri());
        let id = sender.send("+393331234567", "Ciao").await.unwrap();
        assert_eq!(id, "LM77");
    }
}
