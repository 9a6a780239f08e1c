//! Skebby SMS: inbound JSON payloads and the outbound gateway API.

use async_trait::async_trait;
use serde::Deserialize;

use crate::message::{
    ChannelKind, DeliveryStatus, InboundMessage, ProviderKind, WebhookEvent,
};

use super::ensure_https;
use super::traits::OutboundSender;

/// Inbound JSON body. Delivery receipts carry `status` plus the `orderId`
/// assigned when the outbound message was accepted.
#[derive(Debug, Deserialize)]
pub struct SkebbyPayload {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "orderId", default)]
    pub order_id: Option<String>,
}

impl SkebbyPayload {
    pub fn into_event(self, service_number: &str) -> Option<WebhookEvent> {
        if let Some(status) = self.status {
            return Some(WebhookEvent::Status(DeliveryStatus {
                provider: ProviderKind::Skebby,
                message_id: self.order_id.unwrap_or_default(),
                status,
            }));
        }

        let phone = self.phone?;
        let message = self.message?;
        if message.trim().is_empty() {
            tracing::debug!("skebby: skipping empty message");
            return None;
        }

        let message_id = self
            .order_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Some(WebhookEvent::Message(InboundMessage::new(
            phone,
            service_number,
            message,
            ChannelKind::Sms,
            ProviderKind::Skebby,
            message_id,
        )))
    }
}

/// Outbound SMS via the Skebby gateway (JSON, user key + session key
/// headers from a prior login call, supplied through configuration).
pub struct SkebbySender {
    user_key: String,
    session_key: String,
    sender_id: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SkebbySendResponse {
    #[serde(rename = "order_id", default)]
    order_id: Option<String>,
}

impl SkebbySender {
    pub fn new(user_key: &str, session_key: &str, sender_id: &str, base_url: &str) -> Self {
        Self {
            user_key: user_key.to_string(),
            session_key: session_key.to_string(),
            sender_id: sender_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: super::twilio::http_client(),
        }
    }
}

#[async_trait]
impl OutboundSender for SkebbySender {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Skebby
    }

    fn channel(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(&self, recipient: &str, text: &str) -> anyhow::Result<String> {
        let url = format!("{}/sms", self.base_url);
        ensure_https(&url)?;

        let response = self
            .client
            .post(&url)
            .header("user_key", &self.user_key)
            .header("Session_key", &self.session_key)
            .json(&serde_json::json!({
                "message_type": "GP",
                "message": text,
                "recipient": [recipient],
                "sender": self.sender_id,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = crate::ai::sanitize_api_error(&response.text().await.unwrap_or_default());
            anyhow::bail!("Skebby API error ({status}): {detail}");
        }

        let parsed: SkebbySendResponse = response.json().await?;
        Ok(parsed
            .order_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn message_payload_normalizes() {
        let payload: SkebbyPayload =
            serde_json::from_str(r#"{"phone":"+393331234567","message":"Saldo?"}"#).unwrap();
        match payload.into_event("+390000").unwrap() {
            WebhookEvent::Message(msg) => {
                assert_eq!(msg.channel, ChannelKind::Sms);
                assert_eq!(msg.provider, ProviderKind::Skebby);
                assert_eq!(msg.to, "+390000");
            }
            WebhookEvent::Status(_) => panic!("expected message"),
        }
    }

    #[test]
    fn status_with_order_id_routes_to_status_path() {
        let payload: SkebbyPayload = serde_json::from_str(
            r#"{"phone":"+39333","message":"x","status":"DLVRD","orderId":"ORD1"}"#,
        )
        .unwrap();
        match payload.into_event("+390000").unwrap() {
            WebhookEvent::Status(status) => {
                assert_eq!(status.status, "DLVRD");
                assert_eq!(status.message_id, "ORD1");
            }
            WebhookEvent::Message(_) => panic!("expected status"),
        }
    }

    #[test]
    fn missing_phone_is_skipped() {
        let payload: SkebbyPayload = serde_json::from_str(r#"{"message":"x"}"#).unwrap();
        assert!(payload.into_event("+390000").is_none());
    }

    #[tokio::test]
    async fn send_uses_session_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sms"))
            .and(header("user_key", "uk"))
            .and(header("Session_key", "sk"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({"result": "OK", "order_id": "ORD9"})),
            )
            .mount(&server)
            .await;

        let sender = SkebbySender::new("uk", "sk", "Sportello", &server.uri());
        let id = sender.send("+393331234567", "Promemoria scadenza").await.unwrap();
        assert_eq!(id, "ORD9");
    }
}
