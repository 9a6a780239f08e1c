//! Twilio WhatsApp: inbound form payloads and the outbound Messages API.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::message::{
    ChannelKind, DeliveryStatus, InboundMessage, ProviderKind, WebhookEvent,
};

use super::ensure_https;
use super::traits::OutboundSender;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Inbound webhook form body. Twilio posts both fresh messages and delivery
/// receipts to the same URL; `SmsStatus` marks the receipt variant and wins
/// even when `Body`/`From` ride along.
#[derive(Debug, Deserialize)]
pub struct TwilioPayload {
    #[serde(rename = "MessageSid")]
    pub message_sid: String,
    #[serde(rename = "From", default)]
    pub from: Option<String>,
    #[serde(rename = "To", default)]
    pub to: Option<String>,
    #[serde(rename = "Body", default)]
    pub body: Option<String>,
    #[serde(rename = "SmsStatus", default)]
    pub sms_status: Option<String>,
}

/// Twilio prefixes WhatsApp addresses with `whatsapp:`.
fn strip_whatsapp_prefix(addr: &str) -> &str {
    addr.strip_prefix("whatsapp:").unwrap_or(addr)
}

impl TwilioPayload {
    pub fn into_event(self) -> Option<WebhookEvent> {
        if let Some(status) = self.sms_status {
            return Some(WebhookEvent::Status(DeliveryStatus {
                provider: ProviderKind::Twilio,
                message_id: self.message_sid,
                status,
            }));
        }

        let from = self.from?;
        let body = self.body?;
        if body.trim().is_empty() {
            tracing::debug!(sid = %self.message_sid, "twilio: skipping empty body");
            return None;
        }

        Some(WebhookEvent::Message(InboundMessage::new(
            strip_whatsapp_prefix(&from),
            strip_whatsapp_prefix(self.to.as_deref().unwrap_or_default()),
            body,
            ChannelKind::Whatsapp,
            ProviderKind::Twilio,
            self.message_sid,
        )))
    }
}

/// Outbound WhatsApp via the Twilio Messages API (form-encoded, basic auth).
pub struct TwilioWhatsAppSender {
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TwilioSendResponse {
    sid: String,
}

impl TwilioWhatsAppSender {
    pub fn new(account_sid: &str, auth_token: &str, from_number: &str) -> Self {
        Self::with_base_url(account_sid, auth_token, from_number, TWILIO_API_BASE)
    }

    pub fn with_base_url(
        account_sid: &str,
        auth_token: &str,
        from_number: &str,
        base_url: &str,
    ) -> Self {
        Self {
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            from_number: from_number.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/Accounts/{}/Messages.json", self.base_url, self.account_sid)
    }
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|error| {
            tracing::warn!("failed to build timeout client: {error}");
            reqwest::Client::new()
        })
}

#[async_trait]
impl OutboundSender for TwilioWhatsAppSender {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Twilio
    }

    fn channel(&self) -> ChannelKind {
        ChannelKind::Whatsapp
    }

    async fn send(&self, recipient: &str, text: &str) -> anyhow::Result<String> {
        let url = self.messages_url();
        ensure_https(&url)?;

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("From", format!("whatsapp:{}", self.from_number)),
                ("To", format!("whatsapp:{recipient}")),
                ("Body", text.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = crate::ai::sanitize_api_error(&response.text().await.unwrap_or_default());
            anyhow::bail!("Twilio API error ({status}): {detail}");
        }

        let parsed: TwilioSendResponse = response.json().await?;
        Ok(parsed.sid)
    }
}
