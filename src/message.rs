//! Canonical message types shared by every channel.
//!
//! Providers speak five different wire formats; normalization happens at the
//! gateway boundary and everything downstream of it sees only these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard ceiling on outbound reply length. SMS and WhatsApp-compatible
/// channels reject longer bodies, and a truncated financial message is worse
/// than no message, so oversized drafts are discarded outright.
pub const MAX_REPLY_CHARS: usize = 160;

/// Logical channel a message travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Whatsapp,
    Sms,
    Email,
    Messenger,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Whatsapp => "whatsapp",
            ChannelKind::Sms => "sms",
            ChannelKind::Email => "email",
            ChannelKind::Messenger => "messenger",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External communication provider that originated or carries a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Twilio,
    #[serde(rename = "linkmobility")]
    LinkMobility,
    Skebby,
    #[serde(rename = "sendgrid")]
    SendGrid,
    Facebook,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Twilio => "twilio",
            ProviderKind::LinkMobility => "linkmobility",
            ProviderKind::Skebby => "skebby",
            ProviderKind::SendGrid => "sendgrid",
            ProviderKind::Facebook => "facebook",
        }
    }

    /// The channel a provider natively carries, used when a caller (e.g. the
    /// notification rule engine) selects only a provider.
    pub fn default_channel(self) -> ChannelKind {
        match self {
            ProviderKind::Twilio | ProviderKind::LinkMobility => ChannelKind::Whatsapp,
            ProviderKind::Skebby => ChannelKind::Sms,
            ProviderKind::SendGrid => ChannelKind::Email,
            ProviderKind::Facebook => ChannelKind::Messenger,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound message, normalized from a provider payload. Immutable once
/// constructed; exactly one instance per webhook delivery.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub from: String,
    pub to: String,
    pub body: String,
    pub channel: ChannelKind,
    pub provider: ProviderKind,
    pub message_id: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        body: impl Into<String>,
        channel: ChannelKind,
        provider: ProviderKind,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            body: body.into(),
            channel,
            provider,
            message_id: message_id.into(),
            received_at: Utc::now(),
        }
    }

    /// Deduplication key: providers redeliver unacknowledged webhooks, and a
    /// redelivery carries the same provider-scoped message id.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.provider, self.message_id)
    }
}

/// Delivery/read receipt for a previously sent message. Shares endpoints
/// with inbound messages on several providers but takes a separate path.
#[derive(Debug, Clone)]
pub struct DeliveryStatus {
    pub provider: ProviderKind,
    pub message_id: String,
    pub status: String,
}

/// What a webhook payload turned out to contain.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Message(InboundMessage),
    Status(DeliveryStatus),
}

/// A reply the pipeline decided to send.
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub channel: ChannelKind,
    pub recipient: String,
    pub text: String,
    pub source_message_id: String,
}

impl OutboundResponse {
    /// Construct a response iff the text respects [`MAX_REPLY_CHARS`].
    /// Oversized text yields `None`: discarded, never truncated.
    pub fn bounded(
        channel: ChannelKind,
        recipient: impl Into<String>,
        text: impl Into<String>,
        source_message_id: impl Into<String>,
    ) -> Option<Self> {
        let text = text.into();
        if text.chars().count() > MAX_REPLY_CHARS {
            return None;
        }
        Some(Self {
            channel,
            recipient: recipient.into(),
            text,
            source_message_id: source_message_id.into(),
        })
    }
}
