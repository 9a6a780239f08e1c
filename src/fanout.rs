//! Internal fanout: in-app notifications for the operations team.
//!
//! Every inbound message produces at least one record; escalations and send
//! failures produce more. The production sink is a collaborator behind
//! [`InternalNotifier`]; the in-memory implementation backs tests and
//! single-process deployments.

use crate::message::{ChannelKind, ProviderKind};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalEventKind {
    /// A message passed validation and entered the pipeline.
    MessageReceived,
    /// The AI path produced and dispatched a reply.
    AutoReplied,
    /// A keyword/business-hours fallback reply was dispatched.
    FallbackReplied,
    /// Nothing could be sent; a human needs to follow up.
    Unhandled,
    /// Urgency flagged by keyword or classifier.
    Escalation,
    /// An outbound send failed for one recipient.
    SendFailed,
}

#[derive(Debug, Clone)]
pub struct InternalNotification {
    pub id: String,
    pub kind: InternalEventKind,
    pub provider: ProviderKind,
    pub channel: ChannelKind,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

impl InternalNotification {
    pub fn new(
        kind: InternalEventKind,
        provider: ProviderKind,
        channel: ChannelKind,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            provider,
            channel,
            summary: summary.into(),
            created_at: Utc::now(),
        }
    }
}

pub trait InternalNotifier: Send + Sync {
    fn record(&self, notification: InternalNotification);
}

/// Keeps records in memory and mirrors them to the log.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    entries: Mutex<Vec<InternalNotification>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<InternalNotification> {
        self.entries.lock().clone()
    }

    pub fn escalation_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|n| n.kind == InternalEventKind::Escalation)
            .count()
    }
}

impl InternalNotifier for InMemoryNotifier {
    fn record(&self, notification: InternalNotification) {
        tracing::info!(
            kind = ?notification.kind,
            provider = %notification.provider,
            channel = %notification.channel,
            "internal notification: {}",
            notification.summary
        );
        self.entries.lock().push(notification);
    }
}
