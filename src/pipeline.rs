//! The per-message decision pipeline: classify → (if confident) generate →
//! dispatch, degrading to the keyword matcher and then the business-hours
//! policy. Every message leaves a trail in the internal fanout.

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};

use crate::ai::{IntentClassifier, ResponseGenerator, Urgency};
use crate::context::{BusinessContext, ContextStore};
use crate::dispatch::Dispatcher;
use crate::fanout::{InternalEventKind, InternalNotification, InternalNotifier};
use crate::hours::BusinessHours;
use crate::message::{DeliveryStatus, InboundMessage, OutboundResponse};
use crate::scenarios::ScenarioMatcher;

/// Which branch produced the reply, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandledBy {
    Ai,
    Scenario,
    Hours,
    Nobody,
}

#[derive(Debug)]
pub struct HandlingReport {
    pub handled_by: HandledBy,
    pub dispatched: bool,
    pub escalated: bool,
}

pub struct MessagePipeline {
    classifier: IntentClassifier,
    generator: ResponseGenerator,
    dispatcher: Arc<Dispatcher>,
    context_store: Arc<dyn ContextStore>,
    notifier: Arc<dyn InternalNotifier>,
    matcher: ScenarioMatcher,
    hours: BusinessHours,
}

impl MessagePipeline {
    pub fn new(
        classifier: IntentClassifier,
        generator: ResponseGenerator,
        dispatcher: Arc<Dispatcher>,
        context_store: Arc<dyn ContextStore>,
        notifier: Arc<dyn InternalNotifier>,
        hours: BusinessHours,
    ) -> Self {
        Self {
            classifier,
            generator,
            dispatcher,
            context_store,
            notifier,
            matcher: ScenarioMatcher::new(hours),
            hours,
        }
    }

    fn record(&self, kind: InternalEventKind, message: &InboundMessage, summary: String) {
        self.notifier.record(InternalNotification::new(
            kind,
            message.provider,
            message.channel,
            summary,
        ));
    }

    async fn dispatch_reply(&self, message: &InboundMessage, response: &OutboundResponse) -> bool {
        match self
            .dispatcher
            .send(
                message.provider,
                response.channel,
                &response.recipient,
                &response.text,
            )
            .await
        {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!(
                    message_id = %message.message_id,
                    error = %error,
                    "reply dispatch failed"
                );
                self.record(
                    InternalEventKind::SendFailed,
                    message,
                    format!("invio risposta fallito: {error}"),
                );
                false
            }
        }
    }

    pub async fn handle(&self, message: InboundMessage) -> HandlingReport {
        self.handle_at(message, Utc::now().naive_utc()).await
    }

    /// Drive one message through the pipeline at a given wall-clock instant.
    /// Strict ordering within the message; never returns an error; partial
    /// failure degrades to the next branch.
    pub async fn handle_at(&self, message: InboundMessage, now: NaiveDateTime) -> HandlingReport {
        self.record(
            InternalEventKind::MessageReceived,
            &message,
            format!("messaggio da {}", message.from),
        );

        let context = match self.context_store.snapshot().await {
            Ok(context) => context,
            Err(error) => {
                tracing::warn!(error = %error, "context snapshot unavailable");
                BusinessContext::default()
            }
        };

        let analysis = self.classifier.classify(&message, &context).await;
        let mut escalated = false;

        if analysis.urgency == Urgency::High {
            escalated = true;
            self.record(
                InternalEventKind::Escalation,
                &message,
                format!("urgenza alta rilevata ({})", analysis.intent.as_str()),
            );
        }

        // Confident AI path first.
        if analysis.is_confident() {
            if let Some(response) = self.generator.generate(&message, &analysis, &context).await {
                if self.dispatch_reply(&message, &response).await {
                    self.record(
                        InternalEventKind::AutoReplied,
                        &message,
                        format!("risposta automatica ({})", analysis.intent.as_str()),
                    );
                    return HandlingReport {
                        handled_by: HandledBy::Ai,
                        dispatched: true,
                        escalated,
                    };
                }
            }
        }

        // Keyword fast path.
        if let Some(matched) = self.matcher.match_message(&message.body, now) {
            if matched.escalate && !escalated {
                escalated = true;
                self.record(
                    InternalEventKind::Escalation,
                    &message,
                    format!("parola chiave urgente in {:?}", matched.scenario),
                );
            }
            if let Some(response) = OutboundResponse::bounded(
                message.channel,
                message.from.clone(),
                matched.reply,
                message.message_id.clone(),
            ) {
                if self.dispatch_reply(&message, &response).await {
                    self.record(
                        InternalEventKind::FallbackReplied,
                        &message,
                        format!("scenario {:?}", matched.scenario),
                    );
                    return HandlingReport {
                        handled_by: HandledBy::Scenario,
                        dispatched: true,
                        escalated,
                    };
                }
            }
        }

        // Last resort: a generic acknowledgment worded by business hours.
        let reply = if self.hours.is_open(now) {
            "Abbiamo ricevuto il tuo messaggio: ti risponderemo a breve.".to_string()
        } else {
            "Abbiamo ricevuto il tuo messaggio: ti risponderemo il prossimo giorno lavorativo."
                .to_string()
        };
        if let Some(response) = OutboundResponse::bounded(
            message.channel,
            message.from.clone(),
            reply,
            message.message_id.clone(),
        ) {
            if self.dispatch_reply(&message, &response).await {
                self.record(
                    InternalEventKind::FallbackReplied,
                    &message,
                    "risposta generica fuori pipeline AI".to_string(),
                );
                return HandlingReport {
                    handled_by: HandledBy::Hours,
                    dispatched: true,
                    escalated,
                };
            }
        }

        self.record(
            InternalEventKind::Unhandled,
            &message,
            "nessuna risposta inviata".to_string(),
        );
        HandlingReport {
            handled_by: HandledBy::Nobody,
            dispatched: false,
            escalated,
        }
    }

    /// Delivery receipts only update the log trail; there is nothing to
    /// reply to.
    pub fn handle_status(&self, status: &DeliveryStatus) {
        tracing::info!(
            provider = %status.provider,
            message_id = %status.message_id,
            status = %status.status,
            "delivery status"
        );
    }
}
