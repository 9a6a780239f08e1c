//! Response drafting: a second, warmer AI call that turns a confident
//! analysis into a short reply. Anything over the channel ceiling is
//! discarded, never truncated.

use std::sync::Arc;

use crate::context::BusinessContext;
use crate::message::{InboundMessage, OutboundResponse, MAX_REPLY_CHARS};

use super::classify::IntentAnalysis;
use super::traits::{ChatBackend, CompletionRequest};

const RESPOND_TEMPERATURE: f64 = 0.7;

const RESPOND_SYSTEM_PROMPT: &str = "Sei l'assistente di uno sportello amministrativo. \
Rispondi al cliente in italiano, in tono cortese e professionale. \
La risposta DEVE stare in 160 caratteri. Non inventare dati non presenti nel contesto.";

pub struct ResponseGenerator {
    backend: Arc<dyn ChatBackend>,
}

impl ResponseGenerator {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    fn build_prompt(
        message: &InboundMessage,
        analysis: &IntentAnalysis,
        context: &BusinessContext,
    ) -> String {
        format!(
            "Messaggio del cliente: {body}\nIntento rilevato: {intent} (urgenza {urgency})\n\n{context}\nScrivi la risposta.",
            body = message.body,
            intent = analysis.intent.as_str(),
            urgency = analysis.urgency.as_str(),
            context = context.prompt_block(),
        )
    }

    /// Draft a reply. `None` means no auto-response will be sent: the
    /// backend failed, or the draft exceeded [`MAX_REPLY_CHARS`].
    pub async fn generate(
        &self,
        message: &InboundMessage,
        analysis: &IntentAnalysis,
        context: &BusinessContext,
    ) -> Option<OutboundResponse> {
        let prompt = Self::build_prompt(message, analysis, context);

        let draft = match self
            .backend
            .complete(CompletionRequest {
                system: Some(RESPOND_SYSTEM_PROMPT),
                prompt: &prompt,
                temperature: RESPOND_TEMPERATURE,
            })
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(error) => {
                tracing::warn!(
                    message_id = %message.message_id,
                    error = %error,
                    "response generation failed"
                );
                return None;
            }
        };

        if draft.is_empty() {
            return None;
        }

        let response = OutboundResponse::bounded(
            message.channel,
            message.from.clone(),
            draft,
            message.message_id.clone(),
        );
        if response.is_none() {
            tracing::warn!(
                message_id = %message.message_id,
                limit = MAX_REPLY_CHARS,
                "discarding over-length draft"
            );
        }
        response
    }
}
