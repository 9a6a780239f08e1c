//! Intent classification: one cold-temperature AI call per inbound message,
//! with bounded backoff on rate limits and a zero-confidence fallback on any
//! other failure. Classification must never block the webhook ack path.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::context::BusinessContext;
use crate::message::InboundMessage;

use super::retry::RetryPolicy;
use super::traits::{ChatBackend, CompletionRequest};

/// Auto-response gate: analyses scoring below this fall through to the
/// scenario matcher and then the business-hours policy.
pub const AUTO_RESPONSE_CONFIDENCE: f64 = 0.7;

const CLASSIFY_TEMPERATURE: f64 = 0.3;

const CLASSIFY_SYSTEM_PROMPT: &str = "Sei l'assistente di uno sportello amministrativo. \
Classifica il messaggio del cliente e rispondi SOLO con un oggetto JSON: \
{\"intent\": \"question|support|complaint|information|urgent|payment|other\", \
\"should_respond\": bool, \"confidence\": 0.0-1.0, \
\"urgency\": \"low|medium|high\", \"topics\": [\"...\"]}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Question,
    Support,
    Complaint,
    Information,
    Urgent,
    Payment,
    Other,
}

impl Intent {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "question" => Some(Self::Question),
            "support" => Some(Self::Support),
            "complaint" => Some(Self::Complaint),
            "information" => Some(Self::Information),
            "urgent" => Some(Self::Urgent),
            "payment" => Some(Self::Payment),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Support => "support",
            Self::Complaint => "complaint",
            Self::Information => "information",
            Self::Urgent => "urgent",
            Self::Payment => "payment",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Urgency {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// One classification result, scoped to a single webhook request.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentAnalysis {
    pub intent: Intent,
    pub should_respond: bool,
    pub confidence: f64,
    pub urgency: Urgency,
    pub topics: BTreeSet<String>,
}

impl IntentAnalysis {
    /// The analysis returned when the backend is down, rate-limit budget is
    /// exhausted, or the JSON cannot be validated. Zero confidence means no
    /// auto-response path will act on it.
    pub fn fallback() -> Self {
        Self {
            intent: Intent::Other,
            should_respond: false,
            confidence: 0.0,
            urgency: Urgency::Low,
            topics: BTreeSet::new(),
        }
    }

    pub fn is_confident(&self) -> bool {
        self.should_respond && self.confidence >= AUTO_RESPONSE_CONFIDENCE
    }
}

/// Loose shape of the model's JSON. Field values are validated against the
/// closed enums above; anything the enums reject fails the whole parse
/// instead of silently defaulting.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    intent: String,
    #[serde(default)]
    should_respond: bool,
    #[serde(default)]
    confidence: f64,
    urgency: String,
    #[serde(default)]
    topics: Vec<String>,
}

/// Models sometimes wrap the object in markdown fences; take the outermost
/// `{...}` slice before parsing.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

fn validate(raw: RawAnalysis) -> Option<IntentAnalysis> {
    let intent = Intent::parse(&raw.intent)?;
    let urgency = Urgency::parse(&raw.urgency)?;
    if !raw.confidence.is_finite() {
        return None;
    }
    Some(IntentAnalysis {
        intent,
        should_respond: raw.should_respond,
        confidence: raw.confidence.clamp(0.0, 1.0),
        urgency,
        topics: raw.topics.into_iter().collect(),
    })
}

fn parse_analysis(text: &str) -> Option<IntentAnalysis> {
    let json = extract_json_object(text)?;
    let raw: RawAnalysis = serde_json::from_str(json).ok()?;
    validate(raw)
}

pub struct IntentClassifier {
    backend: Arc<dyn ChatBackend>,
    retry: RetryPolicy,
}

impl IntentClassifier {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(backend: Arc<dyn ChatBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    fn build_prompt(message: &InboundMessage, context: &BusinessContext) -> String {
        format!(
            "Canale: {channel}\nMittente: {from}\nMessaggio: {body}\n\n{context}",
            channel = message.channel,
            from = message.from,
            body = message.body,
            context = context.prompt_block(),
        )
    }

    /// Classify an inbound message. Rate limits are retried with capped
    /// exponential backoff; everything else degrades to the zero-confidence
    /// fallback so the webhook ack is never blocked.
    pub async fn classify(
        &self,
        message: &InboundMessage,
        context: &BusinessContext,
    ) -> IntentAnalysis {
        let prompt = Self::build_prompt(message, context);

        let completion = self
            .retry
            .run(
                || {
                    self.backend.complete(CompletionRequest {
                        system: Some(CLASSIFY_SYSTEM_PROMPT),
                        prompt: &prompt,
                        temperature: CLASSIFY_TEMPERATURE,
                    })
                },
                |error| error.is_rate_limited(),
            )
            .await;

        match completion {
            Ok(text) => parse_analysis(&text).unwrap_or_else(|| {
                tracing::warn!(
                    message_id = %message.message_id,
                    "classification output failed validation, using fallback"
                );
                IntentAnalysis::fallback()
            }),
            Err(error) => {
                tracing::warn!(
                    message_id = %message.message_id,
                    error = %error,
                    "classification unavailable, using fallback"
                );
                IntentAnalysis::fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::traits::BackendError;
    use crate::message::{ChannelKind, ProviderKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedBackend {
        calls: AtomicUsize,
        replies: Vec<Result<String, &'static str>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<String, &'static str>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                replies,
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(&self, _: CompletionRequest<'_>) -> Result<String, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.replies.get(n).or_else(|| self.replies.last());
            match scripted {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err("rate")) => Err(BackendError::RateLimited { retry_after: None }),
                Some(Err(other)) => Err(BackendError::Network((*other).to_string())),
                None => Err(BackendError::Network("no script".to_string())),
            }
        }
    }

    fn sample_message() -> InboundMessage {
        InboundMessage::new(
            "+393331234567",
            "+390212345678",
            "Quando arriva il bonifico?",
            ChannelKind::Whatsapp,
            ProviderKind::Twilio,
            "SM123",
        )
    }

    const GOOD_JSON: &str = r#"{"intent":"payment","should_respond":true,"confidence":0.92,"urgency":"medium","topics":["bonifico"]}"#;

    #[tokio::test]
    async fn parses_valid_analysis() {
        let backend = ScriptedBackend::new(vec![Ok(GOOD_JSON.to_string())]);
        let classifier = IntentClassifier::new(backend.clone());

        let analysis = classifier
            .classify(&sample_message(), &BusinessContext::default())
            .await;

        assert_eq!(analysis.intent, Intent::Payment);
        assert_eq!(analysis.urgency, Urgency::Medium);
        assert!(analysis.is_confident());
        assert!(analysis.topics.contains("bonifico"));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn accepts_fenced_json() {
        let fenced = format!("```json\n{GOOD_JSON}\n```");
        let backend = ScriptedBackend::new(vec![Ok(fenced)]);
        let classifier = IntentClassifier::new(backend);

        let analysis = classifier
            .classify(&sample_message(), &BusinessContext::default())
            .await;
        assert_eq!(analysis.intent, Intent::Payment);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_twice_then_succeeds_makes_three_calls() {
        let backend = ScriptedBackend::new(vec![
            Err("rate"),
            Err("rate"),
            Ok(GOOD_JSON.to_string()),
        ]);
        let classifier = IntentClassifier::new(backend.clone());
        let started = tokio::time::Instant::now();

        let analysis = classifier
            .classify(&sample_message(), &BusinessContext::default())
            .await;

        assert_eq!(backend.call_count(), 3);
        assert_eq!(analysis.intent, Intent::Payment);
        // Backoffs of 1000ms then 2000ms must have elapsed on the test clock.
        assert!(started.elapsed() >= std::time::Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_rate_limit_exhausts_three_attempts_then_falls_back() {
        let backend = ScriptedBackend::new(vec![Err("rate")]);
        let classifier = IntentClassifier::new(backend.clone());

        let analysis = classifier
            .classify(&sample_message(), &BusinessContext::default())
            .await;

        assert_eq!(backend.call_count(), 3);
        assert_eq!(analysis, IntentAnalysis::fallback());
        assert!(!analysis.is_confident());
    }

    #[tokio::test]
    async fn non_rate_limit_error_aborts_after_one_call() {
        let backend = ScriptedBackend::new(vec![Err("refused")]);
        let classifier = IntentClassifier::new(backend.clone());

        let analysis = classifier
            .classify(&sample_message(), &BusinessContext::default())
            .await;

        assert_eq!(backend.call_count(), 1);
        assert_eq!(analysis, IntentAnalysis::fallback());
    }

    #[tokio::test]
    async fn unknown_intent_string_is_rejected_not_defaulted() {
        let backend = ScriptedBackend::new(vec![Ok(
            r#"{"intent":"greeting","should_respond":true,"confidence":0.9,"urgency":"low"}"#
                .to_string(),
        )]);
        let classifier = IntentClassifier::new(backend);

        let analysis = classifier
            .classify(&sample_message(), &BusinessContext::default())
            .await;
        assert_eq!(analysis, IntentAnalysis::fallback());
    }

    #[tokio::test]
    async fn unknown_urgency_string_is_rejected() {
        let backend = ScriptedBackend::new(vec![Ok(
            r#"{"intent":"question","should_respond":true,"confidence":0.9,"urgency":"critical"}"#
                .to_string(),
        )]);
        let classifier = IntentClassifier::new(backend);

        let analysis = classifier
            .classify(&sample_message(), &BusinessContext::default())
            .await;
        assert_eq!(analysis, IntentAnalysis::fallback());
    }

    #[tokio::test]
    async fn garbage_output_falls_back() {
        let backend = ScriptedBackend::new(vec![Ok("certamente!".to_string())]);
        let classifier = IntentClassifier::new(backend);

        let analysis = classifier
            .classify(&sample_message(), &BusinessContext::default())
            .await;
        assert_eq!(analysis, IntentAnalysis::fallback());
    }

    #[test]
    fn confidence_is_clamped() {
        let raw = RawAnalysis {
            intent: "question".to_string(),
            should_respond: true,
            confidence: 3.5,
            urgency: "low".to_string(),
            topics: vec![],
        };
        let analysis = validate(raw).unwrap();
        assert_eq!(analysis.confidence, 1.0);
    }

    #[test]
    fn nan_confidence_fails_validation() {
        let raw = RawAnalysis {
            intent: "question".to_string(),
            should_respond: true,
            confidence: f64::NAN,
            urgency: "low".to_string(),
            topics: vec![],
        };
        assert!(validate(raw).is_none());
    }

    #[test]
    fn threshold_gates_auto_response() {
        let mut analysis = IntentAnalysis::fallback();
        analysis.should_respond = true;
        analysis.confidence = 0.69;
        assert!(!analysis.is_confident());
        analysis.confidence = 0.7;
        assert!(analysis.is_confident());
        analysis.should_respond = false;
        assert!(!analysis.is_confident());
    }
}
