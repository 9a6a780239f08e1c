//! Notification rule engine: operator-defined condition + timing + recipient
//! triples evaluated against business events. Independent of the AI
//! pipeline; shares only the dispatch facade.

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::dispatch::Dispatcher;
use crate::message::ProviderKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
    /// Operators this build does not know. Evaluation fails closed: an
    /// unknown operator never matches.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingType {
    Immediate,
    Schedule,
    Delay,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationTiming {
    #[serde(rename = "type")]
    pub kind: TimingType,
    #[serde(default)]
    pub schedule_days: Option<Vec<Weekday>>,
    /// "HH:MM", matched at minute granularity.
    #[serde(default)]
    pub schedule_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    User,
    CompanyContacts,
    Custom,
}

/// Long-lived, operator-created configuration entity; read-only here.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationRule {
    pub id: String,
    #[serde(default)]
    pub conditions: Vec<NotificationCondition>,
    pub timing: NotificationTiming,
    pub recipient_type: RecipientType,
    #[serde(default)]
    pub custom_recipients: Vec<String>,
    pub template_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingDecision {
    Fire,
    Skip,
    /// `delay` timing needs an external scheduler that does not exist yet.
    /// Callers must treat this as "cannot evaluate", not as silence.
    NotSupported,
}

#[derive(Debug)]
pub struct RuleDispatchOutcome {
    pub rule_id: String,
    pub delivered: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl RuleDispatchOutcome {
    /// Delivery counts as successful when at least one recipient got it.
    pub fn succeeded(&self) -> bool {
        self.delivered > 0
    }
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn condition_matches(condition: &NotificationCondition, trigger: &Value) -> bool {
    let Some(actual) = trigger.get(&condition.field) else {
        return false;
    };

    match condition.operator {
        ConditionOperator::Eq => actual == &condition.value,
        ConditionOperator::Unknown => false,
        op => {
            let (Some(actual), Some(expected)) =
                (as_number(actual), as_number(&condition.value))
            else {
                return false;
            };
            match op {
                ConditionOperator::Gt => actual > expected,
                ConditionOperator::Lt => actual < expected,
                ConditionOperator::Gte => actual >= expected,
                ConditionOperator::Lte => actual <= expected,
                ConditionOperator::Eq | ConditionOperator::Unknown => false,
            }
        }
    }
}

/// AND over the rule's conditions; an empty list is "always true".
pub fn conditions_match(rule: &NotificationRule, trigger: &Value) -> bool {
    rule.conditions
        .iter()
        .all(|condition| condition_matches(condition, trigger))
}

/// Evaluate the rule's timing against a wall-clock instant.
pub fn timing_allows(rule: &NotificationRule, now: NaiveDateTime) -> TimingDecision {
    match rule.timing.kind {
        TimingType::Immediate => TimingDecision::Fire,
        TimingType::Delay => TimingDecision::NotSupported,
        TimingType::Schedule => {
            if let Some(days) = &rule.timing.schedule_days {
                if !days.contains(&now.weekday()) {
                    return TimingDecision::Skip;
                }
            }
            if let Some(time) = &rule.timing.schedule_time {
                let current = format!("{:02}:{:02}", now.hour(), now.minute());
                if &current != time {
                    return TimingDecision::Skip;
                }
            }
            TimingDecision::Fire
        }
    }
}

fn string_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Recipients are resolved from the trigger event or the rule's own list.
pub fn resolve_recipients(rule: &NotificationRule, trigger: &Value) -> Vec<String> {
    match rule.recipient_type {
        RecipientType::User => trigger
            .get("user_phone")
            .and_then(Value::as_str)
            .map(|phone| vec![phone.to_string()])
            .unwrap_or_default(),
        RecipientType::CompanyContacts => trigger
            .get("company_contacts")
            .and_then(Value::as_array)
            .map(|contacts| {
                contacts
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        RecipientType::Custom => rule.custom_recipients.clone(),
    }
}

/// `{{field}}` substitution from the trigger object. Unknown placeholders
/// are left in place so a broken template is visible in the delivered text.
pub fn render_template(template: &str, trigger: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let field = after[..end].trim();
                match trigger.get(field) {
                    Some(value) => out.push_str(&string_of(value)),
                    None => {
                        out.push_str("{{");
                        out.push_str(&after[..end]);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

pub struct RuleEngine {
    dispatcher: Arc<Dispatcher>,
}

impl RuleEngine {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Evaluate and deliver one rule for one business event. Returns `None`
    /// when the rule does not apply (conditions, timing, or no recipients).
    pub async fn dispatch(
        &self,
        rule: &NotificationRule,
        template: &str,
        trigger: &Value,
        provider: ProviderKind,
        now: NaiveDateTime,
    ) -> Option<RuleDispatchOutcome> {
        if !conditions_match(rule, trigger) {
            tracing::debug!(rule = %rule.id, "conditions not met");
            return None;
        }

        match timing_allows(rule, now) {
            TimingDecision::Fire => {}
            TimingDecision::Skip => {
                tracing::debug!(rule = %rule.id, "outside timing window");
                return None;
            }
            TimingDecision::NotSupported => {
                tracing::warn!(rule = %rule.id, "delay timing has no scheduler, rule skipped");
                return None;
            }
        }

        let recipients = resolve_recipients(rule, trigger);
        if recipients.is_empty() {
            tracing::warn!(rule = %rule.id, "no recipients resolved");
            return None;
        }

        let text = render_template(template, trigger);
        let results = self
            .dispatcher
            .send_all(provider, provider.default_channel(), &recipients, &text)
            .await;

        let mut outcome = RuleDispatchOutcome {
            rule_id: rule.id.clone(),
            delivered: 0,
            failed: 0,
            errors: Vec::new(),
        };
        for result in results {
            match result {
                Ok(_) => outcome.delivered += 1,
                Err(error) => {
                    outcome.failed += 1;
                    outcome.errors.push(error.to_string());
                }
            }
        }

        tracing::info!(
            rule = %rule.id,
            delivered = outcome.delivered,
            failed = outcome.failed,
            "rule dispatched"
        );
        Some(outcome)
    }
}
