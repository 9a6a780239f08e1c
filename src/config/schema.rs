use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::rules::NotificationRule;

/// Deployment profile. Signature enforcement is mandatory only in
/// production; lower profiles log a warning and accept unsigned webhooks so
/// local tunnels and test harnesses keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn enforce_signatures(self) -> bool {
        self == Environment::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, used by the diagnostics endpoints.
    pub public_url: Option<String>,
    /// Sliding-window rate limit per source address.
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    /// How long a (provider, message id) pair stays in the dedup store.
    pub dedup_ttl_secs: u64,
    pub max_body_bytes: usize,
    pub request_timeout_secs: u64,
    /// Rate-limit on the first `X-Forwarded-For` hop instead of the peer
    /// address. Only safe behind a proxy that overwrites the header.
    pub trust_forwarded_headers: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8088,
            public_url: None,
            rate_limit_requests: 120,
            rate_limit_window_secs: 60,
            dedup_ttl_secs: 600,
            max_body_bytes: 64 * 1024,
            request_timeout_secs: 30,
            trust_forwarded_headers: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub api_url: String,
    /// Overridden by `SPORTELLO_AI_API_KEY`.
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusinessHoursConfig {
    pub open_hour: u32,
    pub close_hour: u32,
}

impl Default for BusinessHoursConfig {
    fn default() -> Self {
        Self {
            open_hour: 9,
            close_hour: 18,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkMobilityConfig {
    pub api_key: String,
    /// Shared secret behind `X-Link-Signature`.
    pub webhook_secret: String,
    pub sender_id: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkebbyConfig {
    pub user_key: String,
    pub session_key: String,
    pub sender_id: String,
    #[serde(default = "default_skebby_base_url")]
    pub base_url: String,
    /// Service number reported as `to` on inbound SMS.
    pub service_number: String,
}

fn default_skebby_base_url() -> String {
    "https://api.skebby.it/API/v1.0/REST".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendGridConfig {
    pub api_key: String,
    pub from_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FacebookConfig {
    pub page_access_token: String,
    pub verify_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub twilio: Option<TwilioConfig>,
    pub linkmobility: Option<LinkMobilityConfig>,
    pub skebby: Option<SkebbyConfig>,
    pub sendgrid: Option<SendGridConfig>,
    pub facebook: Option<FacebookConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub rules: Vec<NotificationRule>,
    /// template_id → template text with `{{field}}` placeholders.
    pub templates: HashMap<String, String>,
    /// Provider used for rule-driven alerts.
    pub provider: Option<crate::message::ProviderKind>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
    pub environment: Environment,
    pub gateway: GatewayConfig,
    pub ai: AiConfig,
    pub business_hours: BusinessHoursConfig,
    pub providers: ProvidersConfig,
    pub notifications: NotificationsConfig,
}

impl Config {
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "sportello")
            .context("cannot determine a home directory for the config file")?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(contents).context("failed to parse config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from an explicit path, or the platform default. A missing file
    /// yields the built-in defaults with a warning, so the gateway can start
    /// in webhook-test setups with zero configuration.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            let mut defaults = Config::default();
            defaults.apply_env_overrides();
            defaults
        };

        config.config_path = Some(path);
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("SPORTELLO_AI_API_KEY") {
            if !key.trim().is_empty() {
                self.ai.api_key = Some(key);
            }
        }
    }

    /// Sanity checks an operator gets from `check-config` before deploying.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.environment == Environment::Production {
            if self.ai.api_key.is_none() {
                problems.push("production requires ai.api_key (or SPORTELLO_AI_API_KEY)".into());
            }
            if self.providers.twilio.is_none()
                && self.providers.linkmobility.is_none()
                && self.providers.skebby.is_none()
                && self.providers.sendgrid.is_none()
                && self.providers.facebook.is_none()
            {
                problems.push("production requires at least one provider".into());
            }
        }

        if self.business_hours.open_hour >= self.business_hours.close_hour {
            problems.push(format!(
                "business_hours open ({}) must precede close ({})",
                self.business_hours.open_hour, self.business_hours.close_hour
            ));
        }

        for rule in &self.notifications.rules {
            if !self.notifications.templates.contains_key(&rule.template_id) {
                problems.push(format!(
                    "rule {} references unknown template {}",
                    rule.id, rule.template_id
                ));
            }
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_development_with_local_gateway() {
        let config = Config::default();
        assert_eq!(config.environment, Environment::Development);
        assert!(!config.environment.enforce_signatures());
        assert_eq!(config.gateway.port, 8088);
        assert_eq!(config.business_hours.open_hour, 9);
    }

    #[test]
    fn parses_full_config() {
        let config = Config::from_toml(
            r#"
environment = "production"

[gateway]
host = "0.0.0.0"
port = 9000
public_url = "https://hooks.example.com"

[ai]
api_url = "https://llm.internal/v1"
api_key = "sk-test"
model = "gpt-4o"

[business_hours]
open_hour = 8
close_hour = 19

[providers.twilio]
account_sid = "AC1"
auth_token = "tok"
from_number = "+390000"

[providers.facebook]
page_access_token = "page-tok"
verify_token = "verify-me"

[notifications]
provider = "skebby"

[notifications.templates]
low_balance = "Saldo {{balance}} sotto soglia"

[[notifications.rules]]
id = "r1"
recipient_type = "user"
template_id = "low_balance"
timing = { type = "immediate" }
conditions = [{ field = "balance", operator = "lt", value = 1000 }]
"#,
        )
        .unwrap();

        assert!(config.environment.enforce_signatures());
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.providers.twilio.as_ref().unwrap().account_sid, "AC1");
        assert_eq!(config.notifications.rules.len(), 1);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn production_without_providers_fails_validation() {
        let config = Config::from_toml(r#"environment = "production""#).unwrap();
        let problems = config.validate();
        assert!(problems.iter().any(|p| p.contains("provider")));
    }

    #[test]
    fn rule_with_unknown_template_fails_validation() {
        let config = Config::from_toml(
            r#"
[[notifications.rules]]
id = "r1"
recipient_type = "user"
template_id = "missing"
timing = { type = "immediate" }
"#,
        )
        .unwrap();
        assert!(config
            .validate()
            .iter()
            .any(|p| p.contains("unknown template")));
    }

    #[test]
    fn inverted_business_hours_fail_validation() {
        let config = Config::from_toml("[business_hours]\nopen_hour = 19\nclose_hour = 9").unwrap();
        assert!(!config.validate().is_empty());
    }

    #[test]
    fn loads_from_file_and_remembers_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "environment = \"staging\"\n[gateway]\nport = 9100\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.gateway.port, 9100);
        assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.gateway.port, 8088);
    }

    #[test]
    fn unparseable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "environment = [broken").unwrap();

        assert!(Config::load(Some(&path)).is_err());
    }
}
