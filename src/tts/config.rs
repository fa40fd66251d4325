use crate::utils::http::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Speech backends the service knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Any OpenAI-compatible `/audio/speech` endpoint.
    Openai,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(rename = "type", alias = "provider_type")]
    pub kind: ProviderKind,
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub default_voice: Option<String>,
    /// Per-request timeout for synthesis calls.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after the first attempt on network errors, 429 and 5xx.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl ProviderConfig {
    /// `api_key` first, then the variable named by `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        crate::config::resolve_api_key(&self.api_key, &self.api_key_env)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TtsSystemConfig {
    /// Provider used when a speak request names none. Falls back to the first registered.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Speed applied when a speak request does not set one.
    #[serde(default)]
    pub default_speed: Option<f32>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_entry_takes_defaults() {
        let config: TtsSystemConfig = serde_json::from_str(
            r#"{"providers": [{"id": "cloud", "type": "openai", "api_key_env": "CLOUD_KEY"}]}"#,
        )
        .unwrap();
        let provider = &config.providers[0];
        assert_eq!(provider.kind, ProviderKind::Openai);
        assert!(provider.enabled);
        assert_eq!(provider.timeout(), Duration::from_secs(30));
        assert_eq!(provider.retry_policy().max_retries, 2);
        assert!(config.default_speed.is_none());
    }

    #[test]
    fn legacy_field_name_and_unknown_kinds_still_parse() {
        let config: TtsSystemConfig = serde_json::from_str(
            r#"{"providers": [
                {"id": "a", "provider_type": "openai", "max_retries": 0, "timeout_secs": 0},
                {"id": "b", "type": "piper"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(config.providers[0].kind, ProviderKind::Openai);
        assert_eq!(config.providers[0].retry_policy().max_retries, 0);
        assert_eq!(config.providers[0].timeout(), Duration::from_secs(1));
        assert_eq!(config.providers[1].kind, ProviderKind::Unsupported);
    }
}
