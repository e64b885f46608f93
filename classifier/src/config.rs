//! Classifier settings from defaults, TOML and the environment.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;
use crate::upstream::SamplingParams;

/// Classifier configuration. Every field has a default, so a partial TOML
/// table or an empty environment both yield a usable config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// When false, every call returns a fallback without touching any store.
    pub enabled: bool,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    /// Upper bound on one full retrying upstream call. The call is cut off
    /// shortly before the lease runs out and the ticket gets a fallback.
    pub lock_lease_secs: u64,
    pub lock_wait_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.2,
            max_tokens: 80,
            request_timeout_secs: 30,
            cache_ttl_secs: 3600,
            lock_lease_secs: 15,
            lock_wait_secs: 5,
            max_attempts: 5,
            base_delay_ms: 400,
        }
    }
}

impl ClassifierConfig {
    /// Defaults overlaid with `CLASSIFY_ENABLED`, `OPENAI_API_KEY`,
    /// `OPENAI_BASE_URL` and `OPENAI_MODEL`.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Overlay environment variables onto `self`.
    pub fn with_env(mut self) -> Self {
        if let Ok(v) = std::env::var("CLASSIFY_ENABLED") {
            self.enabled = parse_flag(&v);
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            self.base_url = url;
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            self.model = model;
        }
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_toml_str(&content)?)
    }

    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

fn parse_flag(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClassifierConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.lock_lease(), Duration::from_secs(15));
        assert_eq!(config.lock_wait(), Duration::from_secs(5));
        assert_eq!(config.sampling(), SamplingParams::default());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ClassifierConfig::from_toml_str(
            r#"
enabled = true
model = "gpt-4o"
max_attempts = 3
"#,
        )
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_tokens, 80);
        assert_eq!(config.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.toml");
        std::fs::write(&path, "lock_wait_secs = 1\n").unwrap();
        let config = ClassifierConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.lock_wait(), Duration::from_secs(1));

        let missing = ClassifierConfig::from_toml_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" 1 "));
        assert!(parse_flag("ON"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
