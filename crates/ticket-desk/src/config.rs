//! Desk settings, with the classifier section nested.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use ticket_classifier::ClassifierConfig;

/// Desk configuration, loaded from an optional TOML file.
///
/// ```toml
/// workers = 4
/// job_tries = 3
/// release_delay_secs = 60
///
/// [classifier]
/// enabled = true
/// model = "gpt-4o-mini"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    /// Concurrent classification workers for bulk runs.
    pub workers: usize,
    /// Attempts per job before it is reported failed.
    pub job_tries: u32,
    /// Delay before a contended job is retried.
    pub release_delay_secs: u64,
    pub classifier: ClassifierConfig,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            job_tries: 3,
            release_delay_secs: 60,
            classifier: ClassifierConfig::default(),
        }
    }
}

impl DeskConfig {
    /// Load `path` if given, then overlay environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                toml::from_str(&content).context("Failed to parse desk config TOML")?
            }
            None => Self::default(),
        };
        config.classifier = config.classifier.with_env();
        Ok(config)
    }

    pub fn release_delay(&self) -> Duration {
        Duration::from_secs(self.release_delay_secs)
    }
}
