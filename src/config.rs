use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::explain::RetryPolicy;

/// Run configuration, read from TOML. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub batch: BatchConfig,
    pub retry: RetryConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker cap; the number of CPUs when unset
    pub max_workers: Option<usize>,
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_secs: Vec<f64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_secs: vec![1.0, 3.0, 8.0],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub offline: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            timeout_secs: 30,
            max_tokens: 600,
            temperature: 0.2,
            offline: false,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = self
            .retry
            .backoff_secs
            .iter()
            .map(|s| Duration::try_from_secs_f64(*s).unwrap_or(Duration::ZERO))
            .collect();
        RetryPolicy::new(self.retry.max_attempts, backoff)
    }

    pub fn worker_cap(&self) -> usize {
        self.batch
            .max_workers
            .filter(|n| *n > 0)
            .unwrap_or_else(num_cpus::get)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.batch.deadline_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert!(config.deadline().is_none());
        assert!(config.worker_cap() >= 1);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml(
            "[batch]\nmax_workers = 2\ndeadline_secs = 30\n\n[retry]\nbackoff_secs = [0.5]\n\n[service]\noffline = true\n",
        )
        .unwrap();
        assert_eq!(config.worker_cap(), 2);
        assert_eq!(config.deadline(), Some(Duration::from_secs(30)));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry_policy().delay_after(2), Duration::from_millis(500));
        assert!(config.service.offline);
        assert_eq!(config.service.max_tokens, 600);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[retry]\nmax_attempts = 5").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.retry_policy().max_attempts, 5);
    }

    #[test]
    fn test_unknown_value_type_is_error() {
        assert!(Config::from_toml("[batch]\nmax_workers = \"many\"\n").is_err());
    }
}
