use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{ChatError, Result};

/// Result counts the search settings offer
pub const MAX_RESULTS_OPTIONS: &[u8] = &[3, 5, 10, 20];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    pub endpoint: String,
    pub max_results: u8,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            endpoint: "https://api.tavily.com/search".to_string(),
            max_results: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pause after the session appears, lets the engine warm up
    pub settle_delay_ms: u64,
    pub reset_backoff_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 500,
            reset_backoff_ms: 200,
        }
    }
}

impl TimingConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn reset_backoff(&self) -> Duration {
        Duration::from_millis(self.reset_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Prefill tokens added for an attached image (vision encoder output)
    pub image_token_surcharge: usize,
    /// `None` retries recovery of the same message forever
    #[serde(default)]
    pub max_recovery_attempts: Option<u32>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            image_token_surcharge: 257,
            max_recovery_attempts: Some(3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub host: String,
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "gemma3:1b".to_string(),
        }
    }
}

impl ChatConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: ChatConfig = serde_json::from_str(&raw)?;
        debug!(path = %path.as_ref().display(), "Loaded config file");
        Ok(config)
    }

    /// Optional file, then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_json_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("TAVILY_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.search.api_key = Some(key);
        }

        if let Some(enabled) = var("EDGECHAT_SEARCH_ENABLED") {
            match parse_bool(&enabled) {
                Some(v) => self.search.enabled = v,
                None => warn!("Ignoring EDGECHAT_SEARCH_ENABLED={}", enabled),
            }
        }

        if let Some(max) = var("EDGECHAT_SEARCH_MAX_RESULTS") {
            match max.trim().parse() {
                Ok(v) => self.search.max_results = v,
                Err(_) => warn!("Ignoring EDGECHAT_SEARCH_MAX_RESULTS={}", max),
            }
        }

        if let Some(host) = var("OLLAMA_HOST") {
            self.ollama.host = host;
        }

        if let Some(model) = var("EDGECHAT_MODEL") {
            self.ollama.model = model;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !MAX_RESULTS_OPTIONS.contains(&self.search.max_results) {
            return Err(ChatError::Config(format!(
                "search.max_results must be one of {:?}, got {}",
                MAX_RESULTS_OPTIONS, self.search.max_results
            )));
        }

        if self.search.enabled && self.search.endpoint.trim().is_empty() {
            return Err(ChatError::Config("search.endpoint is empty".into()));
        }

        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ChatConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.inference.image_token_surcharge, 257);
        assert_eq!(config.timing.settle_delay(), Duration::from_millis(500));
        assert_eq!(config.timing.reset_backoff(), Duration::from_millis(200));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ChatConfig =
            serde_json::from_str(r#"{"search": {"enabled": false, "endpoint": "http://x", "max_results": 10}}"#)
                .unwrap();
        assert!(!config.search.enabled);
        assert_eq!(config.search.max_results, 10);
        assert_eq!(config.inference.max_recovery_attempts, Some(3));
        assert_eq!(config.ollama.host, "http://localhost:11434");
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TAVILY_API_KEY", "tvly-123"),
            ("EDGECHAT_SEARCH_ENABLED", "off"),
            ("EDGECHAT_SEARCH_MAX_RESULTS", "20"),
            ("EDGECHAT_MODEL", "llama3.2:3b"),
        ]);

        let mut config = ChatConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.search.api_key.as_deref(), Some("tvly-123"));
        assert!(!config.search.enabled);
        assert_eq!(config.search.max_results, 20);
        assert_eq!(config.ollama.model, "llama3.2:3b");
    }

    #[test]
    fn rejects_unsupported_max_results() {
        let mut config = ChatConfig::default();
        config.search.max_results = 7;
        assert!(matches!(config.validate(), Err(ChatError::Config(_))));
    }
}
