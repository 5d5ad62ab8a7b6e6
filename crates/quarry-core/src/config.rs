use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{QuarryError, Result};

/// Top-level configuration for the quarry service.
///
/// Loaded from `~/.quarry/config.toml` by default. Every section falls back
/// to its defaults, so a partial file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuarryConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub data_source: DataSourceConfig,
}

impl QuarryConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: QuarryConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| QuarryError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply the generation-service environment variables on top of the
    /// file values.
    ///
    /// Recognised: `OPENAI_API_KEY`, `OPENAI_MODEL`, `OPENAI_MODEL_TEMPERATURE`,
    /// `OPENAI_BASE_URL`. Unparseable temperatures are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|v| !v.is_empty()) {
            self.llm.api_key = key;
        }
        if let Some(model) = lookup("OPENAI_MODEL").filter(|v| !v.is_empty()) {
            self.llm.model = model;
        }
        if let Some(base_url) = lookup("OPENAI_BASE_URL").filter(|v| !v.is_empty()) {
            self.llm.base_url = base_url;
        }
        if let Some(raw) = lookup("OPENAI_MODEL_TEMPERATURE") {
            match raw.parse::<f32>() {
                Ok(t) => self.llm.temperature = t,
                Err(_) => warn!(value = %raw, "Ignoring invalid OPENAI_MODEL_TEMPERATURE"),
            }
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the chat database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// API server port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.quarry/data".to_string(),
            log_level: "info".to_string(),
            port: 3040,
        }
    }
}

/// Generation-service settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the chat completions API, without the trailing path.
    pub base_url: String,
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Model used for conversational turns and suggestions.
    pub model: String,
    /// Model used to summarize database schemas.
    pub summarizer_model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Timeout for non-streaming requests, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-3.5-turbo".to_string(),
            summarizer_model: "gpt-3.5-turbo".to_string(),
            temperature: 0.5,
            request_timeout_secs: 120,
        }
    }
}

/// Turn orchestration limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum user message length in characters.
    pub max_message_length: usize,
    /// Tool batches allowed per turn before tools are withheld.
    pub max_tool_rounds: usize,
    /// Consecutive failed tool results before tools are withheld.
    pub max_consecutive_tool_errors: usize,
    /// Longest wait for the next stream event, in seconds.
    pub stream_idle_timeout_secs: u64,
    /// Idle time after which a saved chat is dropped from memory, in seconds.
    pub session_idle_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 4000,
            max_tool_rounds: 8,
            max_consecutive_tool_errors: 3,
            stream_idle_timeout_secs: 60,
            session_idle_secs: 1800,
        }
    }
}

/// User-supplied database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    /// Timeout for a single remote request, in seconds.
    pub connect_timeout_secs: u64,
    /// Directories whose SQLite files chats may open, read-only. Empty
    /// means only remote libSQL endpoints are accepted. The service's own
    /// data directory is refused even when listed here.
    pub local_roots: Vec<String>,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            local_roots: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = QuarryConfig::default();
        assert_eq!(config.general.data_dir, "~/.quarry/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.port, 3040);
        assert_eq!(config.llm.model, "gpt-3.5-turbo");
        assert!((config.llm.temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.chat.max_consecutive_tool_errors, 3);
        assert_eq!(config.chat.max_tool_rounds, 8);
        assert_eq!(config.chat.session_idle_secs, 1800);
        assert_eq!(config.data_source.connect_timeout_secs, 15);
        assert!(config.data_source.local_roots.is_empty());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[llm]
model = "gpt-4o-mini"

[chat]
stream_idle_timeout_secs = 5
"#;
        let file = create_temp_config(content);
        let config = QuarryConfig::load(file.path()).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.chat.stream_idle_timeout_secs, 5);
        // Untouched fields keep defaults
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(config.chat.max_message_length, 4000);
        assert_eq!(config.general.port, 3040);
    }

    #[test]
    fn test_load_local_roots() {
        let file = create_temp_config("[data_source]\nlocal_roots = [\"/srv/sqlite\"]\n");
        let config = QuarryConfig::load(file.path()).unwrap();
        assert_eq!(config.data_source.local_roots, vec!["/srv/sqlite".to_string()]);
        assert_eq!(config.data_source.connect_timeout_secs, 15);
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        assert!(QuarryConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = QuarryConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.quarry/data");
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = QuarryConfig::default();
        config.general.port = 4111;
        config.save(&path).unwrap();

        let reloaded = QuarryConfig::load(&path).unwrap();
        assert_eq!(reloaded.general.port, 4111);
        assert_eq!(reloaded.llm.model, config.llm.model);
    }

    #[test]
    fn test_env_overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("OPENAI_MODEL_TEMPERATURE", "0.1"),
        ]
        .into_iter()
        .collect();

        let mut config = QuarryConfig::default();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key, "sk-test");
        assert_eq!(config.llm.model, "gpt-4o");
        assert!((config.llm.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_env_override_invalid_temperature_ignored() {
        let mut config = QuarryConfig::default();
        config.apply_overrides_from(|k| {
            (k == "OPENAI_MODEL_TEMPERATURE").then(|| "warm".to_string())
        });
        assert!((config.llm.temperature - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_env_override_empty_values_ignored() {
        let mut config = QuarryConfig::default();
        config.apply_overrides_from(|_| Some(String::new()));
        assert_eq!(config.llm.model, "gpt-3.5-turbo");
        assert!(config.llm.api_key.is_empty());
    }
}
