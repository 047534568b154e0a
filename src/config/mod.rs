//! Configuration management for the edge operator
//!
//! Supports configuration via:
//! 1. Config file (~/.config/edge-operator/config.toml)
//! 2. Environment variables (OLLAMA_URL, ANTHROPIC_API_KEY, etc.)
//! 3. CLI arguments (override file/env settings)
//!
//! There is deliberately no setting for the starting mode: every process
//! starts in local mode.

use crate::api::{ApiKey, CloudConfig, CloudProvider, OllamaConfig};
use crate::router::RouterConfig;
use crate::session::is_valid_session_id;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local model server (Ollama)
    pub local: LocalSettings,

    /// Managed cloud model service
    pub cloud: CloudSettings,

    /// Mode switching
    pub router: RouterSettings,

    /// Conversation persistence
    pub session: SessionSettings,

    /// Telemetry database
    pub telemetry: TelemetrySettings,

    /// Document retrieval
    pub documents: DocumentSettings,
}

/// Local LLM (Ollama) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    /// Ollama server URL
    pub url: String,

    /// Chat model
    pub model: String,

    /// Temperature for generation
    pub temperature: f32,

    /// How long the server keeps the model loaded
    pub keep_alive: String,

    /// Model used for document embeddings
    pub embedding_model: String,

    pub request_timeout_secs: u64,
}

impl Default for LocalSettings {
    fn default() -> Self {
        let defaults = OllamaConfig::default();
        Self {
            url: defaults.url,
            model: defaults.model,
            temperature: 0.7,
            keep_alive: defaults.keep_alive,
            embedding_model: defaults.embedding_model,
            request_timeout_secs: defaults.request_timeout.as_secs(),
        }
    }
}

/// Cloud model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSettings {
    /// anthropic or openai
    pub provider: CloudProvider,

    /// API key (can also use EDGE_CLOUD_API_KEY or the provider's env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL, defaults to the provider's public API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    pub model: String,

    /// Maximum tokens for responses
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    pub request_timeout_secs: u64,
}

impl Default for CloudSettings {
    fn default() -> Self {
        let defaults = CloudConfig::default();
        Self {
            provider: defaults.provider,
            api_key: None,
            base_url: None,
            model: defaults.model,
            max_tokens: defaults.max_tokens,
            temperature: 0.7,
            request_timeout_secs: defaults.request_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    /// Upper bound for the cloud probe run before switching to cloud
    pub probe_timeout_secs: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            probe_timeout_secs: RouterConfig::default().probe_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Session to open at start (letters, digits, '-' and '_')
    pub session_id: String,

    /// Directory holding one sub-directory per session
    pub storage_dir: PathBuf,

    /// Turns of history sent along with each message
    pub max_history_turns: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_id: "default".to_string(),
            storage_dir: PathBuf::from("./sessions"),
            max_history_turns: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub db_path: PathBuf,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: PathBuf::from("./telemetry.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSettings {
    pub enabled: bool,

    /// Characters per chunk
    pub chunk_size: usize,

    /// Characters shared by neighbouring chunks
    pub chunk_overlap: usize,

    /// Chunks returned per search
    pub top_k: usize,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 4,
        }
    }
}

impl Config {
    /// Get default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("edge-operator")
            .join("config.toml")
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path())
    }

    /// Load config from specific path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default().with_env_overrides());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;

        Ok(config.with_env_overrides())
    }

    /// Load a file that must exist
    pub fn load_existing(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::load_from(path)
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup
    pub fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        // Local LLM
        if let Some(url) = var("OLLAMA_URL") {
            self.local.url = url;
        }
        if let Some(model) = var("OLLAMA_MODEL") {
            self.local.model = model;
        }

        // Cloud
        if let Some(key) = var("EDGE_CLOUD_API_KEY").or_else(|| var(self.cloud.provider.api_key_env())) {
            self.cloud.api_key = Some(key);
        }
        if let Some(model) = var("EDGE_CLOUD_MODEL") {
            self.cloud.model = model;
        }
        if let Some(url) = var("EDGE_CLOUD_BASE_URL") {
            self.cloud.base_url = Some(url);
        }

        // Session
        if let Some(id) = var("EDGE_SESSION_ID") {
            self.session.session_id = id;
        }
        if let Some(dir) = var("EDGE_SESSIONS_DIR") {
            self.session.storage_dir = PathBuf::from(dir);
        }

        self
    }

    /// Save config to default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path())
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.local.model.trim().is_empty() {
            return invalid("local.model must not be empty".into());
        }
        if self.cloud.model.trim().is_empty() {
            return invalid("cloud.model must not be empty".into());
        }
        if self.router.probe_timeout_secs == 0 {
            return invalid("router.probe_timeout_secs must be at least 1".into());
        }
        if !is_valid_session_id(&self.session.session_id) {
            return invalid(format!(
                "session.session_id '{}' may only contain letters, digits, '-' and '_'",
                self.session.session_id
            ));
        }
        if self.documents.chunk_size == 0 {
            return invalid("documents.chunk_size must be positive".into());
        }
        if self.documents.chunk_overlap >= self.documents.chunk_size {
            return invalid(format!(
                "documents.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.documents.chunk_overlap, self.documents.chunk_size
            ));
        }
        if self.documents.top_k == 0 {
            return invalid("documents.top_k must be positive".into());
        }

        Ok(())
    }

    /// Whether a non-blank cloud key is configured
    pub fn has_cloud_key(&self) -> bool {
        self.cloud
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }

    pub fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig {
            url: self.local.url.clone(),
            model: self.local.model.clone(),
            temperature: Some(self.local.temperature),
            keep_alive: self.local.keep_alive.clone(),
            embedding_model: self.local.embedding_model.clone(),
            request_timeout: Duration::from_secs(self.local.request_timeout_secs),
        }
    }

    pub fn cloud_config(&self) -> CloudConfig {
        CloudConfig {
            provider: self.cloud.provider,
            api_key: self.cloud.api_key.clone().map(ApiKey::new),
            base_url: self
                .cloud
                .base_url
                .clone()
                .unwrap_or_else(|| self.cloud.provider.default_base_url().to_string()),
            model: self.cloud.model.clone(),
            max_tokens: self.cloud.max_tokens,
            temperature: Some(self.cloud.temperature),
            request_timeout: Duration::from_secs(self.cloud.request_timeout_secs),
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            probe_timeout: Duration::from_secs(self.router.probe_timeout_secs),
        }
    }

    /// Generate example config content
    pub fn example() -> String {
        let example = Config::default();
        toml::to_string_pretty(&example).unwrap_or_default()
    }
}

/// Builder for creating Config programmatically
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn local_url(mut self, url: impl Into<String>) -> Self {
        self.config.local.url = url.into();
        self
    }

    pub fn local_model(mut self, model: impl Into<String>) -> Self {
        self.config.local.model = model.into();
        self
    }

    pub fn cloud_provider(mut self, provider: CloudProvider) -> Self {
        self.config.cloud.provider = provider;
        self
    }

    pub fn cloud_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.cloud.api_key = Some(key.into());
        self
    }

    pub fn cloud_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.cloud.base_url = Some(url.into());
        self
    }

    pub fn cloud_model(mut self, model: impl Into<String>) -> Self {
        self.config.cloud.model = model.into();
        self
    }

    pub fn probe_timeout_secs(mut self, secs: u64) -> Self {
        self.config.router.probe_timeout_secs = secs;
        self
    }

    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.config.session.session_id = id.into();
        self
    }

    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.session.storage_dir = dir.into();
        self
    }

    pub fn max_history_turns(mut self, turns: usize) -> Self {
        self.config.session.max_history_turns = turns;
        self
    }

    pub fn telemetry_db(mut self, path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => {
                self.config.telemetry.enabled = true;
                self.config.telemetry.db_path = path;
            }
            None => self.config.telemetry.enabled = false,
        }
        self
    }

    pub fn documents_enabled(mut self, enabled: bool) -> Self {
        self.config.documents.enabled = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.local.url, "http://localhost:11434");
        assert_eq!(config.local.model, "hoangquan456/qwen3-nothink:4b");
        assert_eq!(config.router.probe_timeout_secs, 5);
        assert_eq!(config.session.storage_dir, PathBuf::from("./sessions"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .cloud_api_key("test-key")
            .cloud_provider(CloudProvider::OpenAI)
            .session_id("line-3")
            .telemetry_db(None)
            .build();

        assert_eq!(config.cloud.api_key, Some("test-key".to_string()));
        assert_eq!(config.cloud_config().base_url, "https://api.openai.com/v1");
        assert_eq!(config.session.session_id, "line-3");
        assert!(!config.telemetry.enabled);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("OLLAMA_MODEL", "llama3.1"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("EDGE_SESSION_ID", "night"),
        ]
        .into_iter()
        .collect();

        let config =
            Config::default().with_overrides_from(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.local.model, "llama3.1");
        assert_eq!(config.cloud.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.session.session_id, "night");
        assert!(config.has_cloud_key());
    }

    #[test]
    fn test_generic_key_wins_over_provider_key() {
        let config = Config::default().with_overrides_from(|name| match name {
            "EDGE_CLOUD_API_KEY" => Some("generic".into()),
            "ANTHROPIC_API_KEY" => Some("specific".into()),
            _ => None,
        });
        assert_eq!(config.cloud.api_key.as_deref(), Some("generic"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.documents.chunk_overlap = config.documents.chunk_size;
        assert!(config.validate().is_err());

        let config = ConfigBuilder::new().probe_timeout_secs(0).build();
        assert!(config.validate().is_err());

        let config = ConfigBuilder::new().session_id("../x").build();
        assert!(config.validate().is_err());

        let config = ConfigBuilder::new().local_model(" ").build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [cloud]
            provider = "openai"
            model = "gpt-4o"

            [router]
            probe_timeout_secs = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.cloud.provider, CloudProvider::OpenAI);
        assert_eq!(config.router_config().probe_timeout, Duration::from_secs(2));
        assert_eq!(config.local.keep_alive, "10m");
    }

    #[test]
    fn test_example_config() {
        let example = Config::example();
        assert!(example.contains("[local]"));
        assert!(example.contains("[cloud]"));
        assert!(example.contains("[router]"));
    }
}
