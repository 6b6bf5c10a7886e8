//! Configuration loading, validation, and management for quarry.
//!
//! Loads configuration from `~/.quarry/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.quarry/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature for agent turns
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Agent loop bounds and prompts
    #[serde(default)]
    pub agent: AgentConfig,

    /// Structured output pass
    #[serde(default)]
    pub formatter: FormatterConfig,

    /// Paginated retrieval defaults for feed tools
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Upstream data API used by the built-in tools
    #[serde(default)]
    pub data_api: DataApiConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Log level and output format
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    4096
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("formatter", &self.formatter)
            .field("retrieval", &self.retrieval)
            .field("data_api", &self.data_api)
            .field("providers", &self.providers)
            .field("logging", &self.logging)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl std::fmt::Debug for DataApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model invocations per run
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Retries after a failed model invocation
    #[serde(default = "default_model_retries")]
    pub model_retries: u32,

    /// First retry delay; doubles on each further retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_max_turns() -> u32 {
    10
}
fn default_model_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_model_timeout_secs() -> u64 {
    120
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_system_prompt() -> String {
    "You are a research assistant with access to live data tools. \
     Use the tools to gather facts before answering; never invent numbers. \
     When a tool returns an error, correct the call or try another tool. \
     When you have enough information, reply with a concise final answer."
        .into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            model_retries: default_model_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            model_timeout_secs: default_model_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatterConfig {
    /// Re-prompts after an unparseable or mis-shaped reply
    #[serde(default = "default_formatter_retries")]
    pub max_retries: u32,

    /// Model for the formatting pass (defaults to `default_model`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_formatter_retries() -> u32 {
    2
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            max_retries: default_formatter_retries(),
            model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Delay between page fetches (rate-limit backoff)
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    /// Upper bound on pages per retrieval
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

fn default_page_delay_ms() -> u64 {
    250
}
fn default_max_pages() -> usize {
    20
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            page_delay_ms: default_page_delay_ms(),
            max_pages: default_max_pages(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DataApiConfig {
    #[serde(default = "default_data_api_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_data_api_timeout")]
    pub timeout_secs: u64,
}

fn default_data_api_url() -> String {
    "http://localhost:8787/v1".into()
}
fn default_data_api_timeout() -> u64 {
    30
}

impl Default for DataApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_data_api_url(),
            api_key: None,
            timeout_secs: default_data_api_timeout(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive when `RUST_LOG` is unset (e.g. "info", "quarry_agent=debug")
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl AppConfig {
    /// Load configuration from the default path (~/.quarry/config.toml).
    ///
    /// Also checks environment variables:
    /// - `QUARRY_API_KEY` (highest priority), `OPENROUTER_API_KEY`, `OPENAI_API_KEY`
    /// - `QUARRY_PROVIDER`, `QUARRY_MODEL`
    /// - `QUARRY_DATA_API_URL`, `QUARRY_DATA_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = var("QUARRY_API_KEY")
                .or_else(|| var("OPENROUTER_API_KEY"))
                .or_else(|| var("OPENAI_API_KEY"));
        }
        if let Some(provider) = var("QUARRY_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = var("QUARRY_MODEL") {
            self.default_model = model;
        }
        if let Some(url) = var("QUARRY_DATA_API_URL") {
            self.data_api.base_url = url;
        }
        if let Some(key) = var("QUARRY_DATA_API_KEY") {
            self.data_api.api_key = Some(key);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".quarry")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_turns must be at least 1".into(),
            ));
        }

        if self.agent.model_timeout_secs == 0 || self.agent.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent timeouts must be greater than zero".into(),
            ));
        }

        if self.retrieval.max_pages == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.max_pages must be at least 1".into(),
            ));
        }

        if !self.data_api.base_url.starts_with("http://")
            && !self.data_api.base_url.starts_with("https://")
        {
            return Err(ConfigError::ValidationError(
                "data_api.base_url must start with http:// or https://".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// The model the agent runs with: the selected provider's
    /// `default_model` when set, otherwise the top-level `default_model`.
    pub fn agent_model(&self) -> &str {
        self.providers
            .get(&self.default_provider)
            .and_then(|p| p.default_model.as_deref())
            .unwrap_or(&self.default_model)
    }

    /// The model used by the formatting pass.
    pub fn formatter_model(&self) -> &str {
        self.formatter
            .model
            .as_deref()
            .unwrap_or_else(|| self.agent_model())
    }

    /// Generate a default config TOML string (for `quarry config --default`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentConfig::default(),
            formatter: FormatterConfig::default(),
            retrieval: RetrievalConfig::default(),
            data_api: DataApiConfig::default(),
            providers: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
