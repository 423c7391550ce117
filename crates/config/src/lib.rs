//! Configuration loading, validation, and management for corvid.
//!
//! Loads configuration from `./config.toml` (or `~/.corvid/config.toml`) with
//! environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM backend settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Orchestration loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Context window budget
    #[serde(default)]
    pub context: ContextConfig,

    /// Where pruned turns are archived
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Tool servers, keyed by server name
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// anthropic | openai | openrouter | ollama | vllm | lmstudio | custom
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Override the provider's default endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Replaces the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_provider() -> String {
    "anthropic".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_request_timeout() -> u64 {
    300
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("system_prompt", &self.system_prompt)
            .finish()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model calls allowed per user request
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Per-call timeout for tools whose server sets none
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Tool payloads longer than this (in characters) are truncated
    #[serde(default = "default_max_result_length")]
    pub max_result_length: usize,

    /// Prune to the retention target and retry once when the backend reports
    /// a context overflow
    #[serde(default)]
    pub retry_on_context_overflow: bool,
}

fn default_max_iterations() -> usize {
    50
}
fn default_tool_timeout() -> u64 {
    60
}
fn default_max_result_length() -> usize {
    10_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tool_timeout_secs: default_tool_timeout(),
            max_result_length: default_max_result_length(),
            retry_on_context_overflow: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Estimated-token ceiling that triggers pruning
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Newest turns that are never pruned
    #[serde(default = "default_min_recent_turns")]
    pub min_recent_turns: usize,

    /// Pruning stops once the window is at or below this fraction of the ceiling
    #[serde(default = "default_retention_ratio")]
    pub retention_ratio: f64,
}

fn default_max_context_tokens() -> usize {
    150_000
}
fn default_min_recent_turns() -> usize {
    10
}
fn default_retention_ratio() -> f64 {
    0.5
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            min_recent_turns: default_min_recent_turns(),
            retention_ratio: default_retention_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// file | memory | none
    #[serde(default = "default_archive_backend")]
    pub backend: String,

    /// JSONL file for the `file` backend (`~` is expanded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_archive_backend() -> String {
    "file".into()
}

impl ArchiveConfig {
    /// The archive file path, defaulting to `~/.corvid/archive.jsonl`.
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => expand_home(p),
            None => AppConfig::config_dir().join("archive.jsonl"),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            backend: default_archive_backend(),
            path: None,
        }
    }
}

/// A tool server launched as a child process speaking MCP over stdio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables (the parent environment is inherited)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Overrides `agent.tool_timeout_secs` for this server's tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Expose tools as `<server>_<tool>`
    #[serde(default = "default_true")]
    pub prefix_tools: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load configuration, applying environment overrides.
    ///
    /// Search order: `explicit`, then `./config.toml`, then
    /// `~/.corvid/config.toml`. A missing file yields defaults.
    ///
    /// Environment variables:
    /// - `CORVID_API_KEY` (highest priority), then `ANTHROPIC_API_KEY`,
    ///   `OPENAI_API_KEY` or `OPENROUTER_API_KEY` matching the provider
    /// - `CORVID_PROVIDER`, `CORVID_MODEL`
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => Self::default_path(),
        };
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// The file `load(None)` reads.
    pub fn default_path() -> PathBuf {
        let local = PathBuf::from("config.toml");
        if local.exists() {
            local
        } else {
            Self::config_dir().join("config.toml")
        }
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

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(provider) = var("CORVID_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Some(model) = var("CORVID_MODEL") {
            self.llm.model = model;
        }

        if let Some(key) = var("CORVID_API_KEY") {
            self.llm.api_key = Some(key);
        } else if self.llm.api_key.is_none() {
            let provider_var = match self.llm.provider.as_str() {
                "anthropic" => Some("ANTHROPIC_API_KEY"),
                "openai" => Some("OPENAI_API_KEY"),
                "openrouter" => Some("OPENROUTER_API_KEY"),
                _ => None,
            };
            self.llm.api_key = provider_var.and_then(|name| var(name));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".corvid")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.context.max_context_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_context_tokens must be > 0".into(),
            ));
        }

        if self.context.min_recent_turns == 0 {
            return Err(ConfigError::ValidationError(
                "context.min_recent_turns must be at least 1".into(),
            ));
        }

        if !(self.context.retention_ratio > 0.0 && self.context.retention_ratio <= 1.0) {
            return Err(ConfigError::ValidationError(
                "context.retention_ratio must be in (0.0, 1.0]".into(),
            ));
        }

        if !matches!(self.archive.backend.as_str(), "file" | "memory" | "none") {
            return Err(ConfigError::ValidationError(format!(
                "archive.backend must be one of file, memory, none (got '{}')",
                self.archive.backend
            )));
        }

        for (name, server) in &self.servers {
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(ConfigError::ValidationError(format!(
                    "server name '{name}' must be non-empty and contain no whitespace"
                )));
            }
            if server.command.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "servers.{name}.command must not be empty"
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.llm.api_key.is_some()
    }

    /// Generate a starter config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let mut config = Self::default();
        config.servers.insert(
            "example".into(),
            ServerConfig {
                command: "uvx".into(),
                args: vec!["mcp-server-time".into()],
                env: BTreeMap::new(),
                timeout_secs: Some(30),
                prefix_tools: true,
                enabled: false,
            },
        );
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs_home().join(rest),
        None if path == "~" => dirs_home(),
        None => PathBuf::from(path),
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
