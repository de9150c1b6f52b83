//! Configuration loading, validation, and management for Dispatch.
//!
//! Loads configuration from `~/.dispatch/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.dispatch/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model used when a request names none
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Per-model endpoints, keyed by model selector
    #[serde(default = "default_models")]
    pub models: BTreeMap<String, ModelEndpoint>,

    /// Agent loop limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Chat persistence
    #[serde(default)]
    pub store: StoreConfig,

    /// Simulated topologies served by the in-process lab
    #[serde(default)]
    pub lab: LabConfig,
}

fn default_model() -> String {
    "qwen".into()
}

fn default_models() -> BTreeMap<String, ModelEndpoint> {
    [("qwen", 8080, 9621), ("deepseek", 8081, 9622), ("gemma", 8082, 9623)]
        .into_iter()
        .map(|(name, llm_port, kb_port)| {
            (
                name.to_string(),
                ModelEndpoint {
                    llm_url: format!("http://localhost:{llm_port}/v1"),
                    knowledge_url: format!("http://localhost:{kb_port}"),
                    api_key: None,
                },
            )
        })
        .collect()
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// Where one model is served.
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelEndpoint {
    /// OpenAI-compatible base URL (`.../v1`)
    pub llm_url: String,

    /// Knowledge service base URL
    pub knowledge_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ModelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelEndpoint")
            .field("llm_url", &self.llm_url)
            .field("knowledge_url", &self.knowledge_url)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model calls per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Transcript budget in estimated tokens
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Characters per estimated token
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Bound on connecting to the model and on each streamed chunk
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,

    /// Failed pushes per device before further pushes are refused
    #[serde(default = "default_max_push_failures")]
    pub max_push_failures: u32,

    /// Pause between consecutive tool calls
    #[serde(default = "default_tool_pause_ms")]
    pub tool_pause_ms: u64,

    /// Question/answer pairs of history given to a new run
    #[serde(default = "default_history_pairs")]
    pub history_pairs: usize,
}

fn default_max_iterations() -> usize {
    10
}
fn default_token_budget() -> usize {
    45_000
}
fn default_chars_per_token() -> usize {
    4
}
fn default_tool_timeout_secs() -> u64 {
    120
}
fn default_completion_timeout_secs() -> u64 {
    60
}
fn default_max_push_failures() -> u32 {
    2
}
fn default_tool_pause_ms() -> u64 {
    100
}
fn default_history_pairs() -> usize {
    2
}

impl AgentConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }

    pub fn tool_pause(&self) -> Duration {
        Duration::from_millis(self.tool_pause_ms)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            token_budget: default_token_budget(),
            chars_per_token: default_chars_per_token(),
            tool_timeout_secs: default_tool_timeout_secs(),
            completion_timeout_secs: default_completion_timeout_secs(),
            max_push_failures: default_max_push_failures(),
            tool_pause_ms: default_tool_pause_ms(),
            history_pairs: default_history_pairs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite database file; relative paths resolve against the config dir
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_backend() -> String {
    "sqlite".into()
}
fn default_store_path() -> String {
    "dispatch.db".into()
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.path);
        if path.is_absolute() {
            path
        } else {
            AppConfig::config_dir().join(path)
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabConfig {
    #[serde(default = "default_topologies")]
    pub topologies: Vec<LabTopology>,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            topologies: default_topologies(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabTopology {
    pub id: String,

    #[serde(default)]
    pub devices: Vec<LabDevice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabDevice {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    /// Initial running configuration
    #[serde(default)]
    pub running_config: String,

    /// Reject every fetch and push
    #[serde(default)]
    pub unreachable: bool,
}

fn default_topologies() -> Vec<LabTopology> {
    let router = |name: &str, port: u16| LabDevice {
        name: name.into(),
        device_type: Some("router".into()),
        port: Some(port),
        ip_address: None,
        running_config: format!("hostname {name}\n!\nend"),
        unreachable: false,
    };
    vec![LabTopology {
        id: "lab".into(),
        devices: vec![router("R1", 5000), router("R2", 5001)],
    }]
}

impl AppConfig {
    /// Load configuration from the default path (~/.dispatch/config.toml).
    ///
    /// Environment variables override file values:
    /// - `DISPATCH_MODEL` — default model
    /// - `DISPATCH_DATABASE` — SQLite database path
    /// - `LLAMA_SERVER_<MODEL>_URL` / `LIGHTRAG_<MODEL>_URL` — endpoints
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
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

    /// Apply overrides from `lookup` (the process environment in production).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("DISPATCH_MODEL") {
            self.default_model = model;
        }
        if let Some(path) = lookup("DISPATCH_DATABASE") {
            self.store.path = path;
        }

        for (name, endpoint) in self.models.iter_mut() {
            let upper = name.to_uppercase();
            if let Some(url) = lookup(&format!("LLAMA_SERVER_{upper}_URL")) {
                endpoint.llm_url = url;
            }
            if let Some(url) = lookup(&format!("LIGHTRAG_{upper}_URL")) {
                endpoint.knowledge_url = url;
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".dispatch")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one model must be configured".into(),
            ));
        }

        if !self.models.contains_key(&self.default_model) {
            return Err(ConfigError::ValidationError(format!(
                "default_model '{}' is not a configured model",
                self.default_model
            )));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be > 0".into(),
            ));
        }

        if self.agent.chars_per_token == 0 {
            return Err(ConfigError::ValidationError(
                "agent.chars_per_token must be > 0".into(),
            ));
        }

        if !matches!(self.store.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "store.backend must be 'sqlite' or 'memory', got '{}'",
                self.store.backend
            )));
        }

        Ok(())
    }

    /// Endpoints of a model, if configured.
    pub fn model(&self, name: &str) -> Option<&ModelEndpoint> {
        self.models.get(name)
    }

    /// Generate a default config TOML string (for `dispatch config`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            models: default_models(),
            agent: AgentConfig::default(),
            gateway: GatewayConfig::default(),
            store: StoreConfig::default(),
            lab: LabConfig::default(),
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
