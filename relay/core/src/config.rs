//! TOML Configuration File Support
//!
//! Configuration for the relay, loaded from `~/.config/prompt-relay/relay.toml`
//! with environment overrides.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. Environment variables
//! 2. TOML configuration file
//! 3. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! model = "deepseek-r1:latest"
//! ollama_host = "localhost"
//! ollama_port = 11434
//!
//! [relay]
//! idle_timeout_ms = 60000
//! prompt_prefix = "Never show me anything between the <think></think> tags."
//! channel_capacity = 100
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Instruction prepended to every prompt unless configured otherwise
pub const DEFAULT_PROMPT_PREFIX: &str = "Never show me anything between the <think></think> tags.";

/// Model the chat panel talks to unless told otherwise
pub const DEFAULT_MODEL: &str = "deepseek-r1:latest";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Model name passed to the backend
    pub model: Option<String>,

    /// Ollama host name or URL
    pub ollama_host: Option<String>,

    /// Ollama port
    pub ollama_port: Option<u16>,
}

/// Relay section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Idle timeout between chunks in milliseconds
    pub idle_timeout_ms: Option<u64>,

    /// Text prepended to every prompt (empty disables)
    pub prompt_prefix: Option<String>,

    /// Capacity of the backend token channel
    pub channel_capacity: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfigToml {
    /// Backend configuration section
    pub backend: BackendToml,

    /// Relay configuration section
    pub relay: RelayToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved relay configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    /// Model name passed to the backend
    pub model: String,

    /// Ollama host name or URL
    pub ollama_host: String,

    /// Ollama port
    pub ollama_port: u16,

    /// How long a session may go without a chunk before it fails
    pub idle_timeout: Duration,

    /// Text prepended to every prompt; `None` sends prompts unchanged
    pub prompt_prefix: Option<String>,

    /// Capacity of the backend token channel
    pub channel_capacity: usize,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            ollama_host: "localhost".to_string(),
            ollama_port: 11434,
            idle_timeout: Duration::from_secs(60),
            prompt_prefix: Some(DEFAULT_PROMPT_PREFIX.to_string()),
            channel_capacity: 100,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the idle timeout
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Set the model name
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set or clear the prompt prefix
    #[must_use]
    pub fn with_prompt_prefix(mut self, prefix: Option<String>) -> Self {
        self.prompt_prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    /// Check values that would make the relay unusable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "model must not be empty".to_string(),
            ));
        }
        if self.ollama_host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "ollama_host must not be empty".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "idle_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/prompt-relay/relay.toml` or
/// `~/.config/prompt-relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("prompt-relay").join("relay.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resulting configuration is invalid. A missing config file is not an
/// error (defaults are used).
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if validation fails.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration using `env` to look up environment variables
pub(crate) fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<RelayConfig, ConfigError> {
    // Start with defaults
    let mut config = RelayConfig::default();

    // Try to load from file
    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RelayConfigToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    // Apply environment variables (overrides file values)
    apply_env_config(&mut config, env);

    config.validate()?;
    Ok(config)
}

fn apply_toml_config(config: &mut RelayConfig, toml: &RelayConfigToml) {
    if let Some(ref model) = toml.backend.model {
        config.model.clone_from(model);
    }
    if let Some(ref host) = toml.backend.ollama_host {
        config.ollama_host.clone_from(host);
    }
    if let Some(port) = toml.backend.ollama_port {
        config.ollama_port = port;
    }
    if let Some(ms) = toml.relay.idle_timeout_ms {
        config.idle_timeout = Duration::from_millis(ms);
    }
    if let Some(ref prefix) = toml.relay.prompt_prefix {
        config.prompt_prefix = Some(prefix.clone()).filter(|p| !p.is_empty());
    }
    if let Some(capacity) = toml.relay.channel_capacity {
        config.channel_capacity = capacity;
    }
}

fn apply_env_config(config: &mut RelayConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(model) = env("RELAY_MODEL") {
        config.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(host) = env("OLLAMA_HOST") {
        config.ollama_host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = env("OLLAMA_PORT").and_then(|v| v.parse::<u16>().ok()) {
        config.ollama_port = port;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("RELAY_IDLE_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.idle_timeout = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(prefix) = env("RELAY_PROMPT_PREFIX") {
        config.prompt_prefix = Some(prefix).filter(|p| !p.is_empty());
        config.source = ConfigSource::Env;
    }
}
