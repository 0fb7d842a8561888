//! Server configuration management.
//!
//! The configuration lives in a TOML file (default `config/translator.toml`).
//! Every field has a default, so a partial file or no file at all yields a
//! runnable configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, ServerError};

/// Default configuration file location, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/translator.toml";

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Translation backend settings
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Speaker context settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// WebSocket listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of simultaneously open connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// How long shutdown waits for each connection to close
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,

    /// Largest inbound WebSocket message accepted
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_max_connections() -> usize {
    50
}

fn default_close_timeout_secs() -> u64 {
    5
}

fn default_max_message_bytes() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            close_timeout_secs: default_close_timeout_secs(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

/// Translation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranslationConfig {
    /// Backend name: "echo" or "http"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Base URL of the translation service (http backend)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Model identity reported to clients
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Device identity reported to clients
    #[serde(default = "default_device")]
    pub device: String,

    /// Default `max_length` for requests that do not carry one
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Feed each speaker's recent history back into their requests
    #[serde(default = "default_use_context")]
    pub use_context: bool,

    #[serde(default = "default_source_lang")]
    pub source_lang: String,

    #[serde(default = "default_target_lang")]
    pub target_lang: String,
}

fn default_backend() -> String {
    "echo".to_string()
}

fn default_endpoint() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_model_name() -> String {
    "facebook/nllb-200-distilled-1.3B".to_string()
}

fn default_device() -> String {
    "auto".to_string()
}

fn default_max_length() -> usize {
    256
}

fn default_use_context() -> bool {
    true
}

fn default_source_lang() -> String {
    "eng_Latn".to_string()
}

fn default_target_lang() -> String {
    "jpn_Jpan".to_string()
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout_secs(),
            model_name: default_model_name(),
            device: default_device(),
            max_length: default_max_length(),
            use_context: default_use_context(),
            source_lang: default_source_lang(),
            target_lang: default_target_lang(),
        }
    }
}

/// Speaker context configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextConfig {
    /// Number of (source, translation) pairs kept per speaker
    #[serde(default = "default_max_context_per_speaker")]
    pub max_context_per_speaker: usize,

    /// Sweep interval, also the idle age after which a speaker is dropped
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_max_context_per_speaker() -> usize {
    5
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_per_speaker: default_max_context_per_speaker(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl ContextConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path; empty logs to stderr
    #[serde(default)]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

impl LoggingConfig {
    pub fn file_path(&self) -> Option<PathBuf> {
        if self.file.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.file))
        }
    }
}

impl Config {
    /// Load configuration from a specific path, falling back to defaults if absent
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration, writing the defaults to `path` first if it does not exist.
    /// The flag is true when the file was created by this call.
    pub fn load_or_create(path: &Path) -> Result<(Self, bool)> {
        if path.exists() {
            return Ok((Self::load_from(path)?, false));
        }

        let config = Self::default();
        config.save_to(path)?;
        Ok((config, true))
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ServerError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ServerError::config(format!("Failed to serialize config: {}", e)))?;

        // Atomic write
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            return Err(ServerError::config("server.max_connections must be at least 1"));
        }
        if self.server.max_message_bytes == 0 {
            return Err(ServerError::config("server.max_message_bytes must be at least 1"));
        }
        if self.translation.max_length == 0 {
            return Err(ServerError::config("translation.max_length must be at least 1"));
        }
        if !["echo", "http"].contains(&self.translation.backend.as_str()) {
            return Err(ServerError::config(format!(
                "Unknown translation backend: {}. Must be one of: echo, http",
                self.translation.backend
            )));
        }
        if self.context.max_context_per_speaker == 0 {
            return Err(ServerError::config(
                "context.max_context_per_speaker must be at least 1",
            ));
        }
        if self.context.cleanup_interval_secs == 0 {
            return Err(ServerError::config("context.cleanup_interval_secs must be at least 1"));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ServerError::config(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}
