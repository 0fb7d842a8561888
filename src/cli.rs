//! CLI argument definitions using clap
//!
//! Command-line flags override values loaded from the TOML config file.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::error::Result;

/// Real-time context-aware translation server
#[derive(Parser, Debug, Clone)]
#[command(name = "context-translator")]
#[command(about = "WebSocket translation server with per-speaker context")]
#[command(version)]
pub struct Args {
    /// Path to the TOML config file (created with defaults if missing)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "CONTEXT_TRANSLATOR_CONFIG")]
    pub config: PathBuf,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Disable per-speaker context
    #[arg(long)]
    pub no_context: bool,

    /// Translation backend (echo, http)
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Write the default config to --config and exit
    #[arg(long)]
    pub write_default_config: bool,
}

impl Args {
    /// Apply command-line overrides on top of `config` and re-validate
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.no_context {
            config.translation.use_context = false;
        }
        if let Some(backend) = &self.backend {
            config.translation.backend = backend.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        config.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_leave_config_untouched() {
        let args = Args::parse_from(["context-translator"]);
        let mut config = Config::default();
        args.apply(&mut config).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "context-translator",
            "--host",
            "0.0.0.0",
            "-p",
            "9000",
            "--no-context",
            "--log-level",
            "debug",
        ]);
        let mut config = Config::default();
        args.apply(&mut config).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert!(!config.translation.use_context);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args = Args::parse_from(["context-translator", "--backend", "gpu-magic"]);
        let mut config = Config::default();
        assert!(args.apply(&mut config).is_err());
    }
}
