//! Tracing subscriber setup
//!
//! `RUST_LOG` always wins; otherwise the configured level applies to this
//! crate. Logs go to stderr, or to the configured file without ANSI colors.

use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Result, ServerError};

/// Filter used when `RUST_LOG` is not set
fn build_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let directive = format!("context_translator={}", level.to_ascii_lowercase());
    let directive = directive
        .parse()
        .map_err(|e| ServerError::config(format!("Invalid log level '{}': {}", level, e)))?;
    Ok(EnvFilter::new("warn").add_directive(directive))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(&config.level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match config.file_path() {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    installed.map_err(|e| ServerError::config(format!("Failed to initialize logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_known_levels() {
        for level in ["error", "warn", "INFO", "debug", "trace"] {
            assert!(build_filter(level).is_ok(), "level {} rejected", level);
        }
    }

    #[test]
    fn test_filter_rejects_garbage_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(matches!(
            build_filter("very loud"),
            Err(ServerError::Config { .. })
        ));
    }
}
