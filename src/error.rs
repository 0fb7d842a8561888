//! Error types for context-translator

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Main error type for server operations
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Translation failed: {message}")]
    Backend { message: String },

    #[error("Translation backend is not running")]
    BackendUnavailable,

    #[error("Context management is disabled")]
    ContextDisabled,

    #[error("WebSocket error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Short, stable identifier used in logs
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config_error",
            Self::Bind { .. } => "bind_error",
            Self::Protocol { .. } => "protocol_error",
            Self::MissingField { .. } => "missing_field",
            Self::Backend { .. } => "backend_error",
            Self::BackendUnavailable => "backend_unavailable",
            Self::ContextDisabled => "context_disabled",
            Self::Transport(_) => "transport_error",
            Self::Io(_) => "io_error",
        }
    }

    /// Errors that are reported back to the client without closing the connection
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Transport(_) | Self::Io(_) | Self::Bind { .. })
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_message() {
        let err = ServerError::MissingField { field: "request_id" };
        assert_eq!(err.to_string(), "Missing required field: request_id");
        assert_eq!(err.code(), "missing_field");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_io_errors_are_not_recoverable() {
        let err = ServerError::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        assert!(!err.is_recoverable());
    }
}
