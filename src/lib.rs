//! Context Translator: real-time translation over WebSocket
//!
//! This library provides a WebSocket server that translates short utterances
//! for many concurrent clients. Each speaker (identified by a `context_id`)
//! gets a bounded history of recent translations, which is handed to the
//! translator so follow-up sentences are translated consistently.
//!
//! # Example
//!
//! ```ignore
//! use context_translator::{Config, EchoTranslator, SessionServer, TranslatorHandle};
//!
//! let config = Config::default();
//! let translator = TranslatorHandle::spawn(|| Ok(Box::new(EchoTranslator::new()) as _))?;
//! let server = SessionServer::bind(config, translator).await?;
//! let handle = server.handle();
//! tokio::spawn(server.run());
//! // ...
//! handle.shutdown().await;
//! ```

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod socket_server;
pub mod translator;

// Re-export commonly used types
pub use cli::Args;
pub use config::{Config, ContextConfig, LoggingConfig, ServerConfig, TranslationConfig};
pub use context::{CleanupScheduler, ContextPair, ContextStore, SpeakerStats, SystemStats};
pub use error::{Result, ServerError};
pub use socket_server::{ServerHandle, ServerStats, SessionServer};
pub use translator::{
    EchoTranslator, HttpTranslator, TranslationJob, Translator, TranslatorHandle,
    SUPPORTED_LANGUAGES,
};
