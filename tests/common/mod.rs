//! Common test utilities and fixtures for context-translator integration tests
//!
//! This module provides:
//! - `TestServer` for running a server on an ephemeral port
//! - `TestClient`, a thin JSON-over-WebSocket client
//! - Scripted translators for controlling backend timing

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod client;
pub mod translators;

pub use client::TestClient;
pub use translators::{GatedTranslator, Gate, PrefixTranslator};

use std::net::SocketAddr;

use tokio::task::JoinHandle;

use context_translator::{Config, EchoTranslator, ServerHandle, SessionServer, TranslatorHandle};

/// Config bound to an ephemeral localhost port with short close timeouts
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.close_timeout_secs = 1;
    config
}

/// A server running on a background task
pub struct TestServer {
    pub addr: SocketAddr,
    pub handle: ServerHandle,
    task: JoinHandle<context_translator::Result<()>>,
}

impl TestServer {
    pub async fn start(config: Config, translator: TranslatorHandle) -> Self {
        let server = SessionServer::bind(config, translator)
            .await
            .expect("Failed to bind test server");
        let addr = server.local_addr();
        let handle = server.handle();
        let task = tokio::spawn(server.run());

        Self { addr, handle, task }
    }

    /// Server backed by the echo translator with context enabled
    pub async fn echo() -> Self {
        Self::start(test_config(), echo_translator()).await
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connect(&self) -> TestClient {
        TestClient::connect(&self.url()).await
    }

    /// Shut down and wait for `run` to return
    pub async fn stop(self) {
        self.handle.shutdown().await;
        self.task
            .await
            .expect("Server task panicked")
            .expect("Server returned an error");
    }
}

pub fn echo_translator() -> TranslatorHandle {
    TranslatorHandle::spawn(|| Ok(Box::new(EchoTranslator::new()) as _))
        .expect("Failed to start echo translator")
}
