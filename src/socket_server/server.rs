//! Session server: listener, shared state, and shutdown
//!
//! `SessionServer::bind` opens the listener (bind failures are fatal and are
//! returned to the caller), `run` drives the accept loop until shutdown is
//! requested through a [`ServerHandle`], then closes every connection with a
//! bounded wait before returning.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::context::{CleanupScheduler, ContextStore};
use crate::error::{Result, ServerError};
use crate::socket_server::connection::handle_connection;
use crate::socket_server::registry::ConnectionRegistry;
use crate::socket_server::requests::ActiveRequests;
use crate::translator::TranslatorHandle;

/// State shared by the accept loop, every connection, and every handle
pub struct ServerState {
    pub config: Config,
    pub translator: TranslatorHandle,
    /// `None` when context awareness is disabled
    pub contexts: Option<Arc<ContextStore>>,
    pub connections: ConnectionRegistry,
    pub requests: Arc<ActiveRequests>,
    shutdown_tx: watch::Sender<bool>,
    stopped_tx: watch::Sender<bool>,
}

impl ServerState {
    pub fn new(config: Config, translator: TranslatorHandle) -> Self {
        let contexts = config.translation.use_context.then(|| {
            Arc::new(ContextStore::new(
                config.context.max_context_per_speaker,
                config.context.cleanup_interval(),
            ))
        });
        let (shutdown_tx, _) = watch::channel(false);
        let (stopped_tx, _) = watch::channel(true);

        Self {
            connections: ConnectionRegistry::new(config.server.max_connections),
            requests: Arc::new(ActiveRequests::new()),
            contexts,
            translator,
            config,
            shutdown_tx,
            stopped_tx,
        }
    }

    pub fn context_enabled(&self) -> bool {
        self.contexts.is_some()
    }

    /// Receiver that flips to `true` once shutdown is requested
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

/// Counters reported by `stats`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
    pub connected_clients: usize,
    pub active_requests: usize,
}

/// Cloneable control surface for a running server
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<ServerState>,
}

impl ServerHandle {
    /// Ask the server to stop and wait until it has. Safe to call any number
    /// of times, including when the server is not running.
    pub async fn shutdown(&self) {
        let first = !self.state.shutdown_tx.send_replace(true);
        if first {
            tracing::info!("Shutdown requested");
        }

        let mut stopped = self.state.stopped_tx.subscribe();
        // Only fails if the state is gone, in which case nothing is running
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }

    pub fn is_running(&self) -> bool {
        !*self.state.stopped_tx.borrow()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            connected_clients: self.state.connections.len(),
            active_requests: self.state.requests.len(),
        }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }
}

/// WebSocket translation server
pub struct SessionServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<ServerState>,
}

impl SessionServer {
    /// Bind the listener described by `config.server`
    pub async fn bind(config: Config, translator: TranslatorHandle) -> Result<Self> {
        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            state: Arc::new(ServerState::new(config, translator)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Accept connections until shutdown, then close them all
    pub async fn run(self) -> Result<()> {
        let Self {
            listener,
            local_addr,
            state,
        } = self;

        state.stopped_tx.send_replace(false);
        let mut shutdown = state.shutdown_signal();
        if *shutdown.borrow_and_update() {
            tracing::info!("Shutdown requested before start; not serving");
            state.stopped_tx.send_replace(true);
            return Ok(());
        }

        let scheduler = state.contexts.as_ref().map(|store| {
            CleanupScheduler::start(
                store,
                state.config.context.cleanup_interval(),
                state.shutdown_signal(),
            )
        });

        tracing::info!("Translation server listening on ws://{}", local_addr);
        tracing::info!(
            context_enabled = state.context_enabled(),
            max_connections = state.config.server.max_connections,
            "Connect with a WebSocket client to start"
        );

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        tracing::debug!("Accepted TCP connection from {}", remote);
                        connections.spawn(handle_connection(stream, remote, Arc::clone(&state)));
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!("Connection task panicked: {}", e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        drop(listener);
        let open = state.connections.stop_accepting();
        tracing::info!("Closing {} connection(s)...", open);

        drain_connections(&mut connections, state.config.server.close_timeout()).await;

        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }

        state.stopped_tx.send_replace(true);
        tracing::info!("Translation server stopped");
        Ok(())
    }
}

/// Wait for connection tasks to finish their close handshake, then abort
/// whatever is still running once `timeout` has elapsed.
async fn drain_connections(connections: &mut JoinSet<()>, timeout: Duration) {
    let finished = tokio::time::timeout(timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if finished.is_err() {
        tracing::warn!(
            "{} connection(s) did not close within {}s; forcing close",
            connections.len(),
            timeout.as_secs()
        );
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }
}
