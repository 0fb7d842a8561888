//! WebSocket connection handler
//!
//! Manages individual client connections: handshake, registration, message
//! dispatch, and close. Messages on one connection are handled strictly one
//! at a time, so responses leave in the order requests arrived. The socket is
//! still read while a translation runs: new messages wait in a queue, and a
//! client that goes away is purged without waiting for the translator.
//!
//! ```text
//! Connecting ──handshake ok──► Open ──close / fatal decode / shutdown──► Closing ──► Closed
//! ```

use std::borrow::Cow;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_async_with_config, WebSocketStream};

use crate::context::unix_seconds;
use crate::error::{Result, ServerError};
use crate::socket_server::protocol::{
    ClientMessage, Outbound, ServerInfo, ServerMessage, TranslationMode, TranslationRequest,
    TranslationResult,
};
use crate::socket_server::registry::Rejection;
use crate::socket_server::server::ServerState;
use crate::translator::TranslationJob;

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Why a connection is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame or the stream ended
    ClientClosed,
    /// Server shutdown
    ServerShutdown,
    /// A binary frame that is not UTF-8 text
    InvalidPayload,
    /// Read or write failed at the transport level
    TransportError,
    /// `max_connections` reached
    ConnectionLimit,
}

impl CloseReason {
    /// Close frame to send, if the transport is still usable
    fn frame(self) -> Option<CloseFrame<'static>> {
        let (code, reason) = match self {
            Self::ClientClosed => (CloseCode::Normal, "closing"),
            Self::ServerShutdown => (CloseCode::Away, "server shutting down"),
            Self::InvalidPayload => (CloseCode::Invalid, "message is not valid UTF-8 JSON"),
            Self::ConnectionLimit => (CloseCode::Again, "too many connections"),
            Self::TransportError => return None,
        };
        Some(CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        })
    }
}

/// What one read from the socket amounts to
enum Inbound {
    Text(String),
    Ignore,
    Close(CloseReason),
}

/// Handle a single WebSocket connection from accept to close
pub async fn handle_connection(stream: TcpStream, remote: SocketAddr, state: Arc<ServerState>) {
    tracing::info!("New connection from {}", remote);

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(state.config.server.max_message_bytes);

    // Accept WebSocket handshake
    let ws_stream = match accept_async_with_config(stream, Some(ws_config)).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::error!("WebSocket handshake failed for {}: {}", remote, e);
            return;
        }
    };

    let client_id = new_client_id();
    let mut conn = ConnectionState::new(ws_stream, client_id, remote, Arc::clone(&state));

    let _registration = loop {
        match state.connections.register(&conn.client_id, remote) {
            Ok(()) => break Registration::new(Arc::clone(&state), conn.client_id.clone()),
            Err(Rejection::DuplicateId) => {
                tracing::debug!(client_id = %conn.client_id, "Client id in use; picking another");
                conn.client_id = new_client_id();
            }
            Err(rejection) => {
                tracing::warn!(
                    client_id = %conn.client_id,
                    "Rejecting connection from {}: {:?}",
                    remote,
                    rejection
                );
                let reason = match rejection {
                    Rejection::ShuttingDown => CloseReason::ServerShutdown,
                    _ => CloseReason::ConnectionLimit,
                };
                conn.close(reason).await;
                return;
            }
        }
    };

    conn.run().await;

    tracing::info!(client_id = %conn.client_id, "Connection closed from {}", remote);
}

/// Short random client identifier
fn new_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Keeps a connection in the live set; on drop removes it and purges any
/// requests it still had in flight. Runs on normal exit and on task abort.
struct Registration {
    state: Arc<ServerState>,
    client_id: String,
}

impl Registration {
    fn new(state: Arc<ServerState>, client_id: String) -> Self {
        Self { state, client_id }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.state.connections.remove(&self.client_id);
        let purged = self.state.requests.purge_connection(&self.client_id);
        if purged > 0 {
            tracing::info!(
                client_id = %self.client_id,
                "Dropped {} in-flight request(s) of closed connection",
                purged
            );
        }
    }
}

/// State for a single connection
struct ConnectionState {
    ws: WebSocketStream<TcpStream>,
    state: Arc<ServerState>,
    client_id: String,
    remote: SocketAddr,
    phase: ConnectionPhase,
    shutdown: watch::Receiver<bool>,
    /// Messages that arrived while a translation was running
    pending: VecDeque<String>,
    /// Set when the connection must close after the current message
    closing: Option<CloseReason>,
}

impl ConnectionState {
    fn new(
        ws: WebSocketStream<TcpStream>,
        client_id: String,
        remote: SocketAddr,
        state: Arc<ServerState>,
    ) -> Self {
        let shutdown = state.shutdown_signal();
        Self {
            ws,
            state,
            client_id,
            remote,
            phase: ConnectionPhase::Connecting,
            shutdown,
            pending: VecDeque::new(),
            closing: None,
        }
    }

    fn transition(&mut self, next: ConnectionPhase) {
        tracing::debug!(
            client_id = %self.client_id,
            "Connection {:?} -> {:?}",
            self.phase,
            next
        );
        self.phase = next;
    }

    async fn run(&mut self) {
        self.transition(ConnectionPhase::Open);

        let ack = self.connection_ack();
        let reason = match self.send(&ack).await {
            Ok(()) => self.serve().await,
            Err(e) => {
                tracing::warn!(client_id = %self.client_id, "Failed to send connection ack: {}", e);
                CloseReason::TransportError
            }
        };

        self.close(reason).await;
    }

    /// Read and answer messages until the connection has to close
    async fn serve(&mut self) -> CloseReason {
        loop {
            if let Some(reason) = self.closing.take() {
                return reason;
            }
            if *self.shutdown.borrow() {
                return CloseReason::ServerShutdown;
            }

            let text = match self.pending.pop_front() {
                Some(text) => text,
                None => {
                    let next = tokio::select! {
                        msg = self.ws.next() => msg,
                        _ = shutdown_requested(&mut self.shutdown) => return CloseReason::ServerShutdown,
                    };
                    match self.classify(next) {
                        Inbound::Text(text) => text,
                        Inbound::Ignore => continue,
                        Inbound::Close(reason) => return reason,
                    }
                }
            };

            if let Err(e) = self.handle_message(&text).await {
                tracing::warn!(
                    client_id = %self.client_id,
                    code = e.code(),
                    "Failed to send response: {}",
                    e
                );
                if !e.is_recoverable() {
                    return CloseReason::TransportError;
                }
            }
        }
    }

    /// Decode one socket read. Pings are answered by tungstenite itself.
    fn classify(&self, next: Option<std::result::Result<Message, tungstenite::Error>>) -> Inbound {
        match next {
            Some(Ok(Message::Text(text))) => Inbound::Text(text),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => Inbound::Text(text),
                Err(_) => {
                    tracing::warn!(client_id = %self.client_id, "Undecodable binary frame");
                    Inbound::Close(CloseReason::InvalidPayload)
                }
            },
            Some(Ok(Message::Close(_))) => {
                tracing::info!("Client {} requested close", self.client_id);
                Inbound::Close(CloseReason::ClientClosed)
            }
            Some(Ok(_)) => Inbound::Ignore,
            Some(Err(e)) => {
                tracing::warn!(client_id = %self.client_id, "WebSocket error: {}", e);
                Inbound::Close(CloseReason::TransportError)
            }
            None => Inbound::Close(CloseReason::ClientClosed),
        }
    }

    /// Dispatch one decoded message. Only transport failures are returned;
    /// everything else is answered on the socket.
    async fn handle_message(&mut self, text: &str) -> Result<()> {
        let msg = match ClientMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(client_id = %self.client_id, "Rejected message: {}", e);
                return self.send_error(&e, None).await;
            }
        };

        match msg {
            ClientMessage::Translation(request) => self.handle_translation(request).await,

            ClientMessage::InvalidTranslation {
                request_id,
                message,
            } => {
                let invalid = ServerError::Protocol { message };
                self.send_error(&invalid, request_id).await
            }

            ClientMessage::Ping => {
                self.send(&ServerMessage::pong(unix_seconds(Utc::now())))
                    .await
            }

            ClientMessage::Stats => {
                let stats = self.stats_message();
                self.send(&stats).await
            }

            ClientMessage::ContextClear { context_id } => {
                let Some(store) = self.state.contexts.clone() else {
                    return self.send_error(&ServerError::ContextDisabled, None).await;
                };
                let Some(context_id) = context_id else {
                    let missing = ServerError::MissingField { field: "context_id" };
                    return self.send_error(&missing, None).await;
                };

                let existed = store.clear(&context_id);
                self.send(&ServerMessage::context_cleared(context_id, existed))
                    .await
            }

            ClientMessage::ContextStats { context_id } => {
                let Some(store) = self.state.contexts.clone() else {
                    return self.send_error(&ServerError::ContextDisabled, None).await;
                };
                let Some(context_id) = context_id else {
                    let missing = ServerError::MissingField { field: "context_id" };
                    return self.send_error(&missing, None).await;
                };

                let export = store.export(&context_id);
                self.send(&ServerMessage::ContextStats {
                    context_id,
                    found: export.is_some(),
                    stats: export.as_ref().map(|e| e.stats.clone()),
                    buffer: export.map(|e| e.buffer),
                })
                .await
            }

            ClientMessage::Unknown(kind) => {
                let unknown = ServerError::Protocol {
                    message: format!("Unknown message type: {}", kind),
                };
                self.send_error(&unknown, None).await
            }
        }
    }

    async fn handle_translation(&mut self, request: TranslationRequest) -> Result<()> {
        let Some(request_id) = request.request_id().map(str::to_string) else {
            let missing = ServerError::MissingField { field: "request_id" };
            return self.send_error(&missing, None).await;
        };
        let context_id = request.context_id().map(str::to_string);

        let text = request.text.trim();
        if text.is_empty() {
            return self
                .send(&TranslationResult::empty(request_id, context_id))
                .await;
        }

        // Held until the response has been sent
        let _active = self.state.requests.begin(
            &request_id,
            &self.client_id,
            context_id.clone(),
            request.priority.clone(),
        );

        let defaults = &self.state.config.translation;
        let job = TranslationJob {
            text: text.to_string(),
            source_lang: request
                .source_lang
                .clone()
                .unwrap_or_else(|| defaults.source_lang.clone()),
            target_lang: request
                .target_lang
                .clone()
                .unwrap_or_else(|| defaults.target_lang.clone()),
            max_length: request.max_length.unwrap_or(defaults.max_length),
        };

        let started = Instant::now();
        let state = Arc::clone(&self.state);
        let translation = translate(&state, job, context_id.as_deref());
        tokio::pin!(translation);

        let outcome = loop {
            tokio::select! {
                result = &mut translation => break result,
                _ = shutdown_requested(&mut self.shutdown) => {
                    tracing::info!(
                        client_id = %self.client_id,
                        request_id = %request_id,
                        "Abandoning translation: server shutting down"
                    );
                    self.closing = Some(CloseReason::ServerShutdown);
                    return Ok(());
                }
                frame = self.ws.next() => match self.classify(frame) {
                    Inbound::Text(text) => self.pending.push_back(text),
                    Inbound::Ignore => {}
                    Inbound::Close(reason) => {
                        tracing::info!(
                            client_id = %self.client_id,
                            request_id = %request_id,
                            "Client left mid-translation; result will be discarded"
                        );
                        self.closing = Some(reason);
                        return Ok(());
                    }
                },
            }
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok((translated, mode)) => {
                tracing::info!(
                    client_id = %self.client_id,
                    request_id = %request_id,
                    mode = ?mode,
                    elapsed_ms = %format!("{:.1}", elapsed_ms),
                    "Translated: {} -> {}",
                    preview(text),
                    preview(&translated)
                );
                let result =
                    TranslationResult::completed(request_id, translated, mode, context_id.clone(), elapsed_ms);
                self.send(&result).await
            }
            Err(e) => {
                tracing::error!(
                    client_id = %self.client_id,
                    request_id = %request_id,
                    code = e.code(),
                    "Translation failed: {}",
                    e
                );
                self.send_error(&e, Some(request_id)).await
            }
        }
    }

    fn connection_ack(&self) -> ServerMessage {
        let info = self.state.translator.info();
        ServerMessage::Connection {
            status: "connected".to_string(),
            client_id: self.client_id.clone(),
            server_info: ServerInfo {
                model: info.model.clone(),
                device: info.device.clone(),
                context_enabled: self.state.context_enabled(),
                supported_languages: info.supported_languages.clone(),
            },
        }
    }

    fn stats_message(&self) -> ServerMessage {
        ServerMessage::Stats {
            connected_clients: self.state.connections.len(),
            active_requests: self.state.requests.len(),
            translator_ready: self.state.translator.is_ready(),
            context_enabled: self.state.context_enabled(),
            context_stats: self.state.contexts.as_ref().map(|store| store.system_stats()),
        }
    }

    async fn send<T>(&mut self, msg: &T) -> Result<()>
    where
        T: Clone + Into<Outbound>,
    {
        let outbound: Outbound = msg.clone().into();
        self.send_json(&outbound).await
    }

    async fn send_json<T: Serialize>(&mut self, msg: &T) -> Result<()> {
        let json = serde_json::to_string(msg).map_err(|e| ServerError::Protocol {
            message: format!("Failed to encode response: {}", e),
        })?;
        self.ws.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn send_error(&mut self, error: &ServerError, request_id: Option<String>) -> Result<()> {
        self.send(&ServerMessage::error(error.to_string(), request_id))
            .await
    }

    /// Send a close frame and wait, bounded, for the peer to finish the handshake
    async fn close(&mut self, reason: CloseReason) {
        self.transition(ConnectionPhase::Closing);

        if let Some(frame) = reason.frame() {
            if let Err(e) = self.ws.close(Some(frame)).await {
                tracing::debug!(client_id = %self.client_id, "Close frame not sent: {}", e);
            }

            let timeout = self.state.config.server.close_timeout();
            let drained = tokio::time::timeout(timeout, async {
                while let Some(Ok(_)) = self.ws.next().await {}
            })
            .await;
            if drained.is_err() {
                tracing::debug!(
                    client_id = %self.client_id,
                    "Peer did not finish close handshake; dropping {}",
                    self.remote
                );
            }
        }

        self.transition(ConnectionPhase::Closed);
    }
}

/// Resolve once shutdown has been requested
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Run one job, with the speaker's history when context is enabled
async fn translate(
    state: &ServerState,
    job: TranslationJob,
    context_id: Option<&str>,
) -> Result<(String, TranslationMode)> {
    match (context_id, state.contexts.as_ref()) {
        (Some(context_id), Some(store)) => {
            let history = store.get(context_id);
            let original = job.text.clone();
            let translated = state.translator.translate_with_context(job, history).await?;
            store.append(context_id, &original, &translated);
            Ok((translated, TranslationMode::Contextual))
        }
        _ => {
            let translated = state.translator.translate(job).await?;
            Ok((translated, TranslationMode::Simple))
        }
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 50;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let head: String = text.chars().take(LIMIT).collect();
        format!("{}...", head)
    }
}
