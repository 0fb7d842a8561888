//! Translation Socket Server
//!
//! A WebSocket server that accepts many concurrent clients, forwards their
//! translation requests to a single translator, and keeps per-speaker
//! history so consecutive utterances are translated in context.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CONTEXT TRANSLATOR SERVER                        │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  SessionServer ──accept──► handle_connection (one task per client)      │
//! │                                  │                                      │
//! │        ┌─────────────────────────┼──────────────────────────┐           │
//! │        ▼                         ▼                          ▼           │
//! │  ConnectionRegistry        ActiveRequests            ContextStore       │
//! │  (live clients, limit)     (in-flight, RAII)         (speaker history)  │
//! │                                  │                          ▲           │
//! │                                  ▼                          │           │
//! │                         TranslatorHandle ──► worker thread  │           │
//! │                         (one call at a time)                │           │
//! │                                                             │           │
//! │                                         CleanupScheduler ───┘           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! All messages are JSON over WebSocket:
//!
//! ```json
//! // Client -> Server
//! {"type": "translation", "request_id": "r1", "text": "Hello", "context_id": "alice"}
//! {"type": "ping"}
//! {"type": "stats"}
//! {"type": "context_clear", "context_id": "alice"}
//! {"type": "context_stats", "context_id": "alice"}
//!
//! // Server -> Client
//! {"type": "connection", "status": "connected", "client_id": "...", "server_info": {...}}
//! {"request_id": "r1", "translated": "...", "translation_type": "contextual", "status": "completed", ...}
//! {"type": "error", "error": "...", "status": "error"}
//! ```

pub mod connection;
pub mod protocol;
pub mod registry;
pub mod requests;
pub mod server;

pub use connection::{handle_connection, CloseReason, ConnectionPhase};
pub use protocol::{
    ClientMessage, Outbound, ServerInfo, ServerMessage, TranslationMode, TranslationRequest,
    TranslationResult,
};
pub use registry::{ConnectionInfo, ConnectionRegistry, Rejection};
pub use requests::{ActiveRequest, ActiveRequests, RequestGuard};
pub use server::{ServerHandle, ServerState, ServerStats, SessionServer};
