//! Live connection registry
//!
//! Tracks every open connection from handshake to close. Registration and the
//! "stop accepting" switch share one lock, so a connection either registers
//! before shutdown begins (and is closed by it) or is turned away.

use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Unique identifier for a connection
pub type ConnectionId = String;

/// Facts about one open connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub client_id: ConnectionId,
    pub remote: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

/// Why a connection was not registered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// `max_connections` reached
    Full,
    /// Shutdown has begun
    ShuttingDown,
    /// Another live connection already holds this id
    DuplicateId,
}

struct RegistryInner {
    accepting: bool,
    live: HashMap<ConnectionId, ConnectionInfo>,
}

/// Set of currently open connections
pub struct ConnectionRegistry {
    max_connections: usize,
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            inner: Mutex::new(RegistryInner {
                accepting: true,
                live: HashMap::new(),
            }),
        }
    }

    /// Add a connection if there is room and the server is still accepting
    pub fn register(&self, client_id: &str, remote: SocketAddr) -> Result<(), Rejection> {
        let mut inner = self.inner.lock();
        if !inner.accepting {
            return Err(Rejection::ShuttingDown);
        }
        if inner.live.contains_key(client_id) {
            return Err(Rejection::DuplicateId);
        }
        if inner.live.len() >= self.max_connections {
            return Err(Rejection::Full);
        }
        inner.live.insert(
            client_id.to_string(),
            ConnectionInfo {
                client_id: client_id.to_string(),
                remote,
                connected_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Remove a connection, returns true if it was registered
    pub fn remove(&self, client_id: &str) -> bool {
        self.inner.lock().live.remove(client_id).is_some()
    }

    /// Refuse all further registrations. Returns the number still open.
    pub fn stop_accepting(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.accepting = false;
        inner.live.len()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.lock().accepting
    }

    pub fn get(&self, client_id: &str) -> Option<ConnectionInfo> {
        self.inner.lock().live.get(client_id).cloned()
    }

    /// Snapshot of all open connections
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.inner.lock().live.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().live.is_empty()
    }
}
