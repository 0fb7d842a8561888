//! In-flight translation bookkeeping
//!
//! Each accepted translation request holds a [`RequestGuard`] for as long as
//! it is being processed. Dropping the guard removes the entry, so the table
//! is cleaned up on every exit path: success, error, early return, task
//! abort, or panic.
//!
//! Request ids are supplied by clients. If a second live request reuses an
//! id, it replaces the first entry; each guard only ever removes the entry it
//! created, so the earlier request finishing does not erase the later one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// One request between receipt and response
#[derive(Debug, Clone)]
pub struct ActiveRequest {
    pub request_id: String,
    pub connection_id: String,
    pub context_id: Option<String>,
    /// Advisory, not used for scheduling
    pub priority: String,
    pub start_time: Instant,
    ticket: u64,
}

/// Table of in-flight requests shared by all connections
#[derive(Default)]
pub struct ActiveRequests {
    entries: Mutex<HashMap<String, ActiveRequest>>,
    next_ticket: AtomicU64,
}

impl ActiveRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request; the entry lives until the returned guard is dropped
    pub fn begin(
        self: &Arc<Self>,
        request_id: &str,
        connection_id: &str,
        context_id: Option<String>,
        priority: String,
    ) -> RequestGuard {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let entry = ActiveRequest {
            request_id: request_id.to_string(),
            connection_id: connection_id.to_string(),
            context_id,
            priority,
            start_time: Instant::now(),
            ticket,
        };

        if let Some(previous) = self.entries.lock().insert(request_id.to_string(), entry) {
            tracing::warn!(
                request_id,
                previous_connection = %previous.connection_id,
                "Request id reused while still in flight; tracking the newer request"
            );
        }

        RequestGuard {
            table: Arc::clone(self),
            request_id: request_id.to_string(),
            ticket,
        }
    }

    fn finish(&self, request_id: &str, ticket: u64) {
        let mut entries = self.entries.lock();
        if entries.get(request_id).map(|e| e.ticket) == Some(ticket) {
            entries.remove(request_id);
        }
    }

    /// Drop every entry owned by a connection. Returns how many were removed.
    pub fn purge_connection(&self, connection_id: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.connection_id != connection_id);
        before - entries.len()
    }

    pub fn get(&self, request_id: &str) -> Option<ActiveRequest> {
        self.entries.lock().get(request_id).cloned()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.lock().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Removes its request from the table when dropped
pub struct RequestGuard {
    table: Arc<ActiveRequests>,
    request_id: String,
    ticket: u64,
}

impl RequestGuard {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.table.finish(&self.request_id, self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn begin(table: &Arc<ActiveRequests>, id: &str, conn: &str) -> RequestGuard {
        table.begin(id, conn, None, "normal".to_string())
    }

    #[test]
    fn test_guard_removes_entry_on_drop() {
        let table = Arc::new(ActiveRequests::new());
        let guard = table.begin("r1", "c1", Some("s1".to_string()), "high".to_string());

        let entry = table.get("r1").unwrap();
        assert_eq!(entry.connection_id, "c1");
        assert_eq!(entry.context_id.as_deref(), Some("s1"));
        assert_eq!(entry.priority, "high");
        assert_eq!(guard.request_id(), "r1");

        drop(guard);
        assert!(!table.contains("r1"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_guard_cleans_up_on_error_path() {
        let table = Arc::new(ActiveRequests::new());

        let failing = |table: &Arc<ActiveRequests>| -> Result<(), String> {
            let _guard = begin(table, "r1", "c1");
            Err("backend failed".to_string())
        };

        assert!(failing(&table).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_purge_connection_removes_all_its_requests() {
        let table = Arc::new(ActiveRequests::new());
        let guards: Vec<_> = (0..5)
            .map(|i| begin(&table, &format!("a{}", i), "conn-a"))
            .collect();
        let _other = begin(&table, "b0", "conn-b");

        assert_eq!(table.len(), 6);
        assert_eq!(table.purge_connection("conn-a"), 5);
        assert_eq!(table.len(), 1);
        assert!(table.contains("b0"));

        // Guards dropping after a purge are harmless
        drop(guards);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_reused_id_keeps_newer_entry() {
        let table = Arc::new(ActiveRequests::new());
        let first = begin(&table, "dup", "c1");
        let second = begin(&table, "dup", "c2");

        drop(first);
        assert_eq!(table.get("dup").unwrap().connection_id, "c2");

        drop(second);
        assert!(table.is_empty());
    }
}
