//! Pending-call correlation
//!
//! Concurrency-safe map from request id to the handle that resolves the
//! waiting caller. Entries are registered before the request bytes are
//! flushed to the wire, so a reply arriving immediately after the write
//! always finds its waiter. Entries are removed exactly once, on success,
//! worker error, timeout, or shutdown, which keeps `len()` an accurate
//! count of truly in-flight calls.

use crate::error::{BridgeError, BridgeResult};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

/// Correlation table shared between callers and the reader task
#[derive(Debug)]
pub struct PendingCalls {
    next_id: AtomicU64,
    entries: DashMap<u64, oneshot::Sender<BridgeResult<Value>>>,
}

impl PendingCalls {
    /// Create an empty table; ids start at 1
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: DashMap::new(),
        }
    }

    /// Allocate the next correlation id
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a waiter for an id, returning the receiving half
    ///
    /// Callers register before flushing the matching request.
    pub fn register(&self, id: u64) -> oneshot::Receiver<BridgeResult<Value>> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(id, tx);
        rx
    }

    /// Resolve the waiter for an id
    ///
    /// Returns false when no entry exists, either because the id was never
    /// registered or because a timeout or earlier response already consumed
    /// it. The caller decides whether that is worth logging.
    pub fn resolve(&self, id: u64, outcome: BridgeResult<Value>) -> bool {
        match self.entries.remove(&id) {
            Some((_, tx)) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop the entry for an id without resolving it
    ///
    /// Used when the outer timeout fires or the send itself failed; a late
    /// response for the id will then show up as unmatched.
    pub fn remove(&self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Resolve every outstanding waiter with the given error
    pub fn fail_all(&self, error: BridgeError) {
        let ids: Vec<u64> = self.entries.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.entries.remove(&id) {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }

    /// Number of truly in-flight calls
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no call is in flight
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let pending = PendingCalls::new();
        assert_eq!(pending.next_id(), 1);
        assert_eq!(pending.next_id(), 2);
        assert_eq!(pending.next_id(), 3);
    }

    #[tokio::test]
    async fn test_register_then_resolve() {
        let pending = PendingCalls::new();
        let rx = pending.register(1);

        assert!(pending.resolve(1, Ok(json!({"ok": true}))));
        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome["ok"], true);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_unknown_id() {
        let pending = PendingCalls::new();
        assert!(!pending.resolve(99, Ok(json!(null))));
    }

    #[tokio::test]
    async fn test_first_resolution_wins() {
        let pending = PendingCalls::new();
        let rx = pending.register(5);

        assert!(pending.resolve(5, Ok(json!("first"))));
        assert!(!pending.resolve(5, Ok(json!("second"))));
        assert_eq!(rx.await.unwrap().unwrap(), json!("first"));
    }

    #[tokio::test]
    async fn test_removed_entry_rejects_late_response() {
        let pending = PendingCalls::new();
        let _rx = pending.register(7);

        assert!(pending.remove(7));
        assert!(!pending.resolve(7, Ok(json!(null))));
    }

    #[tokio::test]
    async fn test_fail_all_drains_every_waiter() {
        let pending = PendingCalls::new();
        let rx1 = pending.register(1);
        let rx2 = pending.register(2);
        assert_eq!(pending.len(), 2);

        pending.fail_all(BridgeError::Closed);

        assert!(rx1.await.unwrap().unwrap_err().to_string().contains("closed"));
        assert!(matches!(rx2.await.unwrap(), Err(BridgeError::Closed)));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_len_tracks_in_flight_calls() {
        let pending = PendingCalls::new();
        let _rx1 = pending.register(1);
        let _rx2 = pending.register(2);
        assert_eq!(pending.len(), 2);

        pending.resolve(1, Ok(json!(null)));
        assert_eq!(pending.len(), 1);
    }
}
