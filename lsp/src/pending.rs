//! In-flight request table.
//!
//! Each outgoing request registers a [`Waiter`] under its id before the frame
//! is written. The reader loop resolves it when the matching reply arrives;
//! a caller that gives up deregisters it. Whichever happens first removes the
//! entry, so an id is resolved at most once.

use std::collections::HashMap;
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{RpcError, RpcResult};

/// The receiving half of a single-assignment reply slot.
#[derive(Debug)]
pub struct Waiter {
    id: u64,
    rx: oneshot::Receiver<serde_json::Value>,
}

/// Why a [`Waiter`] finished without a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The deadline passed. The entry is still registered.
    TimedOut,
    /// The entry was dropped from the table without a reply.
    Abandoned,
}

impl Waiter {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the reply, bounded by `timeout`.
    pub async fn wait(self, timeout: Duration) -> Result<serde_json::Value, WaitError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(WaitError::Abandoned),
            Err(_) => Err(WaitError::TimedOut),
        }
    }
}

/// Maps request ids to the sender half of their waiter.
///
/// The lock is never held across an `.await`, so entries can be removed from
/// `Drop`.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>,
}

impl PendingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<serde_json::Value>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, id: u64) -> RpcResult<Waiter> {
        let mut entries = self.entries();
        if entries.contains_key(&id) {
            return Err(RpcError::protocol(format!(
                "request id {id} is already in flight"
            )));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(id, tx);
        Ok(Waiter { id, rx })
    }

    /// Deliver `message` to the waiter for `id`.
    ///
    /// Returns `false` when nobody is tracking `id` (the caller already timed
    /// out, or the server invented the id); the message is dropped.
    pub fn resolve(&self, id: u64, message: serde_json::Value) -> bool {
        let sender = self.entries().remove(&id);
        match sender {
            Some(tx) => {
                if tx.send(message).is_err() {
                    tracing::debug!(id, "Reply arrived after its caller stopped waiting");
                }
                true
            }
            None => {
                tracing::debug!(id, "Dropping reply for untracked request id");
                false
            }
        }
    }

    /// Remove the entry for `id` without resolving it.
    pub fn deregister(&self, id: u64) -> bool {
        self.entries().remove(&id).is_some()
    }

    /// Drop every entry. Their waiters finish with [`WaitError::Abandoned`].
    pub fn fail_all(&self) -> usize {
        let drained = mem::take(&mut *self.entries());
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries().contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_resolve_delivers_to_waiter() {
        let table = PendingTable::new();
        let waiter = table.register(1).unwrap();

        let reply = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}});
        assert!(table.resolve(1, reply.clone()));

        assert_eq!(waiter.wait(SHORT).await.unwrap(), reply);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_register_rejected() {
        let table = PendingTable::new();
        let _waiter = table.register(4).unwrap();
        assert!(matches!(
            table.register(4),
            Err(RpcError::Protocol(_))
        ));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_is_dropped() {
        let table = PendingTable::new();
        assert!(!table.resolve(99, serde_json::json!({"id": 99})));
    }

    #[tokio::test]
    async fn test_id_resolved_only_once() {
        let table = PendingTable::new();
        let waiter = table.register(2).unwrap();
        assert!(table.resolve(2, serde_json::json!({"result": "first"})));
        assert!(!table.resolve(2, serde_json::json!({"result": "second"})));
        assert_eq!(waiter.wait(SHORT).await.unwrap()["result"], "first");
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let table = PendingTable::new();
        let waiter = table.register(3).unwrap();
        assert_eq!(waiter.wait(SHORT).await, Err(WaitError::TimedOut));
        // The table does not clean up after a timed-out waiter on its own.
        assert!(table.contains(3));
        assert!(table.deregister(3));
        assert!(!table.resolve(3, serde_json::json!({})));
    }

    #[tokio::test]
    async fn test_out_of_order_resolution() {
        let table = PendingTable::new();
        let a = table.register(10).unwrap();
        let b = table.register(11).unwrap();

        table.resolve(11, serde_json::json!({"id": 11}));
        table.resolve(10, serde_json::json!({"id": 10}));

        assert_eq!(a.wait(SHORT).await.unwrap()["id"], 10);
        assert_eq!(b.wait(SHORT).await.unwrap()["id"], 11);
    }

    #[tokio::test]
    async fn test_fail_all_abandons_waiters() {
        let table = PendingTable::new();
        let a = table.register(1).unwrap();
        let b = table.register(2).unwrap();

        assert_eq!(table.fail_all(), 2);
        assert_eq!(a.wait(SHORT).await, Err(WaitError::Abandoned));
        assert_eq!(b.wait(SHORT).await, Err(WaitError::Abandoned));
    }
}
