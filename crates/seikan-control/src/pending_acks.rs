//! Pending acknowledgement tracker
//!
//! Tracks bounded-wait requests sent to one connection and routes the
//! connection's `ack` replies back to the waiting task.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Tracks requests awaiting an `ack` on a single connection
///
/// Ids are never reused for the lifetime of the tracker, so a late reply to
/// a cancelled request can never be mistaken for a reply to a newer one.
#[derive(Clone, Default)]
pub struct PendingAcks {
    next_id: Arc<AtomicU64>,
    /// Maps ack id -> oneshot sender for the reply payload
    waiters: Arc<DashMap<u64, oneshot::Sender<Value>>>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending request
    /// Returns the ack id to send and a receiver for the reply payload
    pub fn register(&self) -> (u64, oneshot::Receiver<Value>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, tx);
        debug!("Registered pending ack {}", id);
        (id, rx)
    }

    /// Deliver a reply
    /// Returns true if a waiter received it, false if the id was unknown or the waiter gave up
    pub fn resolve(&self, id: u64, payload: Value) -> bool {
        if let Some((_, tx)) = self.waiters.remove(&id) {
            if tx.send(payload).is_err() {
                warn!("Failed to deliver ack {} - waiter dropped", id);
                return false;
            }
            return true;
        }
        debug!("No pending request for ack {}", id);
        false
    }

    /// Cancel a pending request (e.g., on timeout)
    pub fn cancel(&self, id: u64) {
        if self.waiters.remove(&id).is_some() {
            debug!("Cancelled pending ack {}", id);
        }
    }

    /// Drop every waiter; their receivers observe a closed channel
    pub fn cancel_all(&self) {
        self.waiters.clear();
    }

    /// Get count of pending requests
    pub fn count(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_resolve() {
        let acks = PendingAcks::new();

        let (id, rx) = acks.register();
        assert_eq!(acks.count(), 1);

        assert!(acks.resolve(id, json!({"publicKey": "k"})));
        assert_eq!(acks.count(), 0);
        assert_eq!(rx.await.unwrap(), json!({"publicKey": "k"}));
    }

    #[tokio::test]
    async fn test_ids_are_not_reused() {
        let acks = PendingAcks::new();

        let (first, _rx1) = acks.register();
        acks.cancel(first);
        let (second, _rx2) = acks.register();

        assert_ne!(first, second);
        // Late reply to the cancelled request goes nowhere
        assert!(!acks.resolve(first, json!(null)));
        assert_eq!(acks.count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_unknown() {
        let acks = PendingAcks::new();
        assert!(!acks.resolve(999, json!({})));
    }

    #[tokio::test]
    async fn test_resolve_with_dropped_receiver() {
        let acks = PendingAcks::new();
        let (id, rx) = acks.register();
        drop(rx);
        assert!(!acks.resolve(id, json!({})));
    }

    #[tokio::test]
    async fn test_double_resolve() {
        let acks = PendingAcks::new();
        let (id, rx) = acks.register();

        assert!(acks.resolve(id, json!(1)));
        assert!(!acks.resolve(id, json!(2)));
        assert_eq!(rx.await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_cancel_all_closes_receivers() {
        let acks = PendingAcks::new();
        let (_, rx1) = acks.register();
        let (_, rx2) = acks.register();

        acks.cancel_all();

        assert_eq!(acks.count(), 0);
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let acks = PendingAcks::new();
        let clone = acks.clone();

        let (id, rx) = acks.register();
        assert_eq!(clone.count(), 1);

        clone.resolve(id, json!("via clone"));
        assert_eq!(rx.await.unwrap(), json!("via clone"));
    }
}
