//! The shared pub/sub substrate carrying peer-channel traffic.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure surfaced by a [`Bus`] implementation.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The transport is unreachable (no known subscribers reachable, or a
    /// remote transport is down).
    #[error("bus unreachable")]
    Unreachable,
}

/// A topic-addressed publish/subscribe substrate.
///
/// Guarantees are best-effort, at-most-once, and never corrupt a message in
/// transit — callers needing stronger guarantees retry or ack at a higher
/// layer (see the peer channel's ack protocol).
#[async_trait]
pub trait Bus: Send + Sync {
    /// Subscribes `callback` to `topic`, invoked for every future publish.
    async fn subscribe(&self, topic: &str, callback: mpsc::UnboundedSender<Vec<u8>>) -> Result<(), BusError>;

    /// Publishes `payload` to every current subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Removes any subscription this caller previously registered on `topic`.
    async fn unsubscribe(&self, topic: &str) -> Result<(), BusError>;

    /// Whether the transport currently believes it can deliver messages.
    async fn is_reachable(&self) -> bool;
}

/// A process-local bus used for tests, demos, and the `local`/`bus` fallback
/// in single-process deployments.
#[derive(Default)]
pub struct InMemoryBus {
    subscribers: DashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl InMemoryBus {
    /// Builds an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self { subscribers: DashMap::new() }
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn subscribe(&self, topic: &str, callback: mpsc::UnboundedSender<Vec<u8>>) -> Result<(), BusError> {
        self.subscribers.entry(topic.to_string()).or_default().push(callback);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if let Some(mut subs) = self.subscribers.get_mut(topic) {
            subs.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BusError> {
        self.subscribers.remove(topic);
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        true
    }
}

/// Convenience constructor for a shared, ref-counted in-memory bus.
#[must_use]
pub fn shared_in_memory_bus() -> Arc<InMemoryBus> {
    Arc::new(InMemoryBus::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let bus = InMemoryBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe("topic-a", tx).await.unwrap();

        bus.publish("topic-a", b"hello".to_vec()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = InMemoryBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe("topic-b", tx).await.unwrap();
        bus.unsubscribe("topic-b").await.unwrap();

        bus.publish("topic-b", b"ignored".to_vec()).await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
