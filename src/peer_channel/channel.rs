//! The peer channel itself: connect/send/receive/close plus liveness.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain_types::{AgentId, HistorySize, MaxMissedPings, MaxTokens, MessageContent, RefillRate, ThreadId};
use crate::interfaces::{Bus, BusError};

use super::token_bucket::TokenBucket;

/// A deterministic identifier for the channel between two agents, stable
/// regardless of which side establishes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes the deterministic channel id for `a` and `b`, independent of
/// argument order.
#[must_use]
pub fn channel_id(a: AgentId, b: AgentId) -> ChannelId {
    let (lo, hi) = if a.to_string() <= b.to_string() { (a, b) } else { (b, a) };
    ChannelId(format!("{lo}::{hi}"))
}

fn inbound_topic(agent: AgentId) -> String {
    format!("messages-to-{agent}")
}

fn ack_topic(agent: AgentId) -> String {
    format!("acks-to-{agent}")
}

/// Lifecycle state of a [`PeerChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Never connected.
    Idle,
    /// Subscribing to topics and starting background tasks.
    Connecting,
    /// Ready to send and receive.
    Connected,
    /// Tearing down background tasks.
    Closing,
    /// Fully torn down; terminal.
    Closed,
}

/// Failure returned by [`PeerChannel`] operations.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// The channel is not in the `Connected` state.
    #[error("peer channel not connected")]
    NotConnected,
    /// The send-path token bucket has no tokens available.
    #[error("peer channel rate limit exceeded")]
    RateLimitExceeded,
    /// The content failed [`MessageContent`]'s validation (empty or over 10MB).
    #[error("invalid message content: {0}")]
    InvalidContent(String),
    /// The underlying bus failed.
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Delivery status of an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    /// The peer's channel received the envelope.
    Received,
    /// The peer finished processing the envelope's content.
    Processed,
    /// The peer failed to process the envelope's content.
    Error,
}

/// The wire envelope carried on `messages-to-{agentId}` topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// A fresh identifier for this specific envelope.
    pub id: Uuid,
    /// The sending agent.
    pub from_agent: AgentId,
    /// The receiving agent.
    pub to_agent: AgentId,
    /// Arbitrary JSON payload.
    pub content: serde_json::Value,
    /// Optional thread grouping for ordering purposes.
    pub thread_id: Option<ThreadId>,
    /// When this envelope was sent.
    pub timestamp: DateTime<Utc>,
    /// Whether the receiver should emit an ack once received.
    #[serde(default)]
    pub acknowledgement_required: bool,
}

/// The wire envelope carried on `acks-to-{agentId}` topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// The envelope id being acknowledged.
    pub message_id: Uuid,
    /// The agent emitting the ack.
    pub from_agent: AgentId,
    /// When the ack was emitted.
    pub timestamp: DateTime<Utc>,
    /// The ack's status.
    pub status: AckStatus,
    /// An error detail, set only when `status == Error`.
    pub error: Option<String>,
}

/// An observation emitted by a [`PeerChannel`] to its owner.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A new message addressed to this end arrived.
    Message(MessageEnvelope),
    /// An ack for a previously sent message arrived.
    Ack(Acknowledgement),
    /// A pending-ack timer expired before a matching ack arrived.
    AckTimeout(Uuid),
    /// `max_missed_pings` consecutive liveness probes went unanswered.
    Unhealthy,
    /// The channel has fully closed.
    Disconnected,
}

/// Tunables for a [`PeerChannel`].
#[derive(Debug, Clone, Copy)]
pub struct PeerChannelConfig {
    /// Token-bucket capacity for the send path.
    pub max_tokens: MaxTokens,
    /// Token-bucket refill rate, tokens per second.
    pub refill_rate: RefillRate,
    /// Capacity of the ring history buffer.
    pub max_history_size: HistorySize,
    /// Consecutive missed pings before the channel is declared unhealthy.
    pub max_missed_pings: MaxMissedPings,
    /// Milliseconds to wait for an ack before timing out.
    pub ack_timeout_ms: u64,
    /// Milliseconds between liveness pings.
    pub ping_interval_ms: u64,
}

impl Default for PeerChannelConfig {
    fn default() -> Self {
        Self {
            max_tokens: MaxTokens::default(),
            refill_rate: RefillRate::default(),
            max_history_size: HistorySize::default(),
            max_missed_pings: MaxMissedPings::default(),
            ack_timeout_ms: 30_000,
            ping_interval_ms: 30_000,
        }
    }
}

const PING_MARKER: &str = "__relaymesh_ping__";
const PONG_MARKER: &str = "__relaymesh_pong__";

struct Tasks {
    listener: Option<JoinHandle<()>>,
    liveness: Option<JoinHandle<()>>,
    pending_acks: std::collections::HashMap<Uuid, JoinHandle<()>>,
}

/// A bidirectional, acked, rate-limited link between exactly two agents.
pub struct PeerChannel {
    local: AgentId,
    peer: AgentId,
    id: ChannelId,
    bus: Arc<dyn Bus>,
    config: PeerChannelConfig,
    state: Mutex<ChannelState>,
    history: Mutex<VecDeque<MessageEnvelope>>,
    tokens: TokenBucket,
    missed_pings: AtomicU32,
    tasks: Mutex<Tasks>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl PeerChannel {
    /// Builds a channel between `local` and `peer`, not yet connected.
    #[must_use]
    pub fn new(
        local: AgentId,
        peer: AgentId,
        bus: Arc<dyn Bus>,
        config: PeerChannelConfig,
        events_tx: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: channel_id(local, peer),
            local,
            peer,
            bus,
            config,
            state: Mutex::new(ChannelState::Idle),
            history: Mutex::new(VecDeque::new()),
            tokens: TokenBucket::new(config.max_tokens, config.refill_rate),
            missed_pings: AtomicU32::new(0),
            tasks: Mutex::new(Tasks {
                listener: None,
                liveness: None,
                pending_acks: std::collections::HashMap::new(),
            }),
            events_tx,
        })
    }

    /// The deterministic channel id for this pair.
    #[must_use]
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ChannelState {
        *self.state.lock().expect("channel state mutex poisoned")
    }

    /// A snapshot of the most recent history entries, oldest first.
    pub fn history(&self) -> Vec<MessageEnvelope> {
        self.history.lock().expect("channel history mutex poisoned").iter().cloned().collect()
    }

    /// Connects the channel: subscribes to both topics and starts the
    /// listener and liveness tasks. Idempotent.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ChannelError> {
        {
            let mut state = self.state.lock().expect("channel state mutex poisoned");
            if matches!(*state, ChannelState::Connecting | ChannelState::Connected) {
                return Ok(());
            }
            *state = ChannelState::Connecting;
        }

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.bus.subscribe(&inbound_topic(self.local), raw_tx.clone()).await?;
        self.bus.subscribe(&ack_topic(self.local), raw_tx).await?;

        let this = Arc::clone(self);
        let listener = tokio::spawn(async move {
            while let Some(bytes) = raw_rx.recv().await {
                this.handle_inbound(&bytes).await;
            }
        });

        let this = Arc::clone(self);
        let ping_interval = Duration::from_millis(self.config.ping_interval_ms);
        let liveness = tokio::spawn(async move {
            loop {
                tokio::time::sleep(ping_interval).await;
                if this.state() != ChannelState::Connected {
                    break;
                }
                this.tick_liveness().await;
            }
        });

        let mut tasks = self.tasks.lock().expect("channel tasks mutex poisoned");
        tasks.listener = Some(listener);
        tasks.liveness = Some(liveness);
        drop(tasks);

        *self.state.lock().expect("channel state mutex poisoned") = ChannelState::Connected;
        Ok(())
    }

    async fn tick_liveness(self: &Arc<Self>) {
        // Pings go through the normal send path: they compete for send-path
        // token-bucket capacity and land in history like any other message.
        if self
            .send(serde_json::json!({ "control": PING_MARKER }), None, false)
            .await
            .is_ok()
        {
            let missed = self.missed_pings.fetch_add(1, Ordering::SeqCst) + 1;
            if missed >= self.config.max_missed_pings.into_inner() {
                let _ = self.events_tx.send(ChannelEvent::Unhealthy);
            }
        }
    }

    async fn handle_inbound(&self, bytes: &[u8]) {
        if let Ok(envelope) = serde_json::from_slice::<MessageEnvelope>(bytes) {
            if envelope.to_agent != self.local {
                return;
            }
            if envelope.content.get("control").and_then(|v| v.as_str()) == Some(PING_MARKER) {
                let pong = self.build_envelope(serde_json::json!({ "control": PONG_MARKER }), None, false);
                let _ = self.publish(&pong).await;
                return;
            }
            if envelope.content.get("control").and_then(|v| v.as_str()) == Some(PONG_MARKER) {
                self.missed_pings.store(0, Ordering::SeqCst);
                return;
            }

            self.push_history(envelope.clone());
            let _ = self.events_tx.send(ChannelEvent::Message(envelope.clone()));

            if envelope.acknowledgement_required {
                let ack = Acknowledgement {
                    message_id: envelope.id,
                    from_agent: self.local,
                    timestamp: Utc::now(),
                    status: AckStatus::Received,
                    error: None,
                };
                let _ = self.publish_ack(&ack).await;
            }
            return;
        }

        if let Ok(ack) = serde_json::from_slice::<Acknowledgement>(bytes) {
            let mut tasks = self.tasks.lock().expect("channel tasks mutex poisoned");
            if let Some(handle) = tasks.pending_acks.remove(&ack.message_id) {
                handle.abort();
            }
            drop(tasks);
            let _ = self.events_tx.send(ChannelEvent::Ack(ack));
            return;
        }

        tracing::warn!(channel_id = %self.id, "dropped malformed envelope");
    }

    fn push_history(&self, envelope: MessageEnvelope) {
        let mut history = self.history.lock().expect("channel history mutex poisoned");
        history.push_back(envelope);
        while history.len() > self.config.max_history_size.into_inner() {
            history.pop_front();
        }
    }

    fn build_envelope(&self, content: serde_json::Value, thread_id: Option<ThreadId>, ack_required: bool) -> MessageEnvelope {
        MessageEnvelope {
            id: Uuid::new_v4(),
            from_agent: self.local,
            to_agent: self.peer,
            content,
            thread_id,
            timestamp: Utc::now(),
            acknowledgement_required: ack_required,
        }
    }

    async fn publish(&self, envelope: &MessageEnvelope) -> Result<(), ChannelError> {
        let bytes = serde_json::to_vec(envelope).unwrap_or_default();
        self.bus.publish(&inbound_topic(self.peer), bytes).await?;
        Ok(())
    }

    async fn publish_ack(&self, ack: &Acknowledgement) -> Result<(), ChannelError> {
        let bytes = serde_json::to_vec(ack).unwrap_or_default();
        self.bus.publish(&ack_topic(self.peer), bytes).await?;
        Ok(())
    }

    /// Sends `content` to the peer, drawing one token from the send-path
    /// rate limiter and registering a pending-ack timer if `require_ack`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotConnected`] if not connected, or
    /// [`ChannelError::RateLimitExceeded`] if the token bucket is empty.
    pub async fn send(
        self: &Arc<Self>,
        content: serde_json::Value,
        thread_id: Option<ThreadId>,
        require_ack: bool,
    ) -> Result<Uuid, ChannelError> {
        if self.state() != ChannelState::Connected {
            return Err(ChannelError::NotConnected);
        }

        let serialized = serde_json::to_vec(&content).unwrap_or_default();
        MessageContent::try_new(serialized).map_err(|e| ChannelError::InvalidContent(e.to_string()))?;

        if !self.tokens.try_consume() {
            return Err(ChannelError::RateLimitExceeded);
        }

        let envelope = self.build_envelope(content, thread_id, require_ack);
        self.publish(&envelope).await?;
        self.push_history(envelope.clone());

        if require_ack {
            let message_id = envelope.id;
            let this = Arc::clone(self);
            let timeout = Duration::from_millis(self.config.ack_timeout_ms);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let mut tasks = this.tasks.lock().expect("channel tasks mutex poisoned");
                if tasks.pending_acks.remove(&message_id).is_some() {
                    drop(tasks);
                    let _ = this.events_tx.send(ChannelEvent::AckTimeout(message_id));
                }
            });
            self.tasks
                .lock()
                .expect("channel tasks mutex poisoned")
                .pending_acks
                .insert(message_id, handle);
        }

        Ok(envelope.id)
    }

    /// Closes the channel: cancels timers, unsubscribes topics, transitions
    /// to `Closed`. Idempotent.
    pub async fn close(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().expect("channel state mutex poisoned");
            if matches!(*state, ChannelState::Closing | ChannelState::Closed) {
                return;
            }
            *state = ChannelState::Closing;
        }

        let mut tasks = self.tasks.lock().expect("channel tasks mutex poisoned");
        if let Some(handle) = tasks.listener.take() {
            handle.abort();
        }
        if let Some(handle) = tasks.liveness.take() {
            handle.abort();
        }
        for (_, handle) in tasks.pending_acks.drain() {
            handle.abort();
        }
        drop(tasks);

        let _ = self.bus.unsubscribe(&inbound_topic(self.local)).await;
        let _ = self.bus.unsubscribe(&ack_topic(self.local)).await;

        *self.state.lock().expect("channel state mutex poisoned") = ChannelState::Closed;
        let _ = self.events_tx.send(ChannelEvent::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::InMemoryBus;

    fn config() -> PeerChannelConfig {
        PeerChannelConfig {
            max_tokens: MaxTokens::try_new(5).unwrap(),
            refill_rate: RefillRate::try_new(1000.0).unwrap(),
            max_history_size: HistorySize::try_new(3).unwrap(),
            max_missed_pings: MaxMissedPings::try_new(2).unwrap(),
            ack_timeout_ms: 40,
            ping_interval_ms: 1_000_000,
        }
    }

    #[test]
    fn channel_id_is_order_independent() {
        let a = AgentId::generate();
        let b = AgentId::generate();
        assert_eq!(channel_id(a, b), channel_id(b, a));
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let ch = PeerChannel::new(AgentId::generate(), AgentId::generate(), bus, config(), tx);
        ch.connect().await.unwrap();
        ch.connect().await.unwrap();
        assert_eq!(ch.state(), ChannelState::Connected);
    }

    #[tokio::test]
    async fn send_then_receive_round_trips_through_bus() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let a = AgentId::generate();
        let b = AgentId::generate();

        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let chan_a = PeerChannel::new(a, b, Arc::clone(&bus), config(), tx_a);
        let chan_b = PeerChannel::new(b, a, bus, config(), tx_b);
        chan_a.connect().await.unwrap();
        chan_b.connect().await.unwrap();

        chan_a.send(serde_json::json!({"hello": "world"}), None, false).await.unwrap();

        let event = tokio::time::timeout(Duration::from_millis(200), rx_b.recv()).await.unwrap().unwrap();
        match event {
            ChannelEvent::Message(envelope) => assert_eq!(envelope.content["hello"], "world"),
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ring_history_drops_oldest() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let ch = PeerChannel::new(AgentId::generate(), AgentId::generate(), bus, config(), tx);
        ch.connect().await.unwrap();

        for i in 0..5 {
            ch.send(serde_json::json!({ "i": i }), None, false).await.unwrap();
        }

        let history = ch.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content["i"], 2);
        assert_eq!(history[2].content["i"], 4);
    }

    #[tokio::test]
    async fn send_requires_connected_state() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let ch = PeerChannel::new(AgentId::generate(), AgentId::generate(), bus, config(), tx);
        let result = ch.send(serde_json::json!({}), None, false).await;
        assert!(matches!(result, Err(ChannelError::NotConnected)));
    }

    #[tokio::test]
    async fn ack_timeout_fires_when_no_ack_arrives() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ch = PeerChannel::new(AgentId::generate(), AgentId::generate(), bus, config(), tx);
        ch.connect().await.unwrap();

        let id = ch.send(serde_json::json!({}), None, true).await.unwrap();
        let event = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, ChannelEvent::AckTimeout(got) if got == id));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_transitions_terminal() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let ch = PeerChannel::new(AgentId::generate(), AgentId::generate(), bus, config(), tx);
        ch.connect().await.unwrap();
        ch.close().await;
        ch.close().await;
        assert_eq!(ch.state(), ChannelState::Closed);
    }
}
