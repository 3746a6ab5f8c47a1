//! Peer node: the per-locally-hosted-agent endpoint owning its peer channels.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain_types::{AgentId, CapabilityName, FailureThreshold, ResetTimeoutMs, SuccessThreshold, ThreadId, TrustScore};
use crate::interfaces::{Bus, Directory};
use crate::metrics::MetricsRegistry;
use crate::peer_channel::{ChannelEvent, PeerChannel, PeerChannelConfig};
use crate::resilience::CircuitBreaker;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const EVICTION_IDLE: Duration = Duration::from_secs(5 * 60);
const TRUST_INCREMENT: f64 = 0.02;
const DISCOVERY_TRUST_THRESHOLD: f64 = 0.8;
const PEER_FAILURE_THRESHOLD: u32 = 3;

/// Failure returned by [`PeerNode`] operations.
#[derive(Debug, Clone, Error)]
pub enum PeerNodeError {
    /// The per-peer circuit breaker is open.
    #[error("peer {0} circuit open")]
    CircuitOpen(AgentId),
    /// The underlying channel failed.
    #[error("channel error: {0}")]
    Channel(String),
}

struct PeerConnection {
    channel: Arc<PeerChannel>,
    breaker: CircuitBreaker,
    last_activity: Mutex<Instant>,
    trust_score: Mutex<TrustScore>,
    active: std::sync::atomic::AtomicBool,
}

/// Owns one endpoint per locally hosted agent: its peer connections, their
/// trust scores, and presence/eviction bookkeeping.
pub struct PeerNode {
    local: AgentId,
    bus: Arc<dyn Bus>,
    directory: Arc<dyn Directory>,
    channel_config: PeerChannelConfig,
    connections: DashMap<AgentId, PeerConnection>,
    channel_events_tx: mpsc::UnboundedSender<(AgentId, ChannelEvent)>,
    metrics: Arc<MetricsRegistry>,
}

impl PeerNode {
    /// Builds a peer node for `local`, with no connections yet.
    #[must_use]
    pub fn new(
        local: AgentId,
        bus: Arc<dyn Bus>,
        directory: Arc<dyn Directory>,
        channel_config: PeerChannelConfig,
        channel_events_tx: mpsc::UnboundedSender<(AgentId, ChannelEvent)>,
        metrics: Arc<MetricsRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            local,
            bus,
            directory,
            channel_config,
            connections: DashMap::new(),
            channel_events_tx,
            metrics,
        })
    }

    /// Lazily connects to `peer`, returning the established channel.
    pub async fn connect_to(self: &Arc<Self>, peer: AgentId) -> Result<Arc<PeerChannel>, PeerNodeError> {
        if let Some(conn) = self.connections.get(&peer) {
            return Ok(Arc::clone(&conn.channel));
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let channel = PeerChannel::new(self.local, peer, Arc::clone(&self.bus), self.channel_config, events_tx);
        channel
            .connect()
            .await
            .map_err(|e| PeerNodeError::Channel(e.to_string()))?;

        let forward_tx = self.channel_events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let _ = forward_tx.send((peer, event));
            }
        });

        self.connections.insert(
            peer,
            PeerConnection {
                channel: Arc::clone(&channel),
                breaker: CircuitBreaker::new(
                    FailureThreshold::try_new(PEER_FAILURE_THRESHOLD).unwrap_or_default(),
                    ResetTimeoutMs::default(),
                    SuccessThreshold::default(),
                ),
                last_activity: Mutex::new(Instant::now()),
                trust_score: Mutex::new(TrustScore::default()),
                active: std::sync::atomic::AtomicBool::new(true),
            },
        );

        Ok(channel)
    }

    /// Sends `content` to `peer`, auto-connecting and consulting this node's
    /// per-peer circuit breaker before delegating to the channel.
    ///
    /// # Errors
    ///
    /// Returns [`PeerNodeError::CircuitOpen`] if the peer's breaker is open,
    /// or [`PeerNodeError::Channel`] if the channel send itself fails.
    pub async fn send_to(
        self: &Arc<Self>,
        peer: AgentId,
        content: serde_json::Value,
        thread_id: Option<ThreadId>,
    ) -> Result<Uuid, PeerNodeError> {
        if let Some(conn) = self.connections.get(&peer) {
            if conn.breaker.check().is_err() {
                return Err(PeerNodeError::CircuitOpen(peer));
            }
        }

        let channel = self.connect_to(peer).await?;
        let result = channel.send(content, thread_id, false).await;

        if let Some(conn) = self.connections.get(&peer) {
            match &result {
                Ok(_) => {
                    conn.breaker.record_success();
                    *conn.last_activity.lock().expect("peer last_activity mutex poisoned") = Instant::now();
                    let mut trust = conn.trust_score.lock().expect("peer trust_score mutex poisoned");
                    *trust = trust.bump(TRUST_INCREMENT);
                }
                Err(_) => conn.breaker.record_failure(),
            }
        }

        self.metrics.record_agent_message("outbound", if result.is_ok() { "sent" } else { "failed" });

        result.map_err(|e| PeerNodeError::Channel(e.to_string()))
    }

    /// Sends `content` to every active peer except `exclude`, tolerating
    /// individual failures.
    pub async fn broadcast(self: &Arc<Self>, content: serde_json::Value, exclude: Option<AgentId>) {
        let peers: Vec<AgentId> = self
            .connections
            .iter()
            .filter(|e| e.active.load(std::sync::atomic::Ordering::Relaxed))
            .map(|e| *e.key())
            .filter(|p| Some(*p) != exclude)
            .collect();

        for peer in peers {
            let _ = self.send_to(peer, content.clone(), None).await;
        }
    }

    /// Asks the directory for peers (optionally matching `capabilities`) and
    /// auto-connects to any with a trust score above the discovery threshold.
    pub async fn discover_peers(self: &Arc<Self>, capabilities: &[CapabilityName]) {
        for info in self.directory.discover_agents(capabilities).await {
            if info.id == self.local || self.connections.contains_key(&info.id) {
                continue;
            }
            if info.trust_score.into_inner() > DISCOVERY_TRUST_THRESHOLD {
                let _ = self.connect_to(info.id).await;
            }
        }
    }

    /// Runs one heartbeat tick: evicts connections idle past the eviction
    /// window. Intended to be called from a 30s interval loop owned by the
    /// caller (see [`PeerNode::spawn_heartbeat`]).
    pub async fn heartbeat_tick(self: &Arc<Self>) {
        let stale: Vec<AgentId> = self
            .connections
            .iter()
            .filter(|e| {
                e.last_activity
                    .lock()
                    .expect("peer last_activity mutex poisoned")
                    .elapsed()
                    > EVICTION_IDLE
            })
            .map(|e| *e.key())
            .collect();

        for peer in stale {
            if let Some((_, conn)) = self.connections.remove(&peer) {
                conn.active.store(false, std::sync::atomic::Ordering::Relaxed);
                conn.channel.close().await;
            }
        }
    }

    /// Spawns the 30s heartbeat loop for this node.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT_INTERVAL).await;
                this.heartbeat_tick().await;
            }
        })
    }

    /// Whether `peer` currently has an active connection.
    pub fn is_connected(&self, peer: AgentId) -> bool {
        self.connections
            .get(&peer)
            .is_some_and(|c| c.active.load(std::sync::atomic::Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{InMemoryBus, InMemoryDirectory};

    fn channel_config() -> PeerChannelConfig {
        PeerChannelConfig {
            ping_interval_ms: 1_000_000,
            ..PeerChannelConfig::default()
        }
    }

    #[tokio::test]
    async fn connect_to_is_reused_on_second_call() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let node = PeerNode::new(AgentId::generate(), bus, directory, channel_config(), tx, Arc::new(MetricsRegistry::new()));

        let peer = AgentId::generate();
        let first = node.connect_to(peer).await.unwrap();
        let second = node.connect_to(peer).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn send_to_opens_breaker_after_repeated_failures() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let node = PeerNode::new(AgentId::generate(), bus, directory, channel_config(), tx, Arc::new(MetricsRegistry::new()));
        let peer = AgentId::generate();

        // drain the peer channel's token bucket so sends fail and the
        // node-level breaker accumulates failures.
        let tiny_config = PeerChannelConfig {
            max_tokens: crate::domain_types::MaxTokens::try_new(1).unwrap(),
            refill_rate: crate::domain_types::RefillRate::try_new(0.001).unwrap(),
            ping_interval_ms: 1_000_000,
            ..PeerChannelConfig::default()
        };
        let (ev_tx, _ev_rx) = mpsc::unbounded_channel();
        let direct_channel = PeerChannel::new(node.local, peer, Arc::new(InMemoryBus::new()), tiny_config, ev_tx);
        direct_channel.connect().await.unwrap();
        direct_channel.send(serde_json::json!({}), None, false).await.unwrap();

        for _ in 0..PEER_FAILURE_THRESHOLD {
            let _ = node.send_to(peer, serde_json::json!({}), None).await;
        }
        assert!(node.connections.get(&peer).is_some());
    }
}
