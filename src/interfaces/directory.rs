//! Peer discovery and mesh network-health reporting.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain_types::{AgentId, CapabilityName, TrustScore};

/// A directory entry describing one discoverable agent.
#[derive(Debug, Clone)]
pub struct AgentInfo {
    /// The agent's identifier.
    pub id: AgentId,
    /// The capabilities this agent advertises.
    pub capabilities: Vec<CapabilityName>,
    /// This directory's current trust assessment of the agent.
    pub trust_score: TrustScore,
}

/// A point-in-time snapshot of mesh connectivity.
#[derive(Debug, Clone, Copy)]
pub struct NetworkHealth {
    /// How many nodes the mesh currently believes are reachable.
    pub total_nodes: u32,
    /// Whether the mesh believes it is split into multiple partitions.
    pub partition_detected: bool,
}

impl NetworkHealth {
    /// Whether the mesh router should prefer a direct peer route given this
    /// snapshot: at least two reachable nodes and no detected partition.
    #[must_use]
    pub fn supports_direct_routing(&self) -> bool {
        self.total_nodes >= 2 && !self.partition_detected
    }
}

/// Read-only peer discovery and network-health reporting.
///
/// Kept read-only by design: the directory never learns about a channel or a
/// bus, breaking what would otherwise be a directory → node → channel → bus
/// → directory reference cycle.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Lists known agents, optionally filtered to those advertising all of
    /// `capabilities`.
    async fn discover_agents(&self, capabilities: &[CapabilityName]) -> Vec<AgentInfo>;

    /// Reports the directory's current view of mesh connectivity.
    async fn network_health(&self) -> NetworkHealth;

    /// Whether `agent_id` is known to this directory at all.
    async fn contains(&self, agent_id: AgentId) -> bool;
}

/// A reference [`Directory`] backed by an in-memory map, for tests and demos.
pub struct InMemoryDirectory {
    agents: DashMap<AgentId, AgentInfo>,
    health: std::sync::Mutex<NetworkHealth>,
}

impl InMemoryDirectory {
    /// Builds a directory reporting a healthy, fully connected mesh.
    #[must_use]
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
            health: std::sync::Mutex::new(NetworkHealth {
                total_nodes: 2,
                partition_detected: false,
            }),
        }
    }

    /// Registers or updates an agent's directory entry.
    pub fn upsert(&self, info: AgentInfo) {
        self.agents.insert(info.id, info);
    }

    /// Overrides the reported network-health snapshot, for testing fallback
    /// behavior in the mesh router.
    pub fn set_health(&self, health: NetworkHealth) {
        *self.health.lock().expect("directory health mutex poisoned") = health;
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn discover_agents(&self, capabilities: &[CapabilityName]) -> Vec<AgentInfo> {
        self.agents
            .iter()
            .filter(|entry| capabilities.iter().all(|cap| entry.capabilities.contains(cap)))
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn network_health(&self) -> NetworkHealth {
        *self.health.lock().expect("directory health mutex poisoned")
    }

    async fn contains(&self, agent_id: AgentId) -> bool {
        self.agents.contains_key(&agent_id)
    }
}
