//! Relaymesh: a resilience-first messaging and orchestration core for a mesh
//! of software agents.
//!
//! This crate owns the parts of agent-to-agent communication that have
//! nothing to do with any one transport or runtime: correlation tracking
//! across logical operations, retry/circuit-breaker resilience, rate-limited
//! and breaker-guarded messaging, a peer channel abstraction with liveness
//! and acknowledgement tracking, a per-agent peer node, a mesh router that
//! falls back across direct/bus/local transports, and a webhook-triggered
//! event dispatcher. Persistence, process execution, and the wire transport
//! itself are narrow collaborator traits the embedding application supplies;
//! every trait ships an in-memory reference implementation so the rest of
//! the crate is testable standalone.

pub mod config;
pub mod correlation;
pub mod domain_types;
pub mod error;
pub mod event_dispatcher;
pub mod interfaces;
pub mod mesh_router;
pub mod messaging_guard;
pub mod metrics;
pub mod peer_channel;
pub mod peer_node;
pub mod resilience;
pub mod server;

pub use config::AppConfig;
pub use correlation::{Context as CorrelationContext, Source as CorrelationSource};
pub use error::{RelaymeshError, Result};
pub use event_dispatcher::{DispatchError, EventDispatcher, EventKind};
pub use mesh_router::{MeshRouter, Route, RoutePreference, RouterConfig};
pub use messaging_guard::{GuardConfig, MessagingGuard};
pub use metrics::MetricsRegistry;
pub use peer_channel::{PeerChannel, PeerChannelConfig};
pub use peer_node::PeerNode;
pub use resilience::{CircuitBreaker, RetryOptions};
