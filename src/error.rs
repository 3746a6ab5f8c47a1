//! Crate-wide error type.
//!
//! Individual components (guard, channel, router, dispatcher) define their own
//! `thiserror` enums; this type aggregates them at the boundary where a caller
//! only cares "did it work", not which component failed.

use thiserror::Error;

use crate::event_dispatcher::DispatchError;
use crate::mesh_router::RouteError;
use crate::messaging_guard::GuardError;
use crate::peer_channel::ChannelError;

/// Top-level error for anything the core can fail to do.
#[derive(Debug, Error)]
pub enum RelaymeshError {
    /// A messaging-guard admission or outcome-recording failure.
    #[error("messaging guard: {0}")]
    Guard(#[from] GuardError),

    /// A peer-channel failure.
    #[error("peer channel: {0}")]
    Channel(#[from] ChannelError),

    /// A mesh-router failure.
    #[error("mesh router: {0}")]
    Route(#[from] RouteError),

    /// An event-dispatcher failure.
    #[error("event dispatcher: {0}")]
    Dispatch(#[from] DispatchError),

    /// A collaborator (store, process manager, bus, directory) failed.
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Configuration failed to validate.
    #[error("configuration error: {0}")]
    Config(String),

    /// Wraps any I/O failure surfaced while serving HTTP or reading config files.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wraps JSON (de)serialization failures.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used across the crate's public API.
pub type Result<T, E = RelaymeshError> = std::result::Result<T, E>;
