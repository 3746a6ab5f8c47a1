//! Relaymesh - resilience-first messaging core for a mesh of software agents.
//!
//! This is the bundled demo binary: it wires the crate's in-memory reference
//! collaborators together and serves the HTTP surface. A real deployment
//! swaps [`relaymesh::interfaces::Store`], [`relaymesh::interfaces::ProcessManager`],
//! and friends for implementations backed by its own database and agent
//! runtime.

use std::sync::Arc;

use anyhow::Result;
use relaymesh::interfaces::{InMemoryBus, InMemoryDirectory, InMemoryProcessManager, InMemoryStore};
use relaymesh::server::{self, AppState};
use relaymesh::{AppConfig, EventDispatcher, MetricsRegistry, PeerNode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("relaymesh=info".parse()?))
        .init();

    info!("starting relaymesh");

    let config = AppConfig::from_env()?;

    let store = InMemoryStore::shared();
    let process_manager = InMemoryProcessManager::shared();
    let bus = Arc::new(InMemoryBus::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let metrics = Arc::new(MetricsRegistry::new());

    let (channel_events_tx, mut channel_events_rx) = mpsc::unbounded_channel();
    let local_id = relaymesh::domain_types::AgentId::generate();
    let peer_node = PeerNode::new(
        local_id,
        Arc::clone(&bus) as Arc<dyn relaymesh::interfaces::Bus>,
        Arc::clone(&directory) as Arc<dyn relaymesh::interfaces::Directory>,
        config.peer_channel,
        channel_events_tx,
        Arc::clone(&metrics),
    );
    let drain_metrics = Arc::clone(&metrics);
    tokio::spawn(async move {
        while let Some((_peer, event)) = channel_events_rx.recv().await {
            if matches!(event, relaymesh::peer_channel::ChannelEvent::Message(_)) {
                drain_metrics.record_agent_message("inbound", "received");
            }
        }
    });
    peer_node.spawn_heartbeat();

    let dispatcher = Arc::new(EventDispatcher::new(
        store,
        Arc::clone(&process_manager) as Arc<dyn relaymesh::interfaces::ProcessManager>,
        None,
        Arc::clone(&bus) as Arc<dyn relaymesh::interfaces::Bus>,
        Arc::clone(&metrics),
    ));

    let state = AppState {
        dispatcher,
        metrics,
        webhook_secret: config.webhook_secret,
    };

    let (listener, addr) = server::start_server(config.port).await?;
    info!(%addr, "HTTP surface listening");

    let shutdown_token = CancellationToken::new();
    let ctrl_c_token = shutdown_token.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        ctrl_c_token.cancel();
    });

    server::serve_with_graceful_shutdown(listener, server::create_router(state), shutdown_token).await?;

    info!("relaymesh shutting down gracefully");
    Ok(())
}
