//! Drives agent execution. The core starts sessions and observes their
//! events; it never runs an agent's reasoning loop itself.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::interfaces::store::Session;

/// Failure surfaced by a [`ProcessManager`] implementation.
#[derive(Debug, Clone, Error)]
pub enum ProcessManagerError {
    /// No process is running for the given session.
    #[error("no running process for session {0}")]
    NotRunning(Uuid),
}

/// One event emitted by a running agent process.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// A chunk (or the whole) of the assistant's reply.
    Assistant {
        /// The session this event belongs to.
        session_id: Uuid,
        /// The text content of this fragment.
        content: String,
        /// Whether this is the final fragment of the reply.
        done: bool,
    },
    /// The agent invoked a tool.
    ToolUse {
        /// The session this event belongs to.
        session_id: Uuid,
        /// The tool's name.
        tool_name: String,
    },
    /// The underlying process exited; the session is now complete.
    SessionExited {
        /// The session this event belongs to.
        session_id: Uuid,
    },
}

/// A live handle to a process-event subscription; dropping it unsubscribes.
pub struct ProcessSubscription {
    receiver: mpsc::UnboundedReceiver<ProcessEvent>,
}

impl ProcessSubscription {
    /// Awaits the next event on this subscription.
    pub async fn recv(&mut self) -> Option<ProcessEvent> {
        self.receiver.recv().await
    }
}

/// Starts and observes agent processes on behalf of the core.
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Starts a process for `session` with the given initial `prompt`.
    async fn start_process(&self, session: &Session, prompt: &str) -> Result<(), ProcessManagerError>;

    /// Subscribes to events for `session_id`.
    fn subscribe(&self, session_id: Uuid) -> ProcessSubscription;

    /// Whether a process is currently running for `session_id`.
    fn is_running(&self, session_id: Uuid) -> bool;

    /// Lists every session id with a currently running process.
    fn active_session_ids(&self) -> Vec<Uuid>;

    /// Stops the process for `session_id`, if running.
    async fn stop_process(&self, session_id: Uuid) -> Result<(), ProcessManagerError>;
}

/// A reference [`ProcessManager`] that immediately completes every session
/// with a canned reply, for tests and the bundled demo binary.
///
/// Callers must [`ProcessManager::subscribe`] before [`ProcessManager::start_process`]
/// to observe that session's events; this mirrors a real process manager
/// where the event stream begins the moment the process is spawned.
#[derive(Default)]
pub struct InMemoryProcessManager {
    senders: DashMap<Uuid, mpsc::UnboundedSender<ProcessEvent>>,
    running: DashMap<Uuid, ()>,
}

impl InMemoryProcessManager {
    /// Builds an empty process manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a fresh process manager for sharing across collaborators.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl ProcessManager for InMemoryProcessManager {
    async fn start_process(&self, session: &Session, prompt: &str) -> Result<(), ProcessManagerError> {
        self.running.insert(session.id, ());
        let session_id = session.id;

        if let Some(tx) = self.senders.get(&session_id) {
            let reply = format!("acknowledged: {prompt}");
            let _ = tx.send(ProcessEvent::Assistant {
                session_id,
                content: reply,
                done: true,
            });
            let _ = tx.send(ProcessEvent::SessionExited { session_id });
        }
        self.running.remove(&session_id);
        Ok(())
    }

    fn subscribe(&self, session_id: Uuid) -> ProcessSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(session_id, tx);
        ProcessSubscription { receiver: rx }
    }

    fn is_running(&self, session_id: Uuid) -> bool {
        self.running.contains_key(&session_id)
    }

    fn active_session_ids(&self) -> Vec<Uuid> {
        self.running.iter().map(|e| *e.key()).collect()
    }

    async fn stop_process(&self, session_id: Uuid) -> Result<(), ProcessManagerError> {
        self.senders.remove(&session_id);
        self.running
            .remove(&session_id)
            .map(|_| ())
            .ok_or(ProcessManagerError::NotRunning(session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::AgentId;

    #[tokio::test]
    async fn subscribe_then_start_delivers_reply_and_exit() {
        let pm = InMemoryProcessManager::new();
        let session = Session {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            agent_id: AgentId::generate(),
            name: "test".to_string(),
            initial_prompt: "hi".to_string(),
            source: "webhook".to_string(),
        };

        let mut sub = pm.subscribe(session.id);
        pm.start_process(&session, "hi").await.unwrap();

        let first = sub.recv().await.unwrap();
        assert!(matches!(first, ProcessEvent::Assistant { done: true, .. }));
        let second = sub.recv().await.unwrap();
        assert!(matches!(second, ProcessEvent::SessionExited { .. }));
    }
}
