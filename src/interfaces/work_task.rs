//! Optional work-task creation for code-change intents.
//!
//! Absence of a configured [`WorkTaskService`] disables the work-task
//! dispatch route entirely; the event dispatcher falls through to the
//! session path in that case (see [`crate::event_dispatcher`]).

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain_types::AgentId;

/// A request to create one unit of agent work.
#[derive(Debug, Clone)]
pub struct WorkTaskRequest {
    /// The agent that should perform the work.
    pub agent_id: AgentId,
    /// A human-readable description of the requested change.
    pub description: String,
    /// The project the work belongs to.
    pub project_id: Uuid,
    /// Where the request originated (e.g. `"webhook"`).
    pub source: String,
    /// An identifier for the originating item (e.g. the delivery id).
    pub source_id: Uuid,
}

/// A created work task.
#[derive(Debug, Clone)]
pub struct WorkTask {
    /// The task's identifier.
    pub id: Uuid,
    /// The session spawned to perform the work, if one was started immediately.
    pub session_id: Option<Uuid>,
}

/// Creates work tasks for code-change intents detected by the event dispatcher.
#[async_trait]
pub trait WorkTaskService: Send + Sync {
    /// Creates a new work task from `request`.
    async fn create(&self, request: WorkTaskRequest) -> WorkTask;
}

/// A reference [`WorkTaskService`] that records requests without doing any
/// actual work, for tests and demos.
#[derive(Default)]
pub struct InMemoryWorkTaskService {
    created: DashMap<Uuid, WorkTaskRequest>,
}

impl InMemoryWorkTaskService {
    /// Builds an empty work-task service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the request recorded for `task_id`, if any.
    #[must_use]
    pub fn get(&self, task_id: Uuid) -> Option<WorkTaskRequest> {
        self.created.get(&task_id).map(|r| r.clone())
    }
}

#[async_trait]
impl WorkTaskService for InMemoryWorkTaskService {
    async fn create(&self, request: WorkTaskRequest) -> WorkTask {
        let id = Uuid::new_v4();
        self.created.insert(id, request);
        WorkTask { id, session_id: None }
    }
}
