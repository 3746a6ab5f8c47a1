//! Persistence seam: agents, webhook registrations, deliveries, and sessions.
//!
//! The core never talks to a database directly; it calls through [`Store`].
//! [`InMemoryStore`] is a `DashMap`-backed reference implementation used by
//! tests and the bundled demo binary, following the same "concurrent map per
//! entity kind" shape the host platform uses for its own registries.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain_types::{AgentId, AgentName, MentionUser, RepoSlug};
use crate::event_dispatcher::EventKind;

/// Failure surfaced by a [`Store`] implementation.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The requested agent does not exist.
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),
    /// The requested delivery does not exist.
    #[error("delivery not found: {0}")]
    DeliveryNotFound(Uuid),
    /// The underlying persistence backend failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Minimal agent record the core needs to resolve a mention to a runnable agent.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    /// The agent's identifier.
    pub id: AgentId,
    /// The agent's display name.
    pub name: AgentName,
    /// The project this agent belongs to.
    pub project_id: Uuid,
}

/// Whether a webhook registration is currently accepting triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    /// Triggers are evaluated normally.
    Active,
    /// Triggers are recorded but never dispatched.
    Paused,
}

/// A stored binding of one agent to webhook events on one repository.
#[derive(Debug, Clone)]
pub struct Registration {
    /// The registration's identifier.
    pub id: Uuid,
    /// The agent to trigger.
    pub agent_id: AgentId,
    /// The repository this registration watches.
    pub repo: RepoSlug,
    /// The event kinds this registration reacts to.
    pub events: Vec<EventKind>,
    /// The handle that must be mentioned to trigger this registration.
    pub mention_user: MentionUser,
    /// The project the triggered session/work-task belongs to.
    pub project_id: Uuid,
    /// Whether the registration currently accepts triggers.
    pub status: RegistrationStatus,
    /// How many times this registration has successfully triggered.
    pub trigger_count: u32,
    /// Milliseconds since the Unix epoch this registration last triggered.
    pub last_triggered_at: Option<i64>,
}

/// Lifecycle of one webhook delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Recorded but not yet evaluated.
    Pending,
    /// Currently being dispatched.
    Processing,
    /// Dispatched successfully.
    Completed,
    /// Dispatch failed or was skipped.
    Failed,
}

/// A recorded attempt to dispatch one external event to one registration.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The delivery's identifier.
    pub id: Uuid,
    /// The registration this delivery is for.
    pub registration_id: Uuid,
    /// The mapped event kind.
    pub event: EventKind,
    /// Current lifecycle status.
    pub status: DeliveryStatus,
    /// Free-form human-readable result, set once terminal.
    pub result: Option<String>,
    /// Session created for this delivery, if any.
    pub session_id: Option<Uuid>,
    /// Work task created for this delivery, if any.
    pub work_task_id: Option<Uuid>,
}

/// A conversation session started on behalf of a triggered registration.
#[derive(Debug, Clone)]
pub struct Session {
    /// The session's identifier.
    pub id: Uuid,
    /// The project this session belongs to.
    pub project_id: Uuid,
    /// The agent driving this session.
    pub agent_id: AgentId,
    /// A short human-readable session name.
    pub name: String,
    /// The prompt the session was started with.
    pub initial_prompt: String,
    /// Where the trigger for this session originated (e.g. `"webhook"`).
    pub source: String,
}

/// The persistence seam for agents, registrations, deliveries, and sessions.
#[async_trait]
pub trait Store: Send + Sync {
    /// Looks up an agent by id.
    async fn get_agent(&self, id: AgentId) -> Result<AgentRecord, StoreError>;

    /// Finds all registrations (active or paused) watching `repo`.
    async fn find_registrations_for_repo(&self, repo: &RepoSlug) -> Result<Vec<Registration>, StoreError>;

    /// Records a new delivery in `Pending` status.
    async fn create_delivery(&self, registration_id: Uuid, event: EventKind) -> Result<Delivery, StoreError>;

    /// Moves a delivery to a new status, recording an optional result and
    /// any session/work-task created for it.
    async fn update_delivery_status(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        result: Option<String>,
        session_id: Option<Uuid>,
        work_task_id: Option<Uuid>,
    ) -> Result<(), StoreError>;

    /// Bumps a registration's trigger counter and last-triggered timestamp.
    async fn increment_trigger_count(&self, registration_id: Uuid, at_millis: i64) -> Result<(), StoreError>;

    /// Creates a new session for a triggered registration.
    async fn create_session(
        &self,
        project_id: Uuid,
        agent_id: AgentId,
        name: String,
        initial_prompt: String,
        source: String,
    ) -> Result<Session, StoreError>;
}

/// A `DashMap`-backed reference [`Store`] with no external dependencies.
#[derive(Default)]
pub struct InMemoryStore {
    agents: DashMap<AgentId, AgentRecord>,
    registrations: DashMap<Uuid, Registration>,
    deliveries: DashMap<Uuid, Delivery>,
    sessions: DashMap<Uuid, Session>,
    session_counter: AtomicU32,
}

impl InMemoryStore {
    /// Builds an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a fresh store for sharing across collaborators.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seeds an agent record, returning its id.
    pub fn insert_agent(&self, name: AgentName, project_id: Uuid) -> AgentId {
        let id = AgentId::generate();
        self.agents.insert(id, AgentRecord { id, name, project_id });
        id
    }

    /// Seeds a webhook registration, returning its id.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_registration(
        &self,
        agent_id: AgentId,
        repo: RepoSlug,
        events: Vec<EventKind>,
        mention_user: MentionUser,
        project_id: Uuid,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.registrations.insert(
            id,
            Registration {
                id,
                agent_id,
                repo,
                events,
                mention_user,
                project_id,
                status: RegistrationStatus::Active,
                trigger_count: 0,
                last_triggered_at: None,
            },
        );
        id
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_agent(&self, id: AgentId) -> Result<AgentRecord, StoreError> {
        self.agents.get(&id).map(|r| r.clone()).ok_or(StoreError::AgentNotFound(id))
    }

    async fn find_registrations_for_repo(&self, repo: &RepoSlug) -> Result<Vec<Registration>, StoreError> {
        Ok(self
            .registrations
            .iter()
            .filter(|r| &r.repo == repo && r.status == RegistrationStatus::Active)
            .map(|r| r.clone())
            .collect())
    }

    async fn create_delivery(&self, registration_id: Uuid, event: EventKind) -> Result<Delivery, StoreError> {
        let delivery = Delivery {
            id: Uuid::new_v4(),
            registration_id,
            event,
            status: DeliveryStatus::Pending,
            result: None,
            session_id: None,
            work_task_id: None,
        };
        self.deliveries.insert(delivery.id, delivery.clone());
        Ok(delivery)
    }

    async fn update_delivery_status(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        result: Option<String>,
        session_id: Option<Uuid>,
        work_task_id: Option<Uuid>,
    ) -> Result<(), StoreError> {
        let mut entry = self.deliveries.get_mut(&id).ok_or(StoreError::DeliveryNotFound(id))?;
        entry.status = status;
        if result.is_some() {
            entry.result = result;
        }
        if session_id.is_some() {
            entry.session_id = session_id;
        }
        if work_task_id.is_some() {
            entry.work_task_id = work_task_id;
        }
        Ok(())
    }

    async fn increment_trigger_count(&self, registration_id: Uuid, at_millis: i64) -> Result<(), StoreError> {
        let mut entry = self
            .registrations
            .get_mut(&registration_id)
            .ok_or(StoreError::Backend(format!("unknown registration {registration_id}")))?;
        entry.trigger_count += 1;
        entry.last_triggered_at = Some(at_millis);
        Ok(())
    }

    async fn create_session(
        &self,
        project_id: Uuid,
        agent_id: AgentId,
        name: String,
        initial_prompt: String,
        source: String,
    ) -> Result<Session, StoreError> {
        let n = self.session_counter.fetch_add(1, Ordering::Relaxed);
        let session = Session {
            id: Uuid::new_v4(),
            project_id,
            agent_id,
            name: format!("{name}-{n}"),
            initial_prompt,
            source,
        };
        self.sessions.insert(session.id, session.clone());
        Ok(session)
    }
}
