//! Webhook ingress: event mapping, mention detection, and agent triggering.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::correlation::{self, Source};
use crate::domain_types::RepoSlug;
use crate::interfaces::{
    Bus, DeliveryStatus, ProcessManager, Registration, Store, StoreError, WorkTaskRequest, WorkTaskService,
};
use crate::metrics::MetricsRegistry;

use super::mention::{contains_mention, is_work_mode};
use super::prompt::{render_session_prompt, work_task_description, PromptContext};

const MIN_TRIGGER_INTERVAL: Duration = Duration::from_secs(60);

/// The GitHub event kinds this dispatcher recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A comment on an issue (not a pull request).
    IssueComment,
    /// A comment on an issue that is actually a pull request.
    IssueCommentPr,
    /// An issue was opened, edited, etc.
    Issues,
    /// A review comment on a pull request diff.
    PullRequestReviewComment,
}

/// Failure returned by [`EventDispatcher::dispatch`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The payload did not contain a usable repository slug.
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
    /// A store call failed outright (distinct from a per-delivery failure,
    /// which is recorded on the delivery instead of raised).
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Per-registration outcome, surfaced for logging and the HTTP response body.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The registration does not subscribe to this event kind.
    SkippedEventKind,
    /// No mention body could be extracted from the payload.
    SkippedNoMentionBody,
    /// The mention handle does not appear in the body.
    SkippedNoMention,
    /// The comment/issue author is the mentioned user.
    SkippedSelfMention,
    /// The registration triggered too recently.
    SkippedRateLimited,
    /// A work task was created.
    CompletedWorkTask(Uuid),
    /// A session was started.
    CompletedSession(Uuid),
    /// The registration's agent could not be found.
    FailedAgentNotFound,
    /// A store call failed while recording the delivery itself.
    FailedStore,
}

impl Outcome {
    fn detail(&self) -> String {
        match self {
            Self::SkippedEventKind => "skipped: event kind not subscribed".to_string(),
            Self::SkippedNoMentionBody => "skipped: no mention body".to_string(),
            Self::SkippedNoMention => "skipped: no mention found".to_string(),
            Self::SkippedSelfMention => "skipped: self-mention".to_string(),
            Self::SkippedRateLimited => "skipped: rate limited".to_string(),
            Self::CompletedWorkTask(id) => format!("completed: work task {id}"),
            Self::CompletedSession(id) => format!("completed: session {id}"),
            Self::FailedAgentNotFound => "failed: agent not found".to_string(),
            Self::FailedStore => "failed: store error".to_string(),
        }
    }

    fn is_skip(&self) -> bool {
        matches!(
            self,
            Self::SkippedEventKind
                | Self::SkippedNoMentionBody
                | Self::SkippedNoMention
                | Self::SkippedSelfMention
                | Self::SkippedRateLimited
        )
    }
}

/// The result of processing one webhook delivery against every matching
/// registration for its repository.
#[derive(Debug, Clone)]
pub struct DispatchSummary {
    /// Number of registrations that completed (successfully or with a
    /// recorded failure status other than a skip).
    pub processed: usize,
    /// Number of registrations skipped before any delivery was attempted.
    pub skipped: usize,
    /// Human-readable detail per registration, in evaluation order.
    pub details: Vec<String>,
}

fn map_event_kind(event_name: &str, body: &serde_json::Value) -> Option<EventKind> {
    match event_name {
        "issue_comment" => {
            if body.pointer("/issue/pull_request").is_some() {
                Some(EventKind::IssueCommentPr)
            } else {
                Some(EventKind::IssueComment)
            }
        }
        "issues" => Some(EventKind::Issues),
        "pull_request_review_comment" => Some(EventKind::PullRequestReviewComment),
        _ => None,
    }
}

struct ExtractedContent<'a> {
    body: &'a str,
    author: &'a str,
    number: u64,
    title: &'a str,
    html_url: &'a str,
    labels: Vec<String>,
}

fn extract_content<'a>(kind: EventKind, payload: &'a serde_json::Value) -> Option<ExtractedContent<'a>> {
    match kind {
        EventKind::IssueComment | EventKind::IssueCommentPr | EventKind::PullRequestReviewComment => {
            let body = payload.pointer("/comment/body")?.as_str()?;
            let author = payload.pointer("/comment/user/login").and_then(|v| v.as_str()).unwrap_or("");
            let number = payload
                .pointer("/issue/number")
                .or_else(|| payload.pointer("/pull_request/number"))
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0);
            let title = payload
                .pointer("/issue/title")
                .or_else(|| payload.pointer("/pull_request/title"))
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let html_url = payload.pointer("/comment/html_url").and_then(|v| v.as_str()).unwrap_or("");
            Some(ExtractedContent { body, author, number, title, html_url, labels: Vec::new() })
        }
        EventKind::Issues => {
            let body = payload.pointer("/issue/body")?.as_str()?;
            let author = payload.pointer("/issue/user/login").and_then(|v| v.as_str()).unwrap_or("");
            let number = payload.pointer("/issue/number").and_then(serde_json::Value::as_u64).unwrap_or(0);
            let title = payload.pointer("/issue/title").and_then(|v| v.as_str()).unwrap_or("");
            let html_url = payload.pointer("/issue/html_url").and_then(|v| v.as_str()).unwrap_or("");
            let labels = payload
                .pointer("/issue/labels")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|l| l.get("name").and_then(|n| n.as_str()).map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            Some(ExtractedContent { body, author, number, title, html_url, labels })
        }
    }
}

/// Per-registration last-trigger bookkeeping, kept outside the [`Store`]
/// contract since `§4.7`'s one-minute rate limit is dispatcher-local
/// behavior rather than persisted registration state.
#[derive(Default)]
struct TriggerClock {
    last_triggered: DashMap<Uuid, Instant>,
}

impl TriggerClock {
    fn check_and_record(&self, registration_id: Uuid) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_triggered.get(&registration_id) {
            if now.duration_since(*last) < MIN_TRIGGER_INTERVAL {
                return false;
            }
        }
        self.last_triggered.insert(registration_id, now);
        true
    }
}

/// Topic a `webhook_delivery` event is published to once a delivery is recorded.
pub const WEBHOOK_DELIVERY_TOPIC: &str = "webhook_delivery";

/// Consumes webhook deliveries and triggers the matching agents.
pub struct EventDispatcher {
    store: Arc<dyn Store>,
    process_manager: Arc<dyn ProcessManager>,
    work_task_service: Option<Arc<dyn WorkTaskService>>,
    bus: Arc<dyn Bus>,
    metrics: Arc<MetricsRegistry>,
    trigger_clock: TriggerClock,
}

impl EventDispatcher {
    /// Builds a dispatcher. `work_task_service` may be omitted, in which
    /// case every would-be `work_task` dispatch falls back to the session
    /// path instead.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        process_manager: Arc<dyn ProcessManager>,
        work_task_service: Option<Arc<dyn WorkTaskService>>,
        bus: Arc<dyn Bus>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store,
            process_manager,
            work_task_service,
            bus,
            metrics,
            trigger_clock: TriggerClock::default(),
        }
    }

    /// Processes one already signature-verified webhook delivery.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] only for failures that prevent evaluating
    /// any registration at all (malformed payload, a store call failing
    /// outright); per-registration failures are recorded on that
    /// registration's delivery instead of raised here.
    pub async fn dispatch(&self, event_name: &str, payload: &serde_json::Value) -> Result<DispatchSummary, DispatchError> {
        let ctx = correlation::create_event_context(Source::Webhook, None);

        correlation::run_with(ctx, async {
            let Some(kind) = map_event_kind(event_name, payload) else {
                return Ok(DispatchSummary { processed: 0, skipped: 0, details: vec!["dropped: unrecognized event".to_string()] });
            };

            let repo_name = payload
                .pointer("/repository/full_name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| DispatchError::MalformedPayload("missing repository.full_name".to_string()))?;
            let repo = RepoSlug::try_new(repo_name.to_string())
                .map_err(|e| DispatchError::MalformedPayload(e.to_string()))?;

            let query_start = Instant::now();
            let registrations = self.store.find_registrations_for_repo(&repo).await?;
            self.metrics
                .record_db_query("find_registrations_for_repo", query_start.elapsed().as_secs_f64());
            let mut summary = DispatchSummary { processed: 0, skipped: 0, details: Vec::new() };

            for registration in registrations {
                let outcome = self.dispatch_one(kind, &registration, payload).await;
                if outcome.is_skip() {
                    summary.skipped += 1;
                } else {
                    summary.processed += 1;
                }
                summary.details.push(outcome.detail());
            }

            Ok(summary)
        })
        .await
    }

    async fn dispatch_one(&self, kind: EventKind, registration: &Registration, payload: &serde_json::Value) -> Outcome {
        if !registration.events.contains(&kind) {
            return Outcome::SkippedEventKind;
        }

        let Some(extracted) = extract_content(kind, payload) else {
            return Outcome::SkippedNoMentionBody;
        };

        if !contains_mention(extracted.body, &registration.mention_user) {
            return Outcome::SkippedNoMention;
        }

        if extracted.author.eq_ignore_ascii_case(registration.mention_user.as_ref()) {
            return Outcome::SkippedSelfMention;
        }

        if !self.trigger_clock.check_and_record(registration.id) {
            return Outcome::SkippedRateLimited;
        }

        let query_start = Instant::now();
        let delivery = self.store.create_delivery(registration.id, kind).await;
        self.metrics.record_db_query("create_delivery", query_start.elapsed().as_secs_f64());
        let Ok(delivery) = delivery else {
            return Outcome::FailedStore;
        };

        let _ = self
            .bus
            .publish(
                WEBHOOK_DELIVERY_TOPIC,
                serde_json::to_vec(&serde_json::json!({
                    "delivery_id": delivery.id,
                    "registration_id": registration.id,
                    "event": kind,
                }))
                .unwrap_or_default(),
            )
            .await;

        let outcome = self.trigger(registration, &extracted, payload).await;

        let _ = self
            .store
            .update_delivery_status(
                delivery.id,
                match &outcome {
                    Outcome::CompletedWorkTask(_) | Outcome::CompletedSession(_) => DeliveryStatus::Completed,
                    _ => DeliveryStatus::Failed,
                },
                Some(outcome.detail()),
                None,
                None,
            )
            .await;

        if matches!(outcome, Outcome::CompletedWorkTask(_) | Outcome::CompletedSession(_)) {
            let now = i64::try_from(
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis(),
            )
            .unwrap_or(i64::MAX);
            let _ = self.store.increment_trigger_count(registration.id, now).await;
        }

        outcome
    }

    async fn trigger(&self, registration: &Registration, extracted: &ExtractedContent<'_>, payload: &serde_json::Value) -> Outcome {
        let Ok(agent) = self.store.get_agent(registration.agent_id).await else {
            return Outcome::FailedAgentNotFound;
        };

        let repo = payload.pointer("/repository/full_name").and_then(|v| v.as_str()).unwrap_or("");
        let ctx = PromptContext {
            repo,
            number: extracted.number,
            title: extracted.title,
            author: extracted.author,
            html_url: extracted.html_url,
            body: extracted.body,
            labels: &extracted.labels,
        };

        if is_work_mode(extracted.body) {
            if let Some(service) = &self.work_task_service {
                let task = service
                    .create(WorkTaskRequest {
                        agent_id: agent.id,
                        description: work_task_description(extracted.body),
                        project_id: registration.project_id,
                        source: "webhook".to_string(),
                        source_id: registration.id,
                    })
                    .await;
                return Outcome::CompletedWorkTask(task.id);
            }
            // No work-task collaborator configured: fall through to a
            // conversational session instead of failing the delivery.
        }

        let prompt = render_session_prompt(&ctx);
        let query_start = Instant::now();
        let session = self
            .store
            .create_session(
                registration.project_id,
                agent.id,
                agent.name.to_string(),
                prompt.clone(),
                "webhook".to_string(),
            )
            .await;
        self.metrics.record_db_query("create_session", query_start.elapsed().as_secs_f64());
        let Ok(session) = session else {
            return Outcome::FailedStore;
        };

        let session_start = Instant::now();
        let _ = self.process_manager.start_process(&session, &prompt).await;
        self.metrics.record_session_duration(session_start.elapsed().as_secs_f64());
        self.metrics
            .set_active_sessions(self.process_manager.active_session_ids().len() as i64);
        // chars/4 approximates tokens charged for the prompt that started this session.
        self.metrics.record_credits_consumed((prompt.len() / 4) as u64);

        Outcome::CompletedSession(session.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{AgentName, MentionUser, RepoSlug};
    use crate::interfaces::{InMemoryBus, InMemoryProcessManager, InMemoryStore, InMemoryWorkTaskService};

    fn dispatcher(
        store: Arc<InMemoryStore>,
        process_manager: Arc<InMemoryProcessManager>,
        work_task_service: Option<Arc<dyn WorkTaskService>>,
    ) -> EventDispatcher {
        EventDispatcher::new(store, process_manager, work_task_service, Arc::new(InMemoryBus::new()), Arc::new(MetricsRegistry::new()))
    }

    fn payload(repo: &str, author: &str, body: &str, number: u64) -> serde_json::Value {
        serde_json::json!({
            "repository": {"full_name": repo},
            "issue": {"number": number, "title": "Widget is broken", "html_url": "https://example.com/1"},
            "comment": {"body": body, "user": {"login": author}, "html_url": "https://example.com/1#c1"},
        })
    }

    fn setup() -> (Arc<InMemoryStore>, Arc<InMemoryProcessManager>, Uuid) {
        let store = InMemoryStore::shared();
        let process_manager = InMemoryProcessManager::shared();
        let project_id = Uuid::new_v4();
        let agent_id = store.insert_agent(AgentName::try_new("bot".to_string()).unwrap(), project_id);
        let registration_id = store.insert_registration(
            agent_id,
            RepoSlug::try_new("acme/widgets".to_string()).unwrap(),
            vec![EventKind::IssueComment],
            MentionUser::try_new("bot".to_string()).unwrap(),
            project_id,
        );
        (store, process_manager, registration_id)
    }

    #[tokio::test]
    async fn self_mention_is_ignored() {
        let (store, process_manager, _registration_id) = setup();
        let dispatcher = dispatcher(store, process_manager, None);

        let summary = dispatcher
            .dispatch("issue_comment", &payload("acme/widgets", "bot", "@bot please fix this", 1))
            .await
            .unwrap();

        assert_eq!(summary.processed, 0);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn work_task_intent_creates_work_task() {
        let (store, process_manager, _registration_id) = setup();
        let work_task_service = Arc::new(InMemoryWorkTaskService::new());
        let dispatcher = dispatcher(store, process_manager, Some(work_task_service.clone() as Arc<dyn WorkTaskService>));

        let summary = dispatcher
            .dispatch("issue_comment", &payload("acme/widgets", "alice", "@bot please fix the login bug", 1))
            .await
            .unwrap();

        assert_eq!(summary.processed, 1);
        assert!(summary.details[0].starts_with("completed: work task"));
    }

    #[tokio::test]
    async fn session_intent_starts_session() {
        let (store, process_manager, _registration_id) = setup();
        let dispatcher = dispatcher(store, process_manager, None);

        let summary = dispatcher
            .dispatch("issue_comment", &payload("acme/widgets", "alice", "@bot what does this do?", 1))
            .await
            .unwrap();

        assert_eq!(summary.processed, 1);
        assert!(summary.details[0].starts_with("completed: session"));
    }

    #[tokio::test]
    async fn second_trigger_within_a_minute_is_rate_limited() {
        let (store, process_manager, _registration_id) = setup();
        let dispatcher = dispatcher(store, process_manager, None);

        let body = payload("acme/widgets", "alice", "@bot what does this do?", 1);
        dispatcher.dispatch("issue_comment", &body).await.unwrap();
        let second = dispatcher.dispatch("issue_comment", &body).await.unwrap();

        assert_eq!(second.processed, 0);
        assert_eq!(second.skipped, 1);
    }

    #[tokio::test]
    async fn unrecognized_event_is_dropped_without_evaluating_registrations() {
        let (store, process_manager, _registration_id) = setup();
        let dispatcher = dispatcher(store, process_manager, None);

        let summary = dispatcher
            .dispatch("star_created", &payload("acme/widgets", "alice", "@bot hi", 1))
            .await
            .unwrap();

        assert_eq!(summary.processed, 0);
        assert_eq!(summary.skipped, 0);
    }

    #[tokio::test]
    async fn completed_delivery_publishes_webhook_delivery_event() {
        let (store, process_manager, registration_id) = setup();
        let bus = Arc::new(InMemoryBus::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        bus.subscribe(WEBHOOK_DELIVERY_TOPIC, tx).await.unwrap();
        let dispatcher = EventDispatcher::new(store, process_manager, None, bus, Arc::new(MetricsRegistry::new()));

        dispatcher
            .dispatch("issue_comment", &payload("acme/widgets", "alice", "@bot what does this do?", 1))
            .await
            .unwrap();

        let published: serde_json::Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(published["registration_id"], registration_id.to_string());
        assert_eq!(published["event"], "issue_comment");
    }
}
