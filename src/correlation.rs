//! Correlation context: a trace id threaded through every logical operation.
//!
//! Mirrors the host platform's discipline of carrying `trace_id` as a
//! structured field on every span, but makes the propagation mechanism
//! explicit: an ambient value held in task-local storage, shadowed and
//! restored across nested [`run_with`] invocations so concurrent tasks never
//! observe each other's trace.

use rand::RngCore;
use std::fmt;

use crate::domain_types::TraceId;

tokio::task_local! {
    static CURRENT: Context;
}

/// Where a logical operation originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// The management web UI.
    Web,
    /// An external chat network.
    Chat,
    /// Another agent, relayed through the mesh.
    Agent,
    /// A cron-style scheduler.
    Scheduler,
    /// An inbound webhook delivery.
    Webhook,
    /// A declarative workflow runner.
    Workflow,
    /// A council/ensemble coordinator.
    Council,
    /// A polling loop checking an external resource.
    Polling,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Web => "web",
            Self::Chat => "chat",
            Self::Agent => "agent",
            Self::Scheduler => "scheduler",
            Self::Webhook => "webhook",
            Self::Workflow => "workflow",
            Self::Council => "council",
            Self::Polling => "polling",
        };
        f.write_str(s)
    }
}

/// The correlation identity of one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Context {
    /// The trace identifier, stable for the life of the operation.
    pub trace_id: TraceId,
    /// The trace that was active immediately before this one, if any.
    pub parent_id: Option<TraceId>,
    /// Milliseconds since the Unix epoch when this context was created.
    pub timestamp: i64,
    /// What kind of entry point created this context.
    pub source: Source,
}

/// Generates a fresh 128-bit, CSPRNG-backed trace id rendered as 32 lowercase
/// hex characters.
#[must_use]
pub fn new_trace_id() -> TraceId {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    let hex = hex::encode(bytes);
    TraceId::try_new(hex).expect("32-byte hex render always satisfies TraceId's validation")
}

/// Returns the ambient trace context, if one is active.
pub fn current() -> Option<Context> {
    CURRENT.try_with(Clone::clone).ok()
}

/// Returns the ambient trace id, if one is active.
#[must_use]
pub fn current_trace_id() -> Option<TraceId> {
    current().map(|ctx| ctx.trace_id)
}

/// Runs `fut` with `ctx` as the ambient correlation context.
///
/// Nested calls shadow the parent context for the duration of `fut` and the
/// previous context (if any) is restored once `fut` completes — `CURRENT`
/// is scoped to the task future itself, so sibling tasks never observe it.
pub async fn run_with<F, T>(ctx: Context, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CURRENT.scope(ctx, fut).await
}

/// Builds a [`Context`] for a new external event, reusing an existing id
/// when one is supplied, then the ambient id when one is active, and
/// otherwise minting a fresh trace id.
#[must_use]
pub fn create_event_context(source: Source, existing_id: Option<TraceId>) -> Context {
    let ambient = current();
    let trace_id = existing_id
        .or_else(|| ambient.as_ref().map(|c| c.trace_id.clone()))
        .unwrap_or_else(new_trace_id);
    let parent_id = ambient
        .map(|c| c.trace_id)
        .filter(|ambient_id| *ambient_id != trace_id);

    Context {
        trace_id,
        parent_id,
        timestamp: now_millis(),
        source,
    }
}

fn now_millis() -> i64 {
    i64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_is_32_lowercase_hex() {
        let id = new_trace_id();
        let s = id.as_ref();
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[tokio::test]
    async fn run_with_exposes_context_inside_and_clears_outside() {
        assert!(current().is_none());

        let ctx = create_event_context(Source::Webhook, None);
        let trace_id = ctx.trace_id.clone();

        run_with(ctx, async {
            assert_eq!(current_trace_id(), Some(trace_id));
        })
        .await;

        assert!(current().is_none());
    }

    #[tokio::test]
    async fn nested_run_with_shadows_and_restores() {
        let outer = create_event_context(Source::Scheduler, None);
        let outer_id = outer.trace_id.clone();

        run_with(outer, async {
            let inner = create_event_context(Source::Agent, None);
            let inner_id = inner.trace_id.clone();
            assert_eq!(inner.parent_id.as_ref(), Some(&outer_id));

            run_with(inner, async {
                assert_eq!(current_trace_id(), Some(inner_id));
            })
            .await;

            assert_eq!(current_trace_id(), Some(outer_id.clone()));
        })
        .await;
    }

    #[tokio::test]
    async fn concurrent_tasks_do_not_leak_context() {
        let ctx_a = create_event_context(Source::Web, None);
        let ctx_b = create_event_context(Source::Chat, None);
        let id_a = ctx_a.trace_id.clone();
        let id_b = ctx_b.trace_id.clone();

        let task_a = tokio::spawn(run_with(ctx_a, async move {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            current_trace_id()
        }));
        let task_b = tokio::spawn(run_with(ctx_b, async move { current_trace_id() }));

        assert_eq!(task_a.await.unwrap(), Some(id_a));
        assert_eq!(task_b.await.unwrap(), Some(id_b));
    }
}
