//! HTTP surface: webhook ingress, metrics exposition, and a health check.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::{MatchedPath, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::event_dispatcher::EventDispatcher;
use crate::metrics::MetricsRegistry;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    /// The webhook dispatch pipeline.
    pub dispatcher: Arc<EventDispatcher>,
    /// Process-wide metrics registry, also rendered at `/metrics`.
    pub metrics: Arc<MetricsRegistry>,
    /// Shared secret inbound webhook signatures are verified against.
    pub webhook_secret: Option<String>,
}

/// Health-check response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"healthy"` for a running process.
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct WebhookQuery {
    #[serde(default)]
    event: Option<String>,
}

async fn webhook_handler(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let event_name = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query.event)
        .unwrap_or_default();

    let signature_header = headers.get("X-Hub-Signature-256").and_then(|v| v.to_str().ok());
    if !crate::event_dispatcher::verify_signature(state.webhook_secret.as_deref(), signature_header, &body) {
        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": "invalid signature"}))).into_response();
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": e.to_string()}))).into_response();
        }
    };

    match state.dispatcher.dispatch(&event_name, &payload).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(serde_json::json!({"processed": summary.processed, "skipped": summary.skipped})),
        )
            .into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": e.to_string()}))).into_response(),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse { status: "healthy".to_string() })
}

/// Times a request and feeds its method/route/status/duration into the
/// shared [`MetricsRegistry`]; `tower_http`'s trace layer only logs these,
/// it doesn't record them.
async fn track_metrics(State(state): State<AppState>, req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    state
        .metrics
        .record_http_request(&method, &route, response.status().as_u16(), start.elapsed().as_secs_f64());

    response
}

/// Creates the Axum router with all routes wired to `state`.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/github", post(webhook_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn_with_state(state.clone(), track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds a `TcpListener` on `port`.
///
/// # Errors
///
/// Returns an error if the server cannot bind to the specified port.
pub async fn start_server(port: u16) -> std::io::Result<(TcpListener, SocketAddr)> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;
    Ok((listener, actual_addr))
}

/// Binds on any available port, for tests.
///
/// # Errors
///
/// Returns an error if the server cannot bind to any available port.
pub async fn start_server_on_available_port() -> std::io::Result<(TcpListener, SocketAddr)> {
    start_server(0).await
}

/// Serves `router` on `listener` until the process is killed.
///
/// # Errors
///
/// Returns an error if the server fails during operation.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    axum::serve(listener, router).await
}

/// Serves `router` on `listener` until `shutdown_token` is cancelled, then
/// drains in-flight requests before returning.
///
/// # Errors
///
/// Returns an error if the server fails during operation.
pub async fn serve_with_graceful_shutdown(
    listener: TcpListener,
    router: Router,
    shutdown_token: tokio_util::sync::CancellationToken,
) -> std::io::Result<()> {
    let shutdown_signal = async move { shutdown_token.cancelled().await };
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{InMemoryBus, InMemoryProcessManager, InMemoryStore};
    use tokio::time::{Duration, timeout};

    fn test_state() -> AppState {
        let store = InMemoryStore::shared();
        let process_manager = InMemoryProcessManager::shared();
        let metrics = Arc::new(MetricsRegistry::new());
        AppState {
            dispatcher: Arc::new(EventDispatcher::new(
                store,
                process_manager,
                None,
                Arc::new(InMemoryBus::new()),
                Arc::clone(&metrics),
            )),
            metrics,
            webhook_secret: None,
        }
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let (listener, addr) = start_server_on_available_port().await.unwrap();
        let router = create_router(test_state());
        let handle = tokio::spawn(async move { serve(listener, router).await });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = reqwest::Client::new();
        let response = timeout(Duration::from_secs(1), client.get(format!("http://{addr}/health")).send())
            .await
            .unwrap()
            .unwrap();
        assert!(response.status().is_success());
        let body: HealthResponse = response.json().await.unwrap();
        assert_eq!(body.status, "healthy");

        handle.abort();
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_text() {
        let (listener, addr) = start_server_on_available_port().await.unwrap();
        let router = create_router(test_state());
        let handle = tokio::spawn(async move { serve(listener, router).await });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = reqwest::Client::new();
        let response = timeout(Duration::from_secs(1), client.get(format!("http://{addr}/metrics")).send())
            .await
            .unwrap()
            .unwrap();
        assert!(response.status().is_success());

        handle.abort();
    }

    #[tokio::test]
    async fn webhook_without_signature_is_rejected() {
        let (listener, addr) = start_server_on_available_port().await.unwrap();
        let mut state = test_state();
        state.webhook_secret = Some("topsecret".to_string());
        let router = create_router(state);
        let handle = tokio::spawn(async move { serve(listener, router).await });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = reqwest::Client::new();
        let response = timeout(
            Duration::from_secs(1),
            client
                .post(format!("http://{addr}/webhooks/github"))
                .header("X-GitHub-Event", "issue_comment")
                .json(&serde_json::json!({"repository": {"full_name": "acme/widgets"}}))
                .send(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        handle.abort();
    }
}
