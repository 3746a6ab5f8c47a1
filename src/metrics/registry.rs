//! In-memory metric storage: the moving parts behind `/metrics`.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;

use crate::resilience::BreakerState;

/// Default bucket boundaries for request-latency style histograms.
pub const DEFAULT_LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Default bucket boundaries for session-duration style histograms.
pub const SESSION_DURATION_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0];

pub(super) struct Histogram {
    pub(super) bucket_bounds: &'static [f64],
    pub(super) bucket_counts: Vec<AtomicU64>,
    pub(super) sum_micros: AtomicU64,
    pub(super) count: AtomicU64,
}

impl Histogram {
    fn new(bucket_bounds: &'static [f64]) -> Self {
        Self {
            bucket_bounds,
            bucket_counts: (0..bucket_bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, value_seconds: f64) {
        for (bound, counter) in self.bucket_bounds.iter().zip(self.bucket_counts.iter()) {
            if value_seconds <= *bound {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_micros
            .fetch_add((value_seconds * 1_000_000.0).round() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

/// A process-wide, label-aware store of counters, gauges, and histograms.
///
/// Exposed as a single instance per process, the way the host platform keeps
/// its few permitted singletons — callers wrap it in an `Arc` and share it.
pub struct MetricsRegistry {
    pub(super) counters: DashMap<(&'static str, Vec<(&'static str, String)>), AtomicU64>,
    pub(super) gauges: DashMap<&'static str, AtomicI64>,
    pub(super) histograms: Mutex<DashMap<(&'static str, Vec<(&'static str, String)>), Histogram>>,
}

impl MetricsRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            gauges: DashMap::new(),
            histograms: Mutex::new(DashMap::new()),
        }
    }

    fn incr_counter(&self, name: &'static str, labels: Vec<(&'static str, String)>) {
        self.counters
            .entry((name, labels))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn observe_histogram(&self, name: &'static str, labels: Vec<(&'static str, String)>, bounds: &'static [f64], value_seconds: f64) {
        let map = self.histograms.lock().expect("histogram registry mutex poisoned");
        map.entry((name, labels))
            .or_insert_with(|| Histogram::new(bounds))
            .observe(value_seconds);
    }

    /// Records one completed HTTP request.
    pub fn record_http_request(&self, method: &str, route: &str, status_code: u16, duration_seconds: f64) {
        let labels = vec![
            ("method", method.to_string()),
            ("route", route.to_string()),
            ("status_code", status_code.to_string()),
        ];
        self.incr_counter("http_requests_total", labels.clone());
        self.observe_histogram("http_request_duration_seconds", labels, DEFAULT_LATENCY_BUCKETS, duration_seconds);
    }

    /// Records one agent session's wall-clock duration.
    pub fn record_session_duration(&self, duration_seconds: f64) {
        self.observe_histogram("session_duration_seconds", Vec::new(), SESSION_DURATION_BUCKETS, duration_seconds);
    }

    /// Records one store query's latency.
    pub fn record_db_query(&self, operation: &str, duration_seconds: f64) {
        self.observe_histogram(
            "db_query_duration_seconds",
            vec![("operation", operation.to_string())],
            DEFAULT_LATENCY_BUCKETS,
            duration_seconds,
        );
    }

    /// Records one agent-to-agent message outcome.
    pub fn record_agent_message(&self, direction: &str, status: &str) {
        self.incr_counter(
            "agent_messages_total",
            vec![("direction", direction.to_string()), ("status", status.to_string())],
        );
    }

    /// Records credits consumed by agent work.
    pub fn record_credits_consumed(&self, amount: u64) {
        self.counters
            .entry(("credits_consumed_total", Vec::new()))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(amount, Ordering::Relaxed);
    }

    /// Sets the current number of active sessions.
    pub fn set_active_sessions(&self, count: i64) {
        self.gauges
            .entry("active_sessions")
            .or_insert_with(|| AtomicI64::new(0))
            .store(count, Ordering::Relaxed);
    }

    /// Records a circuit-breaker state transition.
    pub fn record_circuit_transition(&self, from: BreakerState, to: BreakerState, agent_id: &str) {
        self.incr_counter(
            "circuit_breaker_transitions",
            vec![
                ("from_state", format!("{from:?}").to_lowercase()),
                ("to_state", format!("{to:?}").to_lowercase()),
                ("agent_id", agent_id.to_string()),
            ],
        );
    }

    /// Records a rejected admission (either reason) by the messaging guard.
    pub fn record_rate_limit_rejection(&self, reason: &str, agent_id: &str) {
        self.incr_counter(
            "agent_rate_limit_rejections",
            vec![("reason", reason.to_string()), ("agent_id", agent_id.to_string())],
        );
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_request_increments_counter_and_histogram() {
        let reg = MetricsRegistry::new();
        reg.record_http_request("GET", "/metrics", 200, 0.003);
        reg.record_http_request("GET", "/metrics", 200, 0.2);

        let key = ("http_requests_total", vec![("method", "GET".to_string()), ("route", "/metrics".to_string()), ("status_code", "200".to_string())]);
        assert_eq!(reg.counters.get(&key).unwrap().load(Ordering::Relaxed), 2);
    }

    #[test]
    fn active_sessions_gauge_overwrites() {
        let reg = MetricsRegistry::new();
        reg.set_active_sessions(3);
        reg.set_active_sessions(7);
        assert_eq!(reg.gauges.get("active_sessions").unwrap().load(Ordering::Relaxed), 7);
    }
}
