//! Messaging guard: per-target circuit breakers plus per-sender rate limits.
//!
//! Admission is always evaluated breaker-first, rate-limit-second, and the
//! breaker/window maps are independent `DashMap`s so unrelated targets and
//! senders never contend with each other, mirroring the host platform's
//! `DashMap`-backed registries.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;

use crate::domain_types::{AgentId, FailureThreshold, RateLimitCount, RateLimitWindowMs, ResetTimeoutMs, SuccessThreshold};
use crate::metrics::MetricsRegistry;
use crate::resilience::{BreakerState, CircuitBreaker};

/// Why an admission check rejected a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// The target's circuit breaker is open.
    CircuitOpen,
    /// The sender has exceeded its rate-limit window.
    RateLimited,
}

impl RejectionReason {
    fn label(self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit_open",
            Self::RateLimited => "rate_limited",
        }
    }
}

/// Failure returned by [`MessagingGuard::check`].
#[derive(Debug, Clone, Error)]
pub enum GuardError {
    /// The target's breaker is open.
    #[error("circuit open for {to}, retry after {retry_after_ms}ms")]
    CircuitOpen {
        /// The rejected target.
        to: AgentId,
        /// Milliseconds the caller should wait.
        retry_after_ms: u64,
    },
    /// The sender has exhausted its rate-limit window.
    #[error("rate limited for sender {from}, retry after {retry_after_ms}ms")]
    RateLimited {
        /// The rejected sender.
        from: AgentId,
        /// Milliseconds the caller should wait.
        retry_after_ms: u64,
    },
}

/// Tunables for a [`MessagingGuard`]. Defaults match the host platform's
/// agent-to-agent messaging defaults.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Consecutive failures before a target's breaker opens.
    pub failure_threshold: FailureThreshold,
    /// Cooldown before an open breaker admits a probe.
    pub reset_timeout: ResetTimeoutMs,
    /// Consecutive successes in half-open before the breaker closes.
    pub success_threshold: SuccessThreshold,
    /// Maximum admissions per sender per window.
    pub rate_limit_per_window: RateLimitCount,
    /// Width of the sliding rate-limit window.
    pub rate_limit_window: RateLimitWindowMs,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            failure_threshold: FailureThreshold::default(),
            reset_timeout: ResetTimeoutMs::default(),
            success_threshold: SuccessThreshold::default(),
            rate_limit_per_window: RateLimitCount::default(),
            rate_limit_window: RateLimitWindowMs::default(),
        }
    }
}

struct SenderWindow {
    timestamps: VecDeque<Instant>,
}

/// Guards outbound agent-to-agent traffic with a breaker per target and a
/// sliding-window rate limiter per sender.
pub struct MessagingGuard {
    config: GuardConfig,
    breakers: DashMap<AgentId, Arc<CircuitBreaker>>,
    windows: DashMap<AgentId, SenderWindow>,
    metrics: Arc<MetricsRegistry>,
}

impl MessagingGuard {
    /// Builds a guard with the given configuration.
    #[must_use]
    pub fn new(config: GuardConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
            windows: DashMap::new(),
            metrics,
        }
    }

    fn breaker_for(&self, target: AgentId) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(target)
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    self.config.failure_threshold,
                    self.config.reset_timeout,
                    self.config.success_threshold,
                ))
            })
            .clone()
    }

    /// Admits or rejects a call from `from` to `to`, evaluating the target's
    /// breaker before the sender's rate-limit window.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::CircuitOpen`] if `to`'s breaker is open, or
    /// [`GuardError::RateLimited`] if `from` has exhausted its window.
    pub fn check(&self, from: AgentId, to: AgentId) -> Result<(), GuardError> {
        let breaker = self.breaker_for(to);
        if let Err(open) = breaker.check() {
            self.metrics.record_rate_limit_rejection(RejectionReason::CircuitOpen.label(), &to.to_string());
            return Err(GuardError::CircuitOpen {
                to,
                retry_after_ms: open.retry_after_ms,
            });
        }

        let window_ms = self.config.rate_limit_window.into_inner();
        let limit = self.config.rate_limit_per_window.into_inner() as usize;
        let now = Instant::now();
        let window = Duration::from_millis(window_ms);

        let mut entry = self.windows.entry(from).or_insert_with(|| SenderWindow {
            timestamps: VecDeque::new(),
        });

        while let Some(&oldest) = entry.timestamps.front() {
            if now.duration_since(oldest) > window {
                entry.timestamps.pop_front();
            } else {
                break;
            }
        }

        if entry.timestamps.len() >= limit {
            let oldest = *entry.timestamps.front().expect("len >= limit >= 1 implies non-empty");
            let elapsed = now.duration_since(oldest);
            let retry_after = window.saturating_sub(elapsed).max(Duration::from_millis(1));
            self.metrics.record_rate_limit_rejection(RejectionReason::RateLimited.label(), &from.to_string());
            return Err(GuardError::RateLimited {
                from,
                retry_after_ms: u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
            });
        }

        entry.timestamps.push_back(now);
        Ok(())
    }

    /// Records a successful call to `to`, potentially closing its breaker.
    pub fn record_success(&self, to: AgentId) {
        let before = self.breaker_for(to).state();
        self.breaker_for(to).record_success();
        self.log_transition(to, before);
    }

    /// Records a failed call to `to`, potentially opening its breaker.
    pub fn record_failure(&self, to: AgentId) {
        let before = self.breaker_for(to).state();
        self.breaker_for(to).record_failure();
        self.log_transition(to, before);
    }

    fn log_transition(&self, to: AgentId, before: BreakerState) {
        let after = self.breaker_for(to).state();
        if before != after {
            self.metrics.record_circuit_transition(before, after, &to.to_string());
            tracing::info!(target_agent = %to, from = ?before, to = ?after, "circuit breaker transition");
        }
    }

    /// Forces `to`'s breaker back to closed, clearing its counters.
    pub fn reset_circuit(&self, to: AgentId) {
        if let Some(breaker) = self.breakers.get(&to) {
            breaker.reset();
        }
    }

    /// Removes sender windows whose newest timestamp has already aged out,
    /// bounding memory use. Must not change the observable result of
    /// [`MessagingGuard::check`] whether or not it has run.
    pub fn sweep_stale_windows(&self) {
        let window = Duration::from_millis(self.config.rate_limit_window.into_inner());
        let now = Instant::now();
        self.windows.retain(|_, w| {
            w.timestamps
                .back()
                .is_some_and(|newest| now.duration_since(*newest) <= window)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(f: u32, reset_ms: u64, s: u32, rate: u32, window_ms: u64) -> MessagingGuard {
        MessagingGuard::new(
            GuardConfig {
                failure_threshold: FailureThreshold::try_new(f).unwrap(),
                reset_timeout: ResetTimeoutMs::try_new(reset_ms).unwrap(),
                success_threshold: SuccessThreshold::try_new(s).unwrap(),
                rate_limit_per_window: RateLimitCount::try_new(rate).unwrap(),
                rate_limit_window: RateLimitWindowMs::try_new(window_ms).unwrap(),
            },
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[test]
    fn breaker_rejection_takes_priority_over_rate_limit() {
        let g = guard(1, 50, 2, 10, 60_000);
        let from = AgentId::generate();
        let to = AgentId::generate();

        g.record_failure(to);
        match g.check(from, to) {
            Err(GuardError::CircuitOpen { .. }) => {}
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }

    #[test]
    fn per_sender_flood_rejects_after_limit_then_recovers() {
        let g = guard(100, 50, 2, 5, 500);
        let from = AgentId::generate();
        let to = AgentId::generate();

        for _ in 0..5 {
            assert!(g.check(from, to).is_ok());
        }
        match g.check(from, to) {
            Err(GuardError::RateLimited { retry_after_ms, .. }) => {
                assert!(retry_after_ms > 0 && retry_after_ms <= 500);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn breaker_opens_then_recovers_end_to_end() {
        let g = guard(3, 50, 2, 100, 60_000);
        let from = AgentId::generate();
        let to = AgentId::generate();

        g.record_failure(to);
        g.record_failure(to);
        g.record_failure(to);
        assert!(matches!(g.check(from, to), Err(GuardError::CircuitOpen { .. })));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(g.check(from, to).is_ok());

        g.record_success(to);
        g.record_success(to);
        assert!(g.check(from, to).is_ok());
    }

    #[test]
    fn reset_circuit_restores_fresh_behavior() {
        let g = guard(1, 50, 2, 100, 60_000);
        let from = AgentId::generate();
        let to = AgentId::generate();

        g.record_failure(to);
        assert!(g.check(from, to).is_err());
        g.reset_circuit(to);
        assert!(g.check(from, to).is_ok());
    }

    #[test]
    fn sweep_does_not_change_observable_admission() {
        let g = guard(100, 50, 2, 2, 30);
        let from = AgentId::generate();
        let to = AgentId::generate();

        assert!(g.check(from, to).is_ok());
        g.sweep_stale_windows();
        assert!(g.check(from, to).is_ok());
        match g.check(from, to) {
            Err(GuardError::RateLimited { .. }) => {}
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }
}
