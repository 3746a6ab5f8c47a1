//! A generic three-state circuit breaker.
//!
//! `OPEN -> HALF_OPEN` is evaluated lazily on [`CircuitBreaker::state`]; no
//! background timer is required. Internal counters are guarded by a
//! `std::sync::Mutex` so a single breaker instance can be shared across
//! concurrent callers without external synchronization.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::domain_types::{FailureThreshold, ResetTimeoutMs, SuccessThreshold};

/// Observable state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls are admitted; failures are counted toward the threshold.
    Closed,
    /// Calls are rejected until the reset timeout elapses.
    Open,
    /// A probing window; successes count toward closing, any failure reopens.
    HalfOpen,
}

/// Returned when an execution is rejected because the breaker is open.
#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit open, retry after {retry_after_ms}ms")]
pub struct CircuitOpenError {
    /// Milliseconds the caller should wait before retrying.
    pub retry_after_ms: u64,
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
}

/// A single breaker guarding calls to one target.
pub struct CircuitBreaker {
    failure_threshold: FailureThreshold,
    reset_timeout: Duration,
    success_threshold: SuccessThreshold,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Builds a breaker in the `Closed` state.
    #[must_use]
    pub fn new(
        failure_threshold: FailureThreshold,
        reset_timeout: ResetTimeoutMs,
        success_threshold: SuccessThreshold,
    ) -> Self {
        Self {
            failure_threshold,
            reset_timeout: Duration::from_millis(reset_timeout.into_inner()),
            success_threshold,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
            }),
        }
    }

    /// Returns the current state, applying the lazy `Open -> HalfOpen`
    /// transition if the reset timeout has elapsed.
    pub fn state(&self) -> BreakerState {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.maybe_transition_to_half_open(&mut guard);
        guard.state
    }

    fn maybe_transition_to_half_open(&self, guard: &mut Inner) {
        if guard.state == BreakerState::Open {
            if let Some(last_failure) = guard.last_failure_at {
                if last_failure.elapsed() >= self.reset_timeout {
                    guard.state = BreakerState::HalfOpen;
                    guard.success_count = 0;
                }
            }
        }
    }

    /// Checks whether a call may proceed; does not itself record an outcome.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitOpenError`] if the breaker is (still) open.
    pub fn check(&self) -> Result<(), CircuitOpenError> {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.maybe_transition_to_half_open(&mut guard);

        if guard.state == BreakerState::Open {
            let elapsed = guard
                .last_failure_at
                .map(|t| t.elapsed())
                .unwrap_or_default();
            let remaining = self.reset_timeout.saturating_sub(elapsed);
            return Err(CircuitOpenError {
                retry_after_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
            });
        }

        Ok(())
    }

    /// Records a successful call, possibly closing the breaker.
    pub fn record_success(&self) {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.maybe_transition_to_half_open(&mut guard);

        match guard.state {
            BreakerState::Closed => {
                guard.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                guard.success_count += 1;
                if guard.success_count >= self.success_threshold.into_inner() {
                    guard.state = BreakerState::Closed;
                    guard.failure_count = 0;
                    guard.success_count = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Records a failed call, possibly opening the breaker.
    pub fn record_failure(&self) {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.maybe_transition_to_half_open(&mut guard);

        match guard.state {
            BreakerState::Closed => {
                guard.failure_count += 1;
                guard.last_failure_at = Some(Instant::now());
                if guard.failure_count >= self.failure_threshold.into_inner() {
                    guard.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                guard.state = BreakerState::Open;
                guard.success_count = 0;
                guard.last_failure_at = Some(Instant::now());
            }
            BreakerState::Open => {
                guard.last_failure_at = Some(Instant::now());
            }
        }
    }

    /// Forces the breaker back to `Closed` and clears all counters.
    pub fn reset(&self) {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        guard.state = BreakerState::Closed;
        guard.failure_count = 0;
        guard.success_count = 0;
        guard.last_failure_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(f: u32, reset_ms: u64, s: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            FailureThreshold::try_new(f).unwrap(),
            ResetTimeoutMs::try_new(reset_ms).unwrap(),
            SuccessThreshold::try_new(s).unwrap(),
        )
    }

    #[test]
    fn opens_exactly_at_failure_threshold() {
        let cb = breaker(3, 50, 2);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.check().is_err());
    }

    #[test]
    fn success_resets_failure_count_while_closed() {
        let cb = breaker(3, 50, 2);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_reset_timeout_and_closes_at_success_threshold() {
        let cb = breaker(1, 20, 2);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = breaker(1, 20, 2);
        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn reset_clears_all_state() {
        let cb = breaker(1, 50, 2);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        cb.reset();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.check().is_ok());
    }
}
