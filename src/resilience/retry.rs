//! Generic retry-with-backoff for any fallible async operation.

use rand::Rng;
use std::time::Duration;

/// Jitter strategy applied to the computed backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// No jitter; the delay is exactly the computed backoff.
    Off,
    /// Uniform jitter of up to ±10% of the computed backoff.
    Uniform,
}

/// Configuration for [`retry`].
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Maximum number of attempts, including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Ceiling applied to the computed delay before jitter.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Jitter applied on top of the capped exponential delay.
    pub jitter: Jitter,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: Jitter::Uniform,
        }
    }
}

impl RetryOptions {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let base_ms = self.base_delay.as_millis() as f64 * factor;
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let jittered_ms = match self.jitter {
            Jitter::Off => capped_ms,
            Jitter::Uniform => {
                let spread = capped_ms * 0.10;
                let offset = rand::rng().random_range(-spread..=spread);
                (capped_ms + offset).max(0.0)
            }
        };

        Duration::from_millis(jittered_ms.round() as u64)
    }
}

/// Retries an async operation according to `opts`, consulting `should_retry`
/// after every failure (including the last) to decide whether to surface the
/// error immediately instead of continuing to back off.
///
/// Never sleeps after the final attempt. Returns the last error if every
/// attempt is exhausted and `should_retry` keeps returning `true`.
pub async fn retry<F, Fut, T, E>(mut operation: F, opts: &RetryOptions, should_retry: impl Fn(&E) -> bool) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let attempts = opts.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = should_retry(&err);
                let is_last = attempt + 1 == attempts;
                last_err = Some(err);

                if !retryable || is_last {
                    break;
                }

                tokio::time::sleep(opts.delay_for_attempt(attempt)).await;
            }
        }
    }

    Err(last_err.expect("loop runs at least once since max_attempts is clamped to >= 1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn stops_immediately_when_should_retry_is_false() {
        let calls = AtomicU32::new(0);
        let opts = RetryOptions {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            ..Default::default()
        };

        let result: Result<(), &str> = retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("boom")
            },
            &opts,
            |_| false,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_max_attempts_on_persistent_failure() {
        let calls = AtomicU32::new(0);
        let opts = RetryOptions {
            max_attempts: 4,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..Default::default()
        };

        let result: Result<(), &str> = retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("boom")
            },
            &opts,
            |_| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let opts = RetryOptions::default();

        let result = retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err("boom") } else { Ok(42) }
            },
            &opts,
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
