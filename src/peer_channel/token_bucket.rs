//! A continuous-refill token bucket guarding a peer channel's send path.

use std::sync::Mutex;
use std::time::Instant;

use crate::domain_types::{MaxTokens, RefillRate};

struct Inner {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket that refills continuously rather than in discrete steps.
pub struct TokenBucket {
    capacity: f64,
    refill_rate_per_sec: f64,
    inner: Mutex<Inner>,
}

impl TokenBucket {
    /// Builds a full bucket with the given capacity and refill rate.
    #[must_use]
    pub fn new(max_tokens: MaxTokens, refill_rate: RefillRate) -> Self {
        let capacity = f64::from(max_tokens.into_inner());
        Self {
            capacity,
            refill_rate_per_sec: refill_rate.into_inner(),
            inner: Mutex::new(Inner {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, guard: &mut Inner) {
        let elapsed = guard.last_refill.elapsed().as_secs_f64();
        guard.tokens = (guard.tokens + elapsed * self.refill_rate_per_sec).min(self.capacity);
        guard.last_refill = Instant::now();
    }

    /// Attempts to draw one token, returning whether the draw succeeded.
    pub fn try_consume(&self) -> bool {
        let mut guard = self.inner.lock().expect("token bucket mutex poisoned");
        self.refill(&mut guard);
        if guard.tokens >= 1.0 {
            guard.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(max: u32, rate: f64) -> TokenBucket {
        TokenBucket::new(MaxTokens::try_new(max).unwrap(), RefillRate::try_new(rate).unwrap())
    }

    #[test]
    fn never_overfills_capacity() {
        let b = bucket(3, 1000.0);
        std::thread::sleep(std::time::Duration::from_millis(5));
        for _ in 0..3 {
            assert!(b.try_consume());
        }
        assert!(!b.try_consume());
    }

    #[tokio::test]
    async fn refills_continuously_over_time() {
        let b = bucket(2, 100.0);
        assert!(b.try_consume());
        assert!(b.try_consume());
        assert!(!b.try_consume());

        tokio::time::sleep(std::time::Duration::from_millis(15)).await;
        assert!(b.try_consume());
    }
}
