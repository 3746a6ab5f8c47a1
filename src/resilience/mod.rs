//! Resilience primitives: retry-with-backoff and a generic circuit breaker.
//!
//! Everything in this module is free-standing — it knows nothing about
//! agents, channels, or webhooks. Higher components (the messaging guard,
//! the peer node) compose these primitives rather than reimplementing them.

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitOpenError};
pub use retry::{retry, Jitter, RetryOptions};
