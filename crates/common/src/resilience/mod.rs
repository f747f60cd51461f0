//! Resilience patterns for building fault-tolerant clients.
//!
//! Two primitives live here:
//! - [`CircuitBreaker`]: tracks the health of one remote dependency and
//!   rejects calls while it is presumed degraded.
//! - [`RetryExecutor`]: retries a fallible async operation with backoff,
//!   jitter, and cooperative cancellation.
//!
//! The two are deliberately independent; composing them (breaker gating
//! first, retry loop inside) is done by the calling layer so the breaker
//! can observe every individual attempt.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState, Clock, ConfigError, MockClock, SystemClock,
};
pub use retry::{
    policies, retry_with_policy, BackoffStrategy, Jitter, RetryConfig, RetryConfigBuilder,
    RetryDecision, RetryError, RetryExecutor, RetryOutcome, RetryPolicy, RetryResult,
};
