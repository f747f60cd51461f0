//! Reusable resilience primitives shared across Quarry crates.
//!
//! This crate hosts the building blocks for talking to an unreliable remote
//! dependency: a circuit breaker state machine and a retry executor with
//! configurable backoff, jitter, and cooperative cancellation. Nothing in
//! here performs I/O of its own; higher layers compose these primitives
//! around their transports.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod resilience;

// Re-export commonly used types and traits for convenience
pub use resilience::{
    retry_with_policy, BackoffStrategy, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitBreakerMetrics, CircuitState, Clock, ConfigError, Jitter,
    MockClock, RetryConfig, RetryConfigBuilder, RetryDecision, RetryError, RetryExecutor,
    RetryOutcome, RetryPolicy, RetryResult, SystemClock,
};
