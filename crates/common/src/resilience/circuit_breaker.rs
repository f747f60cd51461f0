//! Circuit breaker for guarding calls to a degraded remote dependency.
//!
//! The breaker is pure bookkeeping: callers check [`CircuitBreaker::can_execute`]
//! immediately before every attempt and report the outcome with
//! [`CircuitBreaker::record_success`] / [`CircuitBreaker::record_failure`].
//! One breaker instance is scoped to one remote dependency, so all
//! concurrent callers observe and influence the same state.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, info, warn};

//==============================================================================
// Time Abstraction for Testability
//==============================================================================

/// Trait for time operations to enable deterministic testing
///
/// Production code uses [`SystemClock`]; tests inject [`MockClock`] to step
/// through the open-timeout without real delays.
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Get milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Mock clock for deterministic testing
///
/// Allows tests to control time progression without actual delays.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }

    /// Advance the mock clock by milliseconds (convenience method)
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Get the current elapsed time
    pub fn elapsed(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        let elapsed = self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO);
        self.start + elapsed
    }

    fn system_time(&self) -> SystemTime {
        let elapsed = self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO);
        SystemTime::UNIX_EPOCH + elapsed
    }
}

//==============================================================================
// Configuration
//==============================================================================

/// Configuration validation error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing limited requests to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Number of consecutive successes needed to close the circuit from half-open
    pub success_threshold: u32,
    /// Time to wait before transitioning from open to half-open
    pub timeout: Duration,
    /// Maximum number of in-flight probe calls allowed in half-open state
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }

        if self.success_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "success_threshold must be greater than 0".to_string(),
            });
        }

        if self.half_open_max_calls == 0 {
            return Err(ConfigError::Invalid {
                message: "half_open_max_calls must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    /// Set a custom clock and build a [`CircuitBreaker`] directly (useful for testing)
    pub fn clock<C: Clock>(self, clock: C) -> ConfigResult<CircuitBreaker<C>> {
        CircuitBreaker::with_clock(self.config, clock)
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Snapshot of circuit breaker counters for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub half_open_calls: u32,
}

//==============================================================================
// Circuit Breaker
//==============================================================================

/// Circuit breaker state machine.
///
/// State transitions:
/// - CLOSED: calls allowed; `failure_threshold` consecutive failures open
///   the circuit, any success resets the failure counter.
/// - OPEN: calls rejected until `timeout` has elapsed since the transition;
///   the next allowance check after that moves to HALF_OPEN and admits the
///   probing call.
/// - HALF_OPEN: up to `half_open_max_calls` probes in flight;
///   `success_threshold` consecutive successes close the circuit, any
///   failure reopens it and restarts the open timer.
///
/// `Clone` shares the underlying state, so clones of one breaker act as a
/// single breaker for the dependency they guard.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitState>>,
    consecutive_failures: Arc<AtomicU32>,
    half_open_successes: Arc<AtomicU32>,
    half_open_calls: Arc<AtomicU32>,
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    opened_at: Arc<RwLock<Option<Instant>>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures.load(Ordering::Acquire))
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            consecutive_failures: Arc::clone(&self.consecutive_failures),
            half_open_successes: Arc::clone(&self.half_open_successes),
            half_open_calls: Arc::clone(&self.half_open_calls),
            total_successes: Arc::clone(&self.total_successes),
            total_failures: Arc::clone(&self.total_failures),
            opened_at: Arc::clone(&self.opened_at),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker with the given configuration using the
    /// system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a circuit breaker with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default()).expect("default config should be valid")
    }

    /// Create a circuit breaker using the builder pattern
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            consecutive_failures: Arc::new(AtomicU32::new(0)),
            half_open_successes: Arc::new(AtomicU32::new(0)),
            half_open_calls: Arc::new(AtomicU32::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            opened_at: Arc::new(RwLock::new(None)),
            clock: Arc::new(clock),
        })
    }

    /// Check whether a call may proceed right now.
    ///
    /// Side-effecting: performs the OPEN -> HALF_OPEN transition once the
    /// open timeout has elapsed (the call that observed the elapsed timeout
    /// is admitted as the probe), and counts admitted half-open probes
    /// against `half_open_max_calls`. Must be called immediately before
    /// every attempt.
    pub fn can_execute(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = match self.opened_at.read() {
                    Ok(guard) => *guard,
                    Err(poisoned) => *poisoned.into_inner(),
                };

                if let Some(opened) = opened_at {
                    if self.clock.now().duration_since(opened) >= self.config.timeout {
                        self.transition_to_half_open();
                        self.half_open_calls.fetch_add(1, Ordering::AcqRel);
                        return true;
                    }
                }
                false
            }
            CircuitState::HalfOpen => {
                let in_flight = self.half_open_calls.load(Ordering::Acquire);
                if in_flight < self.config.half_open_max_calls {
                    self.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful attempt. Must be called exactly once per
    /// completed attempt.
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);

        match self.state() {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                self.release_half_open_call();
                let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold {
                    self.transition_to_closed();
                }
            }
            CircuitState::Open => {
                warn!("received success while circuit is open");
            }
        }
    }

    /// Record a failed attempt. Must be called exactly once per completed
    /// attempt.
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        match self.state() {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition_to_open();
                    warn!(failures, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                // Any failure during the probe phase reopens the circuit and
                // restarts the open timer.
                self.release_half_open_call();
                self.transition_to_open();
                warn!("circuit breaker reopened by half-open failure");
            }
            CircuitState::Open => {}
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned");
                *poisoned.into_inner()
            }
        }
    }

    /// Get a counters snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            total_successes: self.total_successes.load(Ordering::Acquire),
            total_failures: self.total_failures.load(Ordering::Acquire),
            half_open_calls: self.half_open_calls.load(Ordering::Acquire),
        }
    }

    /// Reset the circuit breaker to the closed state, clearing all counters
    pub fn reset(&self) {
        self.transition_to_closed();
        info!("circuit breaker manually reset");
    }

    fn release_half_open_call(&self) {
        let _ = self.half_open_calls.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            current.checked_sub(1)
        });
    }

    fn transition_to_open(&self) {
        if let Ok(mut state) = self.state.write() {
            *state = CircuitState::Open;
        }
        if let Ok(mut opened_at) = self.opened_at.write() {
            *opened_at = Some(self.clock.now());
        }
    }

    fn transition_to_half_open(&self) {
        if let Ok(mut state) = self.state.write() {
            if *state != CircuitState::Open {
                return;
            }
            *state = CircuitState::HalfOpen;
        }
        self.half_open_successes.store(0, Ordering::Release);
        self.half_open_calls.store(0, Ordering::Release);
        debug!("circuit breaker probing half-open");
    }

    fn transition_to_closed(&self) {
        if let Ok(mut state) = self.state.write() {
            *state = CircuitState::Closed;
        }
        self.consecutive_failures.store(0, Ordering::Release);
        self.half_open_successes.store(0, Ordering::Release);
        self.half_open_calls.store(0, Ordering::Release);
        if let Ok(mut opened_at) = self.opened_at.write() {
            *opened_at = None;
        }
        info!("circuit breaker closed");
    }
}
