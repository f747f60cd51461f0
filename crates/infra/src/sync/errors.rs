//! Sync-specific error types
//!
//! Provides error classification for sync operations with retry metadata.
//! The taxonomy the rest of the system reasons about: `CircuitOpen` fails
//! fast while the dependency is presumed unhealthy, `RetryExhausted` is
//! fatal for a single operation and carries the final underlying cause,
//! `Protocol` marks contract violations that must never be retried, and
//! `Timeout`/`Cancelled` report run-level interruptions.

use quarry_core::sync::ports::TransportError;
use quarry_domain::QuarryError;
use thiserror::Error;

/// Categories of sync errors for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorCategory {
    /// Circuit breaker rejected the call - fail fast, no retry within the call
    CircuitOpen,
    /// Retry budget exhausted - fatal for this operation
    Exhausted,
    /// Protocol/contract violation - non-retryable
    Protocol,
    /// Authentication errors (401/403-equivalent) - non-retryable here
    Authentication,
    /// Rate limiting (429-equivalent) - retryable with backoff
    RateLimit,
    /// Server errors (5xx-equivalent) - retryable
    Server,
    /// Client errors (4xx except auth) - non-retryable
    Client,
    /// Network/connection errors - retryable
    Network,
    /// Local database errors - may be retryable
    Database,
    /// Configuration errors - non-retryable
    Config,
    /// Cancellation or deadline - non-retryable
    Interrupted,
}

/// Sync operation errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("circuit breaker is open, rejecting call")]
    CircuitOpen,

    #[error("retry attempts exhausted after {attempts} tries: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<SyncError>,
    },

    #[error("remote protocol violation: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("client error: {0}")]
    Client(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Get the error category for this error
    pub fn category(&self) -> SyncErrorCategory {
        match self {
            Self::CircuitOpen => SyncErrorCategory::CircuitOpen,
            Self::RetryExhausted { .. } => SyncErrorCategory::Exhausted,
            Self::Protocol(_) => SyncErrorCategory::Protocol,
            Self::Auth(_) => SyncErrorCategory::Authentication,
            Self::RateLimit(_) => SyncErrorCategory::RateLimit,
            Self::Server(_) => SyncErrorCategory::Server,
            Self::Client(_) => SyncErrorCategory::Client,
            Self::Network(_) => SyncErrorCategory::Network,
            Self::Database(_) => SyncErrorCategory::Database,
            Self::Config(_) => SyncErrorCategory::Config,
            Self::Timeout(_) | Self::Cancelled => SyncErrorCategory::Interrupted,
        }
    }

    /// Check if this error should be retried within the same operation
    pub fn should_retry(&self) -> bool {
        matches!(
            self.category(),
            SyncErrorCategory::RateLimit
                | SyncErrorCategory::Server
                | SyncErrorCategory::Network
                | SyncErrorCategory::Database
        )
    }
}

/// Convert transport failures into the sync taxonomy.
impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(message) => Self::Network(message),
            TransportError::Timeout(duration) => {
                Self::Network(format!("request timed out after {duration:?}"))
            }
            TransportError::Server { status, message } => {
                Self::Server(format!("status {status}: {message}"))
            }
            TransportError::RateLimited(message) => Self::RateLimit(message),
            TransportError::Auth(message) => Self::Auth(message),
            TransportError::NotFound(message) => Self::Client(message),
            TransportError::Malformed(message) => Self::Protocol(message),
        }
    }
}

/// Convert from QuarryError to SyncError
impl From<QuarryError> for SyncError {
    fn from(err: QuarryError) -> Self {
        match err {
            QuarryError::Database(message) => Self::Database(message),
            QuarryError::Config(message) => Self::Config(message),
            QuarryError::Network(message) => Self::Network(message),
            QuarryError::Auth(message) => Self::Auth(message),
            QuarryError::NotFound(message) | QuarryError::InvalidInput(message) => {
                Self::Client(message)
            }
            QuarryError::Internal(message) => Self::Server(message),
        }
    }
}
