//! Gateway-level error taxonomy.
//!
//! Every failure a caller can observe from [`Gateway::call`](crate::Gateway::call)
//! is one of these variants. Cache and billing faults never reach the caller;
//! they are logged and counted where they happen.

use std::fmt;
use std::time::SystemTime;

use serde::Serialize;
use thiserror::Error;

/// One attempted target and the reason it did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    /// Resource or native tool name.
    pub target: String,
    /// Human-readable failure reason.
    pub error: String,
}

impl Attempt {
    pub fn new(target: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            error: error.into(),
        }
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.error)
    }
}

/// Wrapper so the tried list renders as `a: err; b: err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AttemptLog(pub Vec<Attempt>);

impl fmt::Display for AttemptLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attempt) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", attempt)?;
        }
        Ok(())
    }
}

/// Errors surfaced to callers of the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed input. Never enters the fallback chain.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Circuit open and no fallback was permitted.
    #[error("Service unavailable: circuit open for {resource}")]
    ServiceUnavailable { resource: String },

    /// Caller exhausted its window for this resource.
    #[error("Rate limit exceeded for {resource}: {current_usage}/{limit}")]
    RateLimitExceeded {
        resource: String,
        current_usage: u32,
        limit: u32,
        reset_at: SystemTime,
    },

    /// Primary and every permitted fallback failed.
    #[error("All fallbacks failed for {resource}:{operation}. Tried: {tried}")]
    AllFallbacksExhausted {
        resource: String,
        operation: String,
        tried: AttemptLog,
    },

    /// The caller cancelled the request between or during attempts.
    #[error("Call cancelled")]
    Cancelled,
}

impl GatewayError {
    /// True for cheap failures decided before any dispatch happened.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            GatewayError::InvalidRequest(_)
                | GatewayError::ServiceUnavailable { .. }
                | GatewayError::RateLimitExceeded { .. }
        )
    }

    /// Attempts made before the chain gave up, if any.
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            GatewayError::AllFallbacksExhausted { tried, .. } => &tried.0,
            _ => &[],
        }
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
