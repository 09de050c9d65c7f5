//! Admission control.
//!
//! # Data Flow
//! ```text
//! Incoming call:
//!     → rate_limit.rs (check the subject's window for the resource)
//!     → admitted: continue to the circuit breaker and dispatch
//!     → denied: RateLimitExceeded with usage, limit and reset time
//! ```
//!
//! # Design Decisions
//! - Fail fast: a denied call costs nothing downstream
//! - One lock per (subject, resource) window, never a global lock

pub mod rate_limit;

pub use rate_limit::{RateDecision, RateLimiter, ResourceUsage, UsageStats};
