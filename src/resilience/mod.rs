//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch to an organ:
//!     → circuit_breaker.rs (skip if the resource's circuit is open)
//!     → timeouts.rs (enforce the per-attempt deadline)
//!     → circuit_breaker.rs (record success or failure)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - A timed-out attempt is a failure like any other and is not retried in place
//! - Circuit breaker prevents hammering a failing organ
//! - Backoff only paces polling loops

pub mod backoff;
pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreakerRegistry, CircuitPermit, CircuitSnapshot, CircuitStatus};
