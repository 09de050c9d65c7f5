//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer or on-demand check
//!     → Probe each organ's health endpoint
//!     → Record the result in state.rs
//!     → Unhealthy: record a failure against the organ's circuit breaker
//!
//! History (state.rs):
//!     Bounded per-organ history
//!     → uptime percentages and the overall summary
//! ```
//!
//! # Design Decisions
//! - Results younger than `cache_secs` are reused instead of re-probing
//! - A healthy probe never closes a breaker; recovery stays time-based
//! - Health state is per-organ, independent of callers

pub mod active;
pub mod state;

pub use active::HealthMonitor;
pub use state::{HealthCheck, HealthLedger, HealthSummary, OrganSummary};
