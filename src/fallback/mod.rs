//! Graceful degradation across organs, native tools and cached results.
//!
//! # Data Flow
//! ```text
//! execute_with_fallback(primary, operation, params)
//!     → circuit closed? dispatch primary
//!     → plan.rs: walk options in declared order, up to max_fallbacks
//!         Secondary  → same operation on another organ
//!         NativeTool → mapper.rs remaps params, then invoke the tool
//!         Cached     → last result for the primary, flagged "stale data"
//!         None       → nothing
//!     → AllFallbacksExhausted with every attempt when nothing yields
//! ```
//!
//! # Design Decisions
//! - Plans are static and never reordered at runtime
//! - Attempts are sequential; each one feeds its own target's breaker
//! - A structural rejection ends the chain instead of trying elsewhere

pub mod mapper;
pub mod orchestrator;
pub mod plan;

pub use mapper::{ParamMapper, ParamMapperRegistry};
pub use orchestrator::{CallOutcome, FallbackOrchestrator};
pub use plan::{FallbackLevel, FallbackOption, FallbackPlans};
