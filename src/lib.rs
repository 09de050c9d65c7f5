//! Organ gateway library.
//!
//! Routes capability calls to remote organs and degrades through secondary
//! organs, native tools and cached results when the primary is unavailable.

pub mod admin;
pub mod billing;
pub mod cache;
pub mod config;
pub mod error;
pub mod fallback;
pub mod gateway;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod transport;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use fallback::{CallOutcome, FallbackLevel};
pub use gateway::{CallRequest, Gateway};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
