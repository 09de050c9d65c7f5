//! Outbound calls to organs and native tools.
//!
//! # Data Flow
//! ```text
//! FallbackOrchestrator
//!     → OrganTransport::dispatch (primary or secondary organ)
//!     → OrganTransport::invoke_tool (native tool with remapped params)
//! HealthMonitor
//!     → OrganTransport::probe (liveness endpoint)
//! ```
//!
//! # Design Decisions
//! - The trait is the seam for tests: orchestrator and gateway tests script it
//! - Every call carries its own deadline, enforced inside the transport
//! - Only `InvalidRequest` is structural; everything else advances the chain

pub mod http;
#[cfg(test)]
pub(crate) mod scripted;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use http::HttpTransport;

/// Why a single dispatch did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("timeout after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The target rejected the call itself; retrying elsewhere will not help.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown resource: {0}")]
    UnknownResource(String),
}

impl DispatchError {
    /// Structural errors stop the fallback chain.
    pub fn is_structural(&self) -> bool {
        matches!(self, DispatchError::InvalidRequest(_))
    }
}

/// Capability calls and liveness probes.
#[async_trait]
pub trait OrganTransport: Send + Sync {
    /// Invoke `operation` on the organ registered as `resource`.
    async fn dispatch(
        &self,
        resource: &str,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, DispatchError>;

    /// Invoke a native tool.
    async fn invoke_tool(&self, tool: &str, params: &Map<String, Value>) -> Result<Value, DispatchError>;

    /// Probe the organ's health endpoint. `Ok` carries the response body, if any.
    async fn probe(&self, resource: &str) -> Result<Option<Value>, DispatchError>;
}
