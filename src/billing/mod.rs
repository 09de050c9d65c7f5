//! Cost accounting for served calls.
//!
//! # Data Flow
//! ```text
//! Gateway (after a call produced a value):
//!     → estimate_cost(resource, operation, params)
//!     → track_usage(subject, ..., elapsed, estimate) → actual cost
//!     → deduct(subject, cost, memo)
//!     → failure: logged and counted, the caller still gets its result
//! ```
//!
//! # Design Decisions
//! - Best effort: no compensation, reconciliation or retry queue
//! - Amounts are integer micro-units; no floating point in the ledger

pub mod metered;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use metered::{MeteredBilling, UsageRecord, UsageSummary};

/// Ledger failures. Never surfaced to the caller of a gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    #[error("Insufficient funds for {subject}: balance {balance} < cost {cost}")]
    InsufficientFunds { subject: String, balance: u64, cost: u64 },

    #[error("No account for {0}")]
    UnknownAccount(String),

    #[error("Ledger error: {0}")]
    Ledger(String),
}

/// Collaborator charged after every call that produced a value.
#[async_trait]
pub trait BillingHook: Send + Sync {
    /// Predicted cost before the call's timing is known.
    async fn estimate_cost(&self, resource: &str, operation: &str, params: &Map<String, Value>) -> u64;

    /// Record the usage and return the final cost.
    async fn track_usage(
        &self,
        subject: &str,
        resource: &str,
        operation: &str,
        response_size: usize,
        elapsed: Duration,
        estimate: u64,
    ) -> u64;

    async fn deduct(&self, subject: &str, cost: u64, memo: &str) -> Result<(), BillingError>;
}

/// Billing hook that charges nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBilling;

#[async_trait]
impl BillingHook for NoopBilling {
    async fn estimate_cost(&self, _resource: &str, _operation: &str, _params: &Map<String, Value>) -> u64 {
        0
    }

    async fn track_usage(
        &self,
        _subject: &str,
        _resource: &str,
        _operation: &str,
        _response_size: usize,
        _elapsed: Duration,
        _estimate: u64,
    ) -> u64 {
        0
    }

    async fn deduct(&self, _subject: &str, _cost: u64, _memo: &str) -> Result<(), BillingError> {
        Ok(())
    }
}
