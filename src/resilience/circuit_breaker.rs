//! Per-resource circuit breakers.
//!
//! # States
//! - Closed: normal operation, dispatch allowed
//! - Open: resource assumed down, dispatch rejected without trying
//! - Half-Open: one trial call admitted (only when `half_open` is enabled)
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → Closed: reset_timeout elapsed since last failure (default, no probe)
//! Open → Half-Open: reset_timeout elapsed (half_open = true)
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails
//! ```
//!
//! # Design Decisions
//! - One breaker per resource, created lazily on first reference, never removed
//! - One mutex per resource so unrelated callers never contend
//! - The default reset is purely time based and does not confirm recovery

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Externally visible circuit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct CircuitState {
    status: CircuitStatus,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    /// Set while the single half-open trial call is outstanding.
    trial_in_flight: bool,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            status: CircuitStatus::Closed,
            failure_count: 0,
            last_failure_at: None,
            trial_in_flight: false,
        }
    }
}

impl CircuitState {
    fn close(&mut self) {
        self.status = CircuitStatus::Closed;
        self.failure_count = 0;
        self.trial_in_flight = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Rejected,
    Admitted,
    Trial,
}

/// Admission to dispatch once against a resource.
///
/// Settle it with [`succeed`](Self::succeed) or [`fail`](Self::fail). An
/// unsettled trial permit releases the half-open slot on drop, so a call
/// future dropped mid-flight cannot wedge the circuit.
#[derive(Debug)]
pub struct CircuitPermit<'a> {
    registry: &'a CircuitBreakerRegistry,
    resource: String,
    trial: bool,
    settled: bool,
}

impl CircuitPermit<'_> {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.registry.record_success(&self.resource);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.registry.record_failure(&self.resource);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            tracing::debug!(resource = %self.resource, "Trial call dropped, releasing slot");
            self.registry.release_trial(&self.resource);
        }
    }
}

/// Read-only view of one breaker, for admin and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub resource: String,
    pub status: CircuitStatus,
    pub failure_count: u32,
    pub secs_since_last_failure: Option<u64>,
}

/// Registry of circuit breakers keyed by resource name.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open: bool,
    circuits: DashMap<String, Arc<Mutex<CircuitState>>>,
}

fn lock(cell: &Mutex<CircuitState>) -> MutexGuard<'_, CircuitState> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CircuitBreakerRegistry {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: Duration::from_secs(config.reset_timeout_secs),
            half_open: config.half_open,
            circuits: DashMap::new(),
        }
    }

    fn cell(&self, resource: &str) -> Arc<Mutex<CircuitState>> {
        if let Some(cell) = self.circuits.get(resource) {
            return cell.clone();
        }
        self.circuits
            .entry(resource.to_string())
            .or_default()
            .clone()
    }

    /// Returns true if dispatch to `resource` must be skipped.
    ///
    /// When the reset timeout has elapsed this closes the circuit (or moves
    /// it to half-open and admits the caller as the trial) and returns false.
    /// Prefer [`try_acquire`](Self::try_acquire) when the caller may be
    /// dropped before it records an outcome.
    pub fn is_open(&self, resource: &str) -> bool {
        self.admit(resource) == Admission::Rejected
    }

    /// Admit one dispatch to `resource`, or `None` while the circuit rejects.
    ///
    /// A permit that holds the half-open trial slot gives it back when it is
    /// dropped without an outcome.
    pub fn try_acquire(&self, resource: &str) -> Option<CircuitPermit<'_>> {
        let trial = match self.admit(resource) {
            Admission::Rejected => return None,
            Admission::Admitted => false,
            Admission::Trial => true,
        };
        Some(CircuitPermit {
            registry: self,
            resource: resource.to_string(),
            trial,
            settled: false,
        })
    }

    fn admit(&self, resource: &str) -> Admission {
        let cell = self.cell(resource);
        let mut state = lock(&cell);

        match state.status {
            CircuitStatus::Closed => Admission::Admitted,
            CircuitStatus::Open => {
                let expired = state
                    .last_failure_at
                    .map(|at| at.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if !expired {
                    return Admission::Rejected;
                }
                if self.half_open {
                    state.status = CircuitStatus::HalfOpen;
                    state.trial_in_flight = true;
                    tracing::info!(resource = %resource, "Circuit half-open, admitting trial call");
                    Admission::Trial
                } else {
                    state.close();
                    metrics::record_circuit_state(resource, false);
                    tracing::info!(resource = %resource, "Circuit reset after timeout");
                    Admission::Admitted
                }
            }
            CircuitStatus::HalfOpen => {
                if state.trial_in_flight {
                    Admission::Rejected
                } else {
                    state.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    /// Record a failed dispatch against `resource`.
    pub fn record_failure(&self, resource: &str) {
        let cell = self.cell(resource);
        let mut state = lock(&cell);

        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure_at = Some(Instant::now());

        match state.status {
            CircuitStatus::HalfOpen => {
                state.status = CircuitStatus::Open;
                state.trial_in_flight = false;
                metrics::record_circuit_state(resource, true);
                tracing::warn!(resource = %resource, "Trial call failed, circuit re-opened");
            }
            CircuitStatus::Closed if state.failure_count >= self.failure_threshold => {
                state.status = CircuitStatus::Open;
                metrics::record_circuit_state(resource, true);
                tracing::warn!(
                    resource = %resource,
                    failures = state.failure_count,
                    "Circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Record a successful dispatch against `resource`.
    pub fn record_success(&self, resource: &str) {
        let cell = self.cell(resource);
        let mut state = lock(&cell);

        if state.status != CircuitStatus::Closed {
            metrics::record_circuit_state(resource, false);
            tracing::info!(resource = %resource, "Circuit closed after successful call");
        }
        state.close();
    }

    /// Whether [`is_open`](Self::is_open) would currently reject, without
    /// changing any state.
    pub fn is_rejecting(&self, resource: &str) -> bool {
        let Some(cell) = self.circuits.get(resource).map(|r| r.clone()) else {
            return false;
        };
        let state = lock(&cell);
        match state.status {
            CircuitStatus::Closed => false,
            CircuitStatus::Open => state
                .last_failure_at
                .map(|at| at.elapsed() < self.reset_timeout)
                .unwrap_or(false),
            CircuitStatus::HalfOpen => state.trial_in_flight,
        }
    }

    /// Give back a half-open trial slot whose call ended without an outcome.
    pub fn release_trial(&self, resource: &str) {
        if let Some(cell) = self.circuits.get(resource).map(|r| r.clone()) {
            let mut state = lock(&cell);
            if state.status == CircuitStatus::HalfOpen {
                state.trial_in_flight = false;
            }
        }
    }

    /// Current view of one breaker, without the auto-reset side effect.
    pub fn snapshot(&self, resource: &str) -> Option<CircuitSnapshot> {
        let cell = self.circuits.get(resource)?.clone();
        let state = lock(&cell);
        Some(CircuitSnapshot {
            resource: resource.to_string(),
            status: state.status,
            failure_count: state.failure_count,
            secs_since_last_failure: state.last_failure_at.map(|at| at.elapsed().as_secs()),
        })
    }

    /// Views of every breaker referenced so far, sorted by resource.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let names: Vec<String> = self.circuits.iter().map(|r| r.key().clone()).collect();
        let mut out: Vec<_> = names.iter().filter_map(|n| self.snapshot(n)).collect();
        out.sort_by(|a, b| a.resource.cmp(&b.resource));
        out
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(&CircuitBreakerConfig::default())
    }
}
