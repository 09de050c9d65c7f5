//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every configured organ
//! - Serve recent results from cache to avoid probe storms
//! - Report unhealthy organs to the circuit breakers

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use super::state::{HealthCheck, HealthLedger, HealthSummary};
use crate::config::HealthCheckConfig;
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;
use crate::resilience::CircuitBreakerRegistry;
use crate::transport::OrganTransport;

const POLL_BASE: Duration = Duration::from_secs(1);
const POLL_MAX: Duration = Duration::from_secs(10);

pub struct HealthMonitor {
    transport: Arc<dyn OrganTransport>,
    breakers: Arc<CircuitBreakerRegistry>,
    organs: Vec<String>,
    config: HealthCheckConfig,
    ledger: HealthLedger,
}

impl HealthMonitor {
    pub fn new(
        transport: Arc<dyn OrganTransport>,
        breakers: Arc<CircuitBreakerRegistry>,
        organs: Vec<String>,
        config: HealthCheckConfig,
    ) -> Self {
        let ledger = HealthLedger::new(config.history_len);
        Self {
            transport,
            breakers,
            organs,
            config,
            ledger,
        }
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            organs = self.organs.len(),
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Health of `resource`, reusing a result younger than `cache_secs`.
    pub async fn check(&self, resource: &str) -> HealthCheck {
        if let Some((age, last)) = self.ledger.last(resource) {
            if age < Duration::from_secs(self.config.cache_secs) {
                return last;
            }
        }
        self.probe(resource).await
    }

    /// Check every configured organ.
    pub async fn check_all(&self) -> BTreeMap<String, HealthCheck> {
        let mut results = BTreeMap::new();
        for organ in &self.organs {
            results.insert(organ.clone(), self.check(organ).await);
        }
        results
    }

    async fn probe(&self, resource: &str) -> HealthCheck {
        let started = Instant::now();
        let result = self.transport.probe(resource).await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        let check = match result {
            Ok(details) => HealthCheck {
                resource: resource.to_string(),
                healthy: true,
                response_time_ms,
                checked_at: SystemTime::now(),
                details,
                error: None,
            },
            Err(e) => {
                tracing::warn!(resource = %resource, error = %e, "Health check failed");
                HealthCheck {
                    resource: resource.to_string(),
                    healthy: false,
                    response_time_ms,
                    checked_at: SystemTime::now(),
                    details: None,
                    error: Some(e.to_string()),
                }
            }
        };

        // Recovery is left to the breaker's own timeout.
        if !check.healthy && self.config.unhealthy_feeds_breaker {
            self.breakers.record_failure(resource);
        }
        metrics::record_organ_health(resource, check.healthy);

        self.ledger.record(check.clone());
        check
    }

    /// Poll `resource` with backoff until it answers healthy or `timeout` passes.
    pub async fn wait_until_healthy(&self, resource: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new(POLL_BASE, POLL_MAX);

        loop {
            if self.probe(resource).await.healthy {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            time::sleep(backoff.next_delay().min(remaining)).await;
        }
    }

    pub fn history(&self, resource: &str, window: Duration) -> Vec<HealthCheck> {
        self.ledger.history(resource, window)
    }

    pub fn uptime(&self, resource: &str, window: Duration) -> f64 {
        self.ledger.uptime(resource, window)
    }

    pub fn summary(&self) -> HealthSummary {
        self.ledger.summary()
    }

    pub fn organs(&self) -> &[String] {
        &self.organs
    }
}
