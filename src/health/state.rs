//! Per-organ health records.
//!
//! Keeps the latest probe result for each organ plus a bounded history used
//! for uptime and summary figures.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

/// Window used for the uptime figure in [`HealthSummary`].
const SUMMARY_WINDOW: Duration = Duration::from_secs(24 * 3600);

/// Result of one liveness probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheck {
    pub resource: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub checked_at: SystemTime,
    /// JSON body returned by the health endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct OrganHealth {
    history: VecDeque<(Instant, HealthCheck)>,
}

/// Aggregate view across every organ probed so far.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthSummary {
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub average_response_time_ms: f64,
    pub organs: BTreeMap<String, OrganSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganSummary {
    pub healthy: bool,
    pub uptime_percent: f64,
    pub last_check: SystemTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Bounded probe history for every organ.
#[derive(Debug)]
pub struct HealthLedger {
    history_len: usize,
    organs: DashMap<String, OrganHealth>,
}

impl HealthLedger {
    pub fn new(history_len: usize) -> Self {
        Self {
            history_len: history_len.max(1),
            organs: DashMap::new(),
        }
    }

    pub fn record(&self, check: HealthCheck) {
        let mut organ = self.organs.entry(check.resource.clone()).or_default();
        organ.history.push_back((Instant::now(), check));
        while organ.history.len() > self.history_len {
            organ.history.pop_front();
        }
    }

    /// Latest check and how long ago it was taken.
    pub fn last(&self, resource: &str) -> Option<(Duration, HealthCheck)> {
        let organ = self.organs.get(resource)?;
        organ
            .history
            .back()
            .map(|(at, check)| (at.elapsed(), check.clone()))
    }

    /// Checks taken within `window`, oldest first.
    pub fn history(&self, resource: &str, window: Duration) -> Vec<HealthCheck> {
        let Some(organ) = self.organs.get(resource) else {
            return Vec::new();
        };
        organ
            .history
            .iter()
            .filter(|(at, _)| at.elapsed() <= window)
            .map(|(_, check)| check.clone())
            .collect()
    }

    /// Percentage of healthy checks within `window`; 0 with no checks.
    pub fn uptime(&self, resource: &str, window: Duration) -> f64 {
        let history = self.history(resource, window);
        if history.is_empty() {
            return 0.0;
        }
        let healthy = history.iter().filter(|c| c.healthy).count();
        healthy as f64 / history.len() as f64 * 100.0
    }

    pub fn summary(&self) -> HealthSummary {
        let mut summary = HealthSummary::default();
        let mut total_ms = 0u64;

        let names: Vec<String> = self.organs.iter().map(|r| r.key().clone()).collect();
        for name in names {
            let Some((_, last)) = self.last(&name) else {
                continue;
            };
            summary.checked += 1;
            if last.healthy {
                summary.healthy += 1;
            } else {
                summary.unhealthy += 1;
            }
            total_ms += last.response_time_ms;
            summary.organs.insert(
                name.clone(),
                OrganSummary {
                    healthy: last.healthy,
                    uptime_percent: self.uptime(&name, SUMMARY_WINDOW),
                    last_check: last.checked_at,
                    details: last.details,
                },
            );
        }

        if summary.checked > 0 {
            summary.average_response_time_ms = total_ms as f64 / summary.checked as f64;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(resource: &str, healthy: bool, ms: u64) -> HealthCheck {
        HealthCheck {
            resource: resource.into(),
            healthy,
            response_time_ms: ms,
            checked_at: SystemTime::now(),
            details: None,
            error: None,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let ledger = HealthLedger::new(3);
        for i in 0..5 {
            ledger.record(check("arxiv", i % 2 == 0, i));
        }
        let history = ledger.history("arxiv", Duration::from_secs(60));
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].response_time_ms, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uptime_respects_window() {
        let ledger = HealthLedger::new(100);
        ledger.record(check("arxiv", false, 5));
        tokio::time::advance(Duration::from_secs(7200)).await;
        ledger.record(check("arxiv", true, 5));
        ledger.record(check("arxiv", true, 5));
        ledger.record(check("arxiv", false, 5));

        let recent = ledger.uptime("arxiv", Duration::from_secs(3600));
        assert!((recent - 66.67).abs() < 0.01);
        assert_eq!(ledger.uptime("arxiv", Duration::from_secs(10_000)), 50.0);
        assert_eq!(ledger.uptime("unknown", Duration::from_secs(60)), 0.0);
    }

    #[test]
    fn test_summary_counts_latest_state() {
        let ledger = HealthLedger::new(10);
        ledger.record(check("arxiv", false, 10));
        ledger.record(check("arxiv", true, 30));
        ledger.record(check("gmail", false, 50));

        let summary = ledger.summary();
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.unhealthy, 1);
        assert_eq!(summary.average_response_time_ms, 40.0);
        assert_eq!(summary.organs["arxiv"].uptime_percent, 50.0);
    }
}
