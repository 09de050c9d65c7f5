//! Per-subject, per-resource rate limiting with tiered limits.
//!
//! Each (subject, resource) pair owns a fixed window. The window is reset
//! lazily on the first access after it expires; there is no background sweep.
//! Callers whose tier signal exceeds the premium threshold get the base limit
//! multiplied by the premium factor.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::observability::metrics;

/// A fixed counting window.
#[derive(Debug)]
struct RateWindow {
    count: u32,
    window_start: Instant,
}

impl RateWindow {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests counted in the current window, including this one if allowed.
    pub current_usage: u32,
    /// Effective limit for this caller.
    pub limit: u32,
}

/// Usage of one resource by one subject.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceUsage {
    pub request_count: u32,
    pub limit: u32,
    pub usage_percent: f64,
    pub reset_time: SystemTime,
}

/// Usage of every resource touched by one subject.
#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub subject: String,
    pub total_requests: u64,
    pub resources: BTreeMap<String, ResourceUsage>,
}

type WindowKey = (String, String);

/// Fixed-window rate limiter keyed by (subject, resource).
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    default_limit: u32,
    premium_threshold: f64,
    premium_multiplier: f64,
    limits: HashMap<String, u32>,
    windows: DashMap<WindowKey, Arc<Mutex<RateWindow>>>,
}

fn lock(cell: &Mutex<RateWindow>) -> MutexGuard<'_, RateWindow> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window_secs),
            default_limit: config.default_limit,
            premium_threshold: config.premium_threshold,
            premium_multiplier: config.premium_multiplier,
            limits: config.limits.clone(),
            windows: DashMap::new(),
        }
    }

    fn base_limit(&self, resource: &str) -> u32 {
        self.limits.get(resource).copied().unwrap_or(self.default_limit)
    }

    /// Limit for `resource`, boosted for premium tier signals.
    pub fn effective_limit(&self, resource: &str, tier_signal: Option<f64>) -> u32 {
        let base = self.base_limit(resource);
        match tier_signal {
            Some(signal) if signal > self.premium_threshold => {
                (f64::from(base) * self.premium_multiplier).floor() as u32
            }
            _ => base,
        }
    }

    fn cell(&self, subject: &str, resource: &str) -> Arc<Mutex<RateWindow>> {
        let key = (subject.to_string(), resource.to_string());
        if let Some(cell) = self.windows.get(&key) {
            return cell.clone();
        }
        self.windows
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(RateWindow::new())))
            .clone()
    }

    /// Check the caller's window and count the request if it is admitted.
    pub fn check_and_record(
        &self,
        subject: &str,
        resource: &str,
        tier_signal: Option<f64>,
    ) -> RateDecision {
        let limit = self.effective_limit(resource, tier_signal);
        let cell = self.cell(subject, resource);
        let mut window = lock(&cell);

        let now = Instant::now();
        if now >= window.window_start + self.window {
            window.count = 0;
            window.window_start = now;
            tracing::debug!(subject = %subject, resource = %resource, "Rate window reset");
        }

        let allowed = window.count < limit;
        if allowed {
            window.count += 1;
        } else {
            metrics::record_rate_limited(resource);
        }

        tracing::debug!(
            subject = %subject,
            resource = %resource,
            usage = window.count,
            limit,
            allowed,
            "Rate limit check"
        );

        RateDecision {
            allowed,
            current_usage: window.count,
            limit,
        }
    }

    /// Wall-clock time at which the caller's current window ends.
    pub fn reset_time(&self, subject: &str, resource: &str) -> SystemTime {
        let key = (subject.to_string(), resource.to_string());
        let remaining = match self.windows.get(&key) {
            Some(cell) => {
                let window = lock(&cell);
                (window.window_start + self.window).saturating_duration_since(Instant::now())
            }
            None => self.window,
        };
        SystemTime::now() + remaining
    }

    /// Per-resource usage for `subject` across the windows seen so far.
    pub fn usage_stats(&self, subject: &str) -> UsageStats {
        let mut resources = BTreeMap::new();
        let mut total_requests = 0u64;

        let keys: Vec<WindowKey> = self
            .windows
            .iter()
            .filter(|r| r.key().0 == subject)
            .map(|r| r.key().clone())
            .collect();

        for (_, resource) in keys {
            let cell = self.cell(subject, &resource);
            let count = {
                let window = lock(&cell);
                if Instant::now() >= window.window_start + self.window {
                    0
                } else {
                    window.count
                }
            };
            let limit = self.base_limit(&resource);
            let usage_percent = if limit > 0 {
                (f64::from(count) / f64::from(limit) * 1000.0).round() / 10.0
            } else {
                0.0
            };
            total_requests += u64::from(count);
            resources.insert(
                resource.clone(),
                ResourceUsage {
                    request_count: count,
                    limit,
                    usage_percent,
                    reset_time: self.reset_time(subject, &resource),
                },
            );
        }

        UsageStats {
            subject: subject.to_string(),
            total_requests,
            resources,
        }
    }
}
