//! Metrics collection and exposition.
//!
//! # Metrics
//! - `organ_gateway_calls_total` (counter): calls by resource and serving level
//! - `organ_gateway_call_duration_seconds` (histogram): end-to-end call latency
//! - `organ_gateway_rate_limited_total` (counter): denied admissions by resource
//! - `organ_gateway_circuit_open` (gauge): 1=open, 0=closed, per resource
//! - `organ_gateway_fallback_total` (counter): chain outcomes by resource and level
//! - `organ_gateway_cache_events_total` (counter): hit, miss, set, error
//! - `organ_gateway_organ_health` (gauge): 1=healthy, 0=unhealthy
//! - `organ_gateway_billing_failures_total` (counter)
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_call(resource: &str, level: &'static str, elapsed: Duration) {
    ::metrics::counter!(
        "organ_gateway_calls_total",
        "resource" => resource.to_string(),
        "level" => level
    )
    .increment(1);
    ::metrics::histogram!("organ_gateway_call_duration_seconds", "resource" => resource.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_rate_limited(resource: &str) {
    ::metrics::counter!("organ_gateway_rate_limited_total", "resource" => resource.to_string())
        .increment(1);
}

pub fn record_circuit_state(resource: &str, open: bool) {
    ::metrics::gauge!("organ_gateway_circuit_open", "resource" => resource.to_string())
        .set(if open { 1.0 } else { 0.0 });
}

pub fn record_fallback(resource: &str, level: &'static str) {
    ::metrics::counter!(
        "organ_gateway_fallback_total",
        "resource" => resource.to_string(),
        "level" => level
    )
    .increment(1);
}

pub fn record_cache_event(event: &'static str) {
    ::metrics::counter!("organ_gateway_cache_events_total", "event" => event).increment(1);
}

pub fn record_organ_health(resource: &str, healthy: bool) {
    ::metrics::gauge!("organ_gateway_organ_health", "resource" => resource.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_billing_failure() {
    ::metrics::counter!("organ_gateway_billing_failures_total").increment(1);
}
