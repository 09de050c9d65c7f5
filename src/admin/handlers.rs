use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::fallback::{FallbackLevel, FallbackOption};
use crate::http::server::AppState;
use crate::resilience::circuit_breaker::CircuitSnapshot;
use crate::security::rate_limit::UsageStats;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub organs: usize,
    pub open_circuits: usize,
    pub cache_enabled: bool,
}

#[derive(Serialize)]
pub struct FallbackReport {
    pub plans: BTreeMap<String, Vec<FallbackOption>>,
    pub stats: BTreeMap<String, BTreeMap<FallbackLevel, u64>>,
}

#[derive(Serialize)]
pub struct CacheReport {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<CacheStats>,
}

#[derive(Deserialize)]
pub struct InvalidateQuery {
    pub operation: Option<String>,
}

#[derive(Serialize)]
pub struct InvalidateResult {
    pub removed: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let breakers = state.gateway.breakers();
    let open_circuits = breakers
        .snapshots()
        .iter()
        .filter(|s| breakers.is_rejecting(&s.resource))
        .count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        organs: state.config.organs.len(),
        open_circuits,
        cache_enabled: state.gateway.cache().is_some(),
    })
}

pub async fn get_circuits(State(state): State<AppState>) -> Json<Vec<CircuitSnapshot>> {
    Json(state.gateway.breakers().snapshots())
}

pub async fn get_fallbacks(State(state): State<AppState>) -> Json<FallbackReport> {
    let orchestrator = state.gateway.orchestrator();
    let plans = orchestrator
        .plans()
        .resources()
        .map(|r| (r.to_string(), orchestrator.available_fallbacks(r)))
        .collect();

    Json(FallbackReport {
        plans,
        stats: orchestrator.fallback_stats(),
    })
}

pub async fn get_cache(State(state): State<AppState>) -> Json<CacheReport> {
    let cache = state.gateway.cache();
    Json(CacheReport {
        enabled: cache.is_some(),
        stats: cache.map(|c| c.stats()),
    })
}

pub async fn invalidate_cache(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(query): Query<InvalidateQuery>,
) -> Json<InvalidateResult> {
    let removed = match state.gateway.cache() {
        Some(cache) => cache.invalidate(&resource, query.operation.as_deref()).await,
        None => 0,
    };
    tracing::info!(
        resource = %resource,
        operation = query.operation.as_deref().unwrap_or("*"),
        removed,
        "Cache invalidated via admin API"
    );
    Json(InvalidateResult { removed })
}

pub async fn get_usage(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> Json<UsageStats> {
    Json(state.gateway.limiter().usage_stats(&subject))
}
