//! Admin API.
//!
//! Read-only views of breakers, fallback plans, cache and quota usage, plus
//! cache invalidation. Every route requires the configured bearer key.

pub mod auth;
pub mod handlers;

use axum::routing::{delete, get};
use axum::{middleware, Router};

use self::auth::admin_auth;
use self::handlers::*;
use crate::http::server::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/circuits", get(get_circuits))
        .route("/admin/fallbacks", get(get_fallbacks))
        .route("/admin/cache", get(get_cache))
        .route("/admin/cache/{resource}", delete(invalidate_cache))
        .route("/admin/usage/{subject}", get(get_usage))
        .route_layer(middleware::from_fn_with_state(state, admin_auth))
}
