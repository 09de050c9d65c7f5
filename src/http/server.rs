//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the call, health and admin handlers
//! - Wire up middleware (request ID, tracing, timeout)
//! - Serve on a listener until the shutdown signal fires

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::config::GatewayConfig;
use crate::fallback::CallOutcome;
use crate::gateway::{CallRequest, Gateway};
use crate::health::{HealthCheck, HealthMonitor, HealthSummary};
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::response::ApiError;
use crate::lifecycle::shutdown;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub health: Arc<HealthMonitor>,
    pub config: Arc<GatewayConfig>,
}

/// HTTP front end for the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let router = Self::build_router(state);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let request_timeout = Duration::from_secs(state.config.listener.request_timeout_secs);

        let mut router = Router::new()
            .route("/health", get(liveness))
            .route("/v1/call", post(call_handler))
            .route("/v1/organs/health", get(organs_health));

        if state.config.admin.enabled {
            router = router.merge(admin::router(state.clone()));
        }

        router.with_state(state).layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout))
                .layer(propagate_request_id_layer()),
        )
    }

    /// Router without a listener, for in-process use.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown::wait(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[derive(Serialize)]
struct Liveness {
    status: &'static str,
    version: &'static str,
}

async fn liveness() -> Json<Liveness> {
    Json(Liveness {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn call_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CallRequest>,
) -> Result<Json<CallOutcome>, ApiError> {
    let request_id = request_id(&headers);
    tracing::debug!(
        request_id = %request_id,
        subject = %request.subject,
        resource = %request.resource,
        "Call received"
    );

    // Cancels in-flight attempts if the client goes away.
    let cancel = CancellationToken::new();
    let _disconnect = cancel.clone().drop_guard();

    match state.gateway.call_with_cancel(request, &cancel).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            tracing::info!(request_id = %request_id, error = %e, "Call failed");
            Err(ApiError(e))
        }
    }
}

#[derive(Serialize)]
struct OrgansHealth {
    organs: BTreeMap<String, HealthCheck>,
    summary: HealthSummary,
}

async fn organs_health(State(state): State<AppState>) -> Json<OrgansHealth> {
    let organs = state.health.check_all().await;
    Json(OrgansHealth {
        organs,
        summary: state.health.summary(),
    })
}
