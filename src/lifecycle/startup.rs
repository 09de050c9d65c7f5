//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Start background tasks (health checks, metrics)
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use super::Shutdown;
use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::health::HealthMonitor;
use crate::http::{AppState, HttpServer};
use crate::observability::metrics;
use crate::transport::{DispatchError, HttpTransport, OrganTransport};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("transport setup failed: {0}")]
    Transport(#[from] DispatchError),

    #[error("invalid address {address}: {source}")]
    Address {
        address: String,
        source: std::net::AddrParseError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the HTTP surface needs, wired from one config.
pub struct Services {
    pub config: Arc<GatewayConfig>,
    pub gateway: Arc<Gateway>,
    pub health: Arc<HealthMonitor>,
}

impl Services {
    pub fn app_state(&self) -> AppState {
        AppState {
            gateway: self.gateway.clone(),
            health: self.health.clone(),
            config: self.config.clone(),
        }
    }
}

/// Build the gateway and health monitor over an HTTP transport.
pub fn build_services(config: GatewayConfig) -> Result<Services, StartupError> {
    let transport: Arc<dyn OrganTransport> = Arc::new(HttpTransport::from_config(&config)?);
    Ok(build_services_with(config, transport))
}

/// Build the gateway and health monitor over any transport.
pub fn build_services_with(config: GatewayConfig, transport: Arc<dyn OrganTransport>) -> Services {
    let gateway = Arc::new(Gateway::new(&config, transport.clone()));
    let organs = config.organs.iter().map(|o| o.name.clone()).collect();
    let health = Arc::new(HealthMonitor::new(
        transport,
        gateway.breakers().clone(),
        organs,
        config.health_check.clone(),
    ));

    Services {
        config: Arc::new(config),
        gateway,
        health,
    }
}

/// Start every subsystem and serve until `shutdown` fires.
pub async fn run(config: GatewayConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let address = &config.observability.metrics_address;
        let addr: SocketAddr = address.parse().map_err(|source| StartupError::Address {
            address: address.clone(),
            source,
        })?;
        metrics::init_metrics(addr);
    }

    let services = build_services(config)?;

    let health = services.health.clone();
    let health_shutdown = shutdown.subscribe();
    let health_task = tokio::spawn(async move { health.run(health_shutdown).await });

    let listener = TcpListener::bind(&services.config.listener.bind_address).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        organs = services.config.organs.len(),
        "Listening for connections"
    );

    let server = HttpServer::new(services.app_state());
    let result = server.run(listener, shutdown.subscribe()).await;

    if let Err(e) = health_task.await {
        tracing::error!(error = %e, "Health monitor task failed");
    }
    result.map_err(StartupError::from)
}
