//! Organ gateway (v1)
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                      ORGAN GATEWAY                        │
//!                 │                                                           │
//!   POST /v1/call │  ┌──────────┐   ┌──────────┐   ┌────────────────────┐     │
//!   ──────────────┼─▶│   http   │──▶│  rate    │──▶│ fallback           │     │   Primary organ
//!                 │  │  server  │   │  limit   │   │ orchestrator       │─────┼──▶ Secondary organ
//!                 │  └──────────┘   └──────────┘   │  + circuit breakers│     │   Native tool
//!                 │                                └─────────┬──────────┘     │
//!                 │                                          ▼                │
//!                 │                      ┌───────────┐  ┌──────────┐          │
//!                 │                      │  billing  │◀─│  result  │          │
//!                 │                      │   hook    │  │  cache   │          │
//!                 │                      └───────────┘  └──────────┘          │
//!                 │                                                           │
//!                 │  health monitor · metrics · admin API · lifecycle         │
//!                 └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The config file path is read from `ORGAN_GATEWAY_CONFIG`; without it the
//! built-in defaults are used.

use std::path::PathBuf;

use organ_gateway::config::{self, GatewayConfig};
use organ_gateway::lifecycle::{signals, startup, Shutdown};
use organ_gateway::observability::logging;

const CONFIG_ENV: &str = "ORGAN_GATEWAY_CONFIG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => config::load_config(&PathBuf::from(path))?,
        None => GatewayConfig::default(),
    };

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "organ-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        organs = config.organs.len(),
        plans = config.fallback_plans.len(),
        rate_limit = config.rate_limit.enabled,
        cache = config.cache.enabled,
        billing = config.billing.enabled,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    signals::install(shutdown.clone());

    startup::run(config, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
