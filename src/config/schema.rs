//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the organ gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Organ (remote capability provider) definitions.
    pub organs: Vec<OrganConfig>,

    /// Native tools usable as fallbacks.
    pub native_tools: Vec<NativeToolConfig>,

    /// Primary resource name -> ordered fallback options.
    pub fallback_plans: HashMap<String, Vec<FallbackOptionConfig>>,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Result cache configuration.
    pub cache: CacheConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Billing hook settings.
    pub billing: BillingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            organs: Vec::new(),
            native_tools: Vec::new(),
            fallback_plans: default_fallback_plans(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            timeouts: TimeoutConfig::default(),
            health_check: HealthCheckConfig::default(),
            billing: BillingConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Look up an organ by name.
    pub fn organ(&self, name: &str) -> Option<&OrganConfig> {
        self.organs.iter().find(|o| o.name == name)
    }

    /// Look up a native tool by name.
    pub fn native_tool(&self, name: &str) -> Option<&NativeToolConfig> {
        self.native_tools.iter().find(|t| t.name == name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Total time allowed for one inbound HTTP request, covering the full chain.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// A remote capability provider reached over HTTP.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrganConfig {
    /// Unique resource name (e.g., "duckduckgo").
    pub name: String,

    /// Base URL (e.g., "http://organ-duckduckgo:8000").
    pub base_url: String,

    /// Liveness path probed by the health monitor.
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// A native tool reachable through a tool server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NativeToolConfig {
    /// Tool name (e.g., "archon:send_email").
    pub name: String,

    /// Base URL of the server hosting the tool.
    pub base_url: String,
}

/// One entry of a fallback plan as written in the config file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackOptionConfig {
    Secondary {
        target: String,
        #[serde(default)]
        description: String,
    },
    NativeTool {
        tool: String,
        #[serde(default)]
        description: String,
    },
    Cached {
        #[serde(default)]
        description: String,
    },
    None {
        #[serde(default)]
        description: String,
    },
}

/// Plans shipped with the default configuration.
fn default_fallback_plans() -> HashMap<String, Vec<FallbackOptionConfig>> {
    use FallbackOptionConfig::*;

    let secondary = |target: &str, description: &str| Secondary {
        target: target.to_string(),
        description: description.to_string(),
    };
    let native = |tool: &str, description: &str| NativeTool {
        tool: tool.to_string(),
        description: description.to_string(),
    };
    let cached = |description: &str| Cached {
        description: description.to_string(),
    };

    HashMap::from([
        (
            "gmail".to_string(),
            vec![
                native("archon:send_email", "Archon email service"),
                cached("Skip email operations (cached)"),
            ],
        ),
        (
            "stripe".to_string(),
            vec![None {
                description: "No payment fallback available".to_string(),
            }],
        ),
        (
            "bitcoin".to_string(),
            vec![
                native("archon:blockchain_query", "Archon blockchain service"),
                cached("Use cached blockchain data"),
            ],
        ),
        (
            "mongodb".to_string(),
            vec![
                secondary("postgres", "PostgreSQL fallback"),
                cached("Use cached database results"),
            ],
        ),
        (
            "duckduckgo".to_string(),
            vec![
                secondary("google", "Google search fallback"),
                cached("Use cached search results"),
            ],
        ),
        (
            "grafana".to_string(),
            vec![
                secondary("prometheus", "Prometheus metrics fallback"),
                cached("Use cached metrics"),
            ],
        ),
        (
            "wikipedia".to_string(),
            vec![
                secondary("wolfram", "Wolfram knowledge fallback"),
                cached("Use cached knowledge"),
            ],
        ),
        (
            "arxiv".to_string(),
            vec![
                secondary("semantic_scholar", "Semantic Scholar fallback"),
                cached("Use cached research data"),
            ],
        ),
    ])
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Fixed window length in seconds.
    pub window_secs: u64,

    /// Limit for resources without an explicit entry.
    pub default_limit: u32,

    /// Tier signal above which the premium multiplier applies.
    pub premium_threshold: f64,

    /// Multiplier applied to the base limit for premium callers.
    pub premium_multiplier: f64,

    /// Per-resource requests per window.
    pub limits: HashMap<String, u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 3600,
            default_limit: 100,
            premium_threshold: 10.0,
            premium_multiplier: 1.5,
            limits: HashMap::from([
                ("gmail".to_string(), 100),
                ("stripe".to_string(), 50),
                ("bitcoin".to_string(), 200),
                ("mongodb".to_string(), 500),
                ("duckduckgo".to_string(), 300),
                ("grafana".to_string(), 1000),
                ("wikipedia".to_string(), 500),
                ("arxiv".to_string(), 200),
            ]),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Seconds after the last failure before the circuit closes again.
    pub reset_timeout_secs: u64,

    /// Admit a single trial call after the timeout instead of closing outright.
    pub half_open: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 300,
            half_open: false,
        }
    }
}

/// Result cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Store successful results for later use as a fallback.
    pub enabled: bool,

    /// TTL applied when a put does not specify one.
    pub default_ttl_secs: u64,

    /// Param names excluded from cache key derivation.
    pub volatile_fields: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 3600,
            volatile_fields: vec![
                "timestamp".to_string(),
                "nonce".to_string(),
                "request_id".to_string(),
            ],
        }
    }
}

/// Timeout configuration for outbound calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for one dispatch attempt in seconds.
    pub dispatch_secs: u64,

    /// Deadline for one health probe in seconds.
    pub probe_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dispatch_secs: 30,
            probe_secs: 5,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable the periodic probe loop.
    pub enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// How long a probe result is reused before probing again.
    pub cache_secs: u64,

    /// Probe results retained per resource.
    pub history_len: usize,

    /// Record a circuit failure when a probe reports unhealthy.
    pub unhealthy_feeds_breaker: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            cache_secs: 10,
            history_len: 100,
            unhealthy_feeds_breaker: true,
        }
    }
}

/// Billing configuration. Costs are in micro-units of the ledger currency.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Invoke the billing hook after successful calls.
    pub enabled: bool,

    /// Base cost for resources without an explicit entry.
    pub default_cost: u64,

    /// Per-resource base cost.
    pub base_costs: HashMap<String, u64>,

    /// Balance credited to a subject the first time it is seen.
    pub initial_balance: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_cost: 1000,
            base_costs: HashMap::from([
                ("gmail".to_string(), 500),
                ("stripe".to_string(), 1000),
                ("bitcoin".to_string(), 800),
                ("mongodb".to_string(), 300),
                ("duckduckgo".to_string(), 200),
                ("grafana".to_string(), 400),
                ("wikipedia".to_string(), 100),
                ("arxiv".to_string(), 200),
            ]),
            initial_balance: 0,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}
