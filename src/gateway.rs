//! The `call` entry point.
//!
//! # Data Flow
//! ```text
//! CallRequest
//!     → validate (malformed input never reaches admission)
//!     → RateLimiter (subject x primary resource)
//!     → FallbackOrchestrator (breakers, transport, cache)
//!     → ResultCache (store live results for later fallbacks)
//!     → BillingHook (best effort)
//!     → CallOutcome
//! ```

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::billing::{BillingHook, MeteredBilling};
use crate::cache::{CacheStore, MemoryStore, ResultCache};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::fallback::{CallOutcome, FallbackLevel, FallbackOrchestrator, FallbackPlans, ParamMapperRegistry};
use crate::observability::metrics;
use crate::resilience::CircuitBreakerRegistry;
use crate::security::RateLimiter;
use crate::transport::OrganTransport;

fn default_use_fallbacks() -> bool {
    true
}

fn default_max_fallbacks() -> usize {
    3
}

/// One capability invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct CallRequest {
    /// Calling agent; rate limits and billing are keyed on it.
    pub subject: String,
    /// Primary resource (organ) name.
    pub resource: String,
    pub operation: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Caller tier signal; above the premium threshold the limit is boosted.
    #[serde(default)]
    pub tier_signal: Option<f64>,
    #[serde(default = "default_use_fallbacks")]
    pub use_fallbacks: bool,
    #[serde(default = "default_max_fallbacks")]
    pub max_fallbacks: usize,
}

impl CallRequest {
    pub fn new(
        subject: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
        params: Map<String, Value>,
    ) -> Self {
        Self {
            subject: subject.into(),
            resource: resource.into(),
            operation: operation.into(),
            params,
            tier_signal: None,
            use_fallbacks: default_use_fallbacks(),
            max_fallbacks: default_max_fallbacks(),
        }
    }

    fn validate(&self) -> GatewayResult<()> {
        for (field, value) in [
            ("subject", &self.subject),
            ("resource", &self.resource),
            ("operation", &self.operation),
        ] {
            if value.trim().is_empty() {
                return Err(GatewayError::InvalidRequest(format!("{} must not be empty", field)));
            }
            if value.contains(':') && field != "subject" {
                return Err(GatewayError::InvalidRequest(format!("{} must not contain ':'", field)));
            }
        }
        if let Some(signal) = self.tier_signal {
            if !signal.is_finite() {
                return Err(GatewayError::InvalidRequest("tier_signal must be finite".into()));
            }
        }
        Ok(())
    }

    /// Fallback budget; disabling fallbacks is a budget of zero.
    fn fallback_budget(&self) -> usize {
        if self.use_fallbacks {
            self.max_fallbacks
        } else {
            0
        }
    }
}

/// Composes admission, resilience, caching and billing around the transport.
pub struct Gateway {
    rate_limit_enabled: bool,
    limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    cache: Option<Arc<ResultCache>>,
    orchestrator: FallbackOrchestrator,
    billing: Option<Arc<dyn BillingHook>>,
}

impl Gateway {
    /// Gateway with an in-memory cache and, when enabled, metered billing.
    pub fn new(config: &GatewayConfig, transport: Arc<dyn OrganTransport>) -> Self {
        let billing = config
            .billing
            .enabled
            .then(|| Arc::new(MeteredBilling::new(&config.billing)) as Arc<dyn BillingHook>);
        Self::with_parts(config, transport, Arc::new(MemoryStore::new()), billing)
    }

    pub fn with_parts(
        config: &GatewayConfig,
        transport: Arc<dyn OrganTransport>,
        store: Arc<dyn CacheStore>,
        billing: Option<Arc<dyn BillingHook>>,
    ) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(&config.circuit_breaker));
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(ResultCache::new(store, &config.cache)));
        let orchestrator = FallbackOrchestrator::new(
            transport,
            breakers.clone(),
            cache.clone(),
            FallbackPlans::from_config(&config.fallback_plans),
            ParamMapperRegistry::with_builtins(),
        );

        Self {
            rate_limit_enabled: config.rate_limit.enabled,
            limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            breakers,
            cache,
            orchestrator,
            billing,
        }
    }

    pub async fn call(&self, request: CallRequest) -> GatewayResult<CallOutcome> {
        self.call_with_cancel(request, &CancellationToken::new()).await
    }

    pub async fn call_with_cancel(
        &self,
        request: CallRequest,
        cancel: &CancellationToken,
    ) -> GatewayResult<CallOutcome> {
        request.validate()?;

        let span = tracing::info_span!(
            "call",
            subject = %request.subject,
            resource = %request.resource,
            operation = %request.operation,
        );
        self.execute(request, cancel).instrument(span).await
    }

    async fn execute(&self, request: CallRequest, cancel: &CancellationToken) -> GatewayResult<CallOutcome> {
        let started = Instant::now();
        let CallRequest {
            subject,
            resource,
            operation,
            params,
            ..
        } = &request;

        if self.rate_limit_enabled {
            let decision = self.limiter.check_and_record(subject, resource, request.tier_signal);
            if !decision.allowed {
                tracing::warn!(usage = decision.current_usage, limit = decision.limit, "Rate limit exceeded");
                return Err(GatewayError::RateLimitExceeded {
                    resource: resource.clone(),
                    current_usage: decision.current_usage,
                    limit: decision.limit,
                    reset_at: self.limiter.reset_time(subject, resource),
                });
            }
        }

        let budget = request.fallback_budget();
        if budget == 0 && self.breakers.is_rejecting(resource) {
            return Err(GatewayError::ServiceUnavailable {
                resource: resource.clone(),
            });
        }

        let outcome = match self
            .orchestrator
            .execute_with_fallback(subject, resource, operation, params, budget, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                metrics::record_call(resource, FallbackLevel::Failed.as_str(), started.elapsed());
                return Err(e);
            }
        };

        if outcome.level != FallbackLevel::Cached {
            if let Some(cache) = &self.cache {
                cache.put(resource, operation, params, &outcome.value, None).await;
            }
        }

        if let Some(billing) = &self.billing {
            let billed = match outcome.level {
                FallbackLevel::Cached => resource.as_str(),
                _ => outcome.served_by.as_str(),
            };
            self.charge(billing.as_ref(), subject, billed, operation, params, &outcome.value, started)
                .await;
        }

        metrics::record_call(resource, outcome.level.as_str(), started.elapsed());
        tracing::debug!(level = %outcome.level, served_by = %outcome.served_by, "Call complete");
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn charge(
        &self,
        billing: &dyn BillingHook,
        subject: &str,
        resource: &str,
        operation: &str,
        params: &Map<String, Value>,
        value: &Value,
        started: Instant,
    ) {
        let estimate = billing.estimate_cost(resource, operation, params).await;
        let response_size = value.to_string().len();
        let cost = billing
            .track_usage(subject, resource, operation, response_size, started.elapsed(), estimate)
            .await;

        let memo = format!("{}:{}", resource, operation);
        if let Err(e) = billing.deduct(subject, cost, &memo).await {
            metrics::record_billing_failure();
            tracing::warn!(cost, error = %e, "Billing deduction failed");
        }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.cache.as_ref()
    }

    pub fn orchestrator(&self) -> &FallbackOrchestrator {
        &self.orchestrator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::BillingError;
    use crate::config::FallbackOptionConfig;
    use crate::transport::scripted::ScriptedTransport;
    use crate::transport::DispatchError;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.fallback_plans = HashMap::from([(
            "search".to_string(),
            vec![FallbackOptionConfig::Cached {
                description: "Use cached search results".into(),
            }],
        )]);
        config
    }

    fn query(q: &str) -> CallRequest {
        CallRequest::new("borg-1", "search", "query", json!({"query": q}).as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn test_open_circuit_serves_stale_cache() {
        let transport = Arc::new(ScriptedTransport::new());
        let gateway = Gateway::new(&config(), transport.clone());

        transport.reply("search", Ok(json!({"hits": ["a"]})));
        let live = gateway.call(query("rust")).await.unwrap();
        assert_eq!(live.level, FallbackLevel::Primary);

        transport.reply("search", Err(DispatchError::Timeout(Duration::from_secs(30))));
        for _ in 0..5 {
            let degraded = gateway.call(query("rust")).await.unwrap();
            assert_eq!(degraded.level, FallbackLevel::Cached);
        }
        assert_eq!(transport.called().len(), 6);

        let sixth = gateway.call(query("rust")).await.unwrap();
        assert_eq!(transport.called().len(), 6, "open circuit skips dispatch");
        assert_eq!(sixth.level, FallbackLevel::Cached);
        assert_eq!(sixth.note.as_deref(), Some("stale data"));
        assert_eq!(sixth.value, json!({"hits": ["a"]}));
    }

    #[tokio::test]
    async fn test_open_circuit_without_cache_is_exhausted() {
        let transport = Arc::new(ScriptedTransport::new());
        let gateway = Gateway::new(&config(), transport.clone());
        transport.fail("search");

        for _ in 0..5 {
            assert!(gateway.call(query("rust")).await.is_err());
        }
        let err = gateway.call(query("rust")).await.unwrap_err();
        assert!(matches!(err, GatewayError::AllFallbacksExhausted { .. }));
        assert!(!err.is_rejection());
        assert_eq!(err.attempts()[0].error, "circuit open");
        assert_eq!(transport.called().len(), 5);
    }

    #[tokio::test]
    async fn test_disabled_fallbacks_reject_open_circuit() {
        let transport = Arc::new(ScriptedTransport::new());
        let gateway = Gateway::new(&config(), transport.clone());
        for _ in 0..5 {
            gateway.breakers().record_failure("search");
        }

        let mut request = query("rust");
        request.use_fallbacks = false;
        let err = gateway.call(request).await.unwrap_err();
        assert!(matches!(err, GatewayError::ServiceUnavailable { ref resource } if resource == "search"));
        assert!(err.is_rejection());
        assert!(transport.called().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_before_dispatch() {
        let mut config = config();
        config.rate_limit.limits.insert("search".into(), 2);
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("search", Ok(json!(1)));
        let gateway = Gateway::new(&config, transport.clone());

        gateway.call(query("a")).await.unwrap();
        gateway.call(query("b")).await.unwrap();
        let err = gateway.call(query("c")).await.unwrap_err();

        match err {
            GatewayError::RateLimitExceeded {
                current_usage,
                limit,
                reset_at,
                ..
            } => {
                assert_eq!((current_usage, limit), (2, 2));
                assert!(reset_at > std::time::SystemTime::now());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.called().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_request_is_rejected() {
        let transport = Arc::new(ScriptedTransport::new());
        let gateway = Gateway::new(&config(), transport.clone());
        let request = CallRequest::new("borg-1", "", "query", Map::new());
        assert!(matches!(gateway.call(request).await, Err(GatewayError::InvalidRequest(_))));
        assert!(gateway.limiter().usage_stats("borg-1").resources.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_call() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("search", Ok(json!(1)));
        let gateway = Gateway::new(&config(), transport.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = gateway.call_with_cancel(query("rust"), &cancel).await.unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled));
        assert!(transport.called().is_empty());
    }

    #[tokio::test]
    async fn test_billing_failure_keeps_result() {
        let mut config = config();
        config.billing.enabled = true;
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("search", Ok(json!(1)));
        let billing = Arc::new(MeteredBilling::new(&config.billing));
        let gateway = Gateway::with_parts(
            &config,
            transport,
            Arc::new(MemoryStore::new()),
            Some(billing.clone()),
        );

        // No account yet: the deduction fails but the call succeeds.
        assert!(gateway.call(query("rust")).await.is_ok());
        assert_eq!(billing.balance("borg-1"), None);
        assert!(matches!(
            billing.deduct("borg-1", 1, "manual").await,
            Err(BillingError::UnknownAccount(_))
        ));

        billing.credit("borg-1", 10_000);
        gateway.call(query("rust")).await.unwrap();
        assert!(billing.balance("borg-1").unwrap() < 10_000);
        assert_eq!(billing.usage_summary("borg-1").usage_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_call_does_not_wedge_circuit() {
        let mut config = config();
        config.circuit_breaker.half_open = true;
        config.circuit_breaker.failure_threshold = 1;
        config.circuit_breaker.reset_timeout_secs = 60;
        let transport = Arc::new(ScriptedTransport::new());
        let gateway = Gateway::new(&config, transport.clone());

        transport.fail("search");
        assert!(gateway.call(query("rust")).await.is_err());
        assert!(gateway.breakers().is_rejecting("search"));

        tokio::time::advance(Duration::from_secs(61)).await;
        transport.reply("search", Ok(json!({"hits": 1})));
        transport.delay("search", Duration::from_secs(10));
        let abandoned = tokio::time::timeout(Duration::from_secs(1), gateway.call(query("rust"))).await;
        assert!(abandoned.is_err());
        assert!(!gateway.breakers().is_rejecting("search"));

        transport.delay("search", Duration::ZERO);
        let outcome = gateway.call(query("rust")).await.unwrap();
        assert_eq!(outcome.level, FallbackLevel::Primary);
        assert_eq!(transport.called().len(), 3);
        assert_eq!(
            gateway.breakers().snapshot("search").unwrap().status,
            crate::resilience::CircuitStatus::Closed
        );
    }
}
