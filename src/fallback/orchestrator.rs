//! Walks the primary organ and then its fallback plan until one yields.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::mapper::ParamMapperRegistry;
use super::plan::{FallbackLevel, FallbackOption, FallbackPlans};
use crate::cache::ResultCache;
use crate::error::{Attempt, AttemptLog, GatewayError, GatewayResult};
use crate::observability::metrics;
use crate::resilience::{CircuitBreakerRegistry, CircuitPermit};
use crate::transport::{DispatchError, OrganTransport};

const CIRCUIT_OPEN: &str = "circuit open";
const CACHE_TARGET: &str = "cache";
const STALE_NOTE: &str = "stale data";

/// Result of a call that produced a value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallOutcome {
    pub value: Value,
    pub level: FallbackLevel,
    pub description: String,
    /// Resource or tool that produced `value`.
    pub served_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Everything attempted before the value was obtained.
    pub tried: Vec<Attempt>,
}

/// Executes the primary-then-plan chain for one call.
pub struct FallbackOrchestrator {
    transport: Arc<dyn OrganTransport>,
    breakers: Arc<CircuitBreakerRegistry>,
    cache: Option<Arc<ResultCache>>,
    plans: FallbackPlans,
    mappers: ParamMapperRegistry,
    usage: DashMap<String, HashMap<FallbackLevel, u64>>,
}

impl FallbackOrchestrator {
    pub fn new(
        transport: Arc<dyn OrganTransport>,
        breakers: Arc<CircuitBreakerRegistry>,
        cache: Option<Arc<ResultCache>>,
        plans: FallbackPlans,
        mappers: ParamMapperRegistry,
    ) -> Self {
        Self {
            transport,
            breakers,
            cache,
            plans,
            mappers,
            usage: DashMap::new(),
        }
    }

    /// Run `fut` under `permit` unless the call is cancelled first or while
    /// it is in flight. Abandoning the attempt drops the permit unsettled.
    async fn attempt<F>(
        &self,
        permit: &CircuitPermit<'_>,
        cancel: &CancellationToken,
        fut: F,
    ) -> GatewayResult<Result<Value, DispatchError>>
    where
        F: Future<Output = Result<Value, DispatchError>>,
    {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(organ = %permit.resource(), "Attempt abandoned on cancellation");
                Err(GatewayError::Cancelled)
            }
            result = fut => Ok(result),
        }
    }

    /// Feed one dispatch result to the target's breaker. `Ok(None)` means
    /// the chain should move on.
    fn settle(
        &self,
        permit: CircuitPermit<'_>,
        result: Result<Value, DispatchError>,
        tried: &mut Vec<Attempt>,
    ) -> GatewayResult<Option<Value>> {
        let target = permit.resource().to_string();
        match result {
            Ok(value) => {
                permit.succeed();
                Ok(Some(value))
            }
            Err(e) if e.is_structural() => {
                // The target answered; only the request was bad.
                permit.succeed();
                Err(GatewayError::InvalidRequest(format!("{}: {}", target, e)))
            }
            Err(e) => {
                permit.fail();
                tracing::warn!(organ = %target, error = %e, "Dispatch failed");
                tried.push(Attempt::new(target, e.to_string()));
                Ok(None)
            }
        }
    }

    fn record_usage(&self, resource: &str, level: FallbackLevel) {
        *self
            .usage
            .entry(resource.to_string())
            .or_default()
            .entry(level)
            .or_insert(0) += 1;
        metrics::record_fallback(resource, level.as_str());
    }

    fn finish(
        &self,
        primary: &str,
        level: FallbackLevel,
        description: &str,
        served_by: &str,
        value: Value,
        tried: Vec<Attempt>,
    ) -> CallOutcome {
        self.record_usage(primary, level);
        if level != FallbackLevel::Primary {
            tracing::info!(
                resource = %primary,
                served_by = %served_by,
                level = %level,
                "Served by fallback"
            );
        }
        CallOutcome {
            value,
            level,
            description: description.to_string(),
            served_by: served_by.to_string(),
            note: (level == FallbackLevel::Cached).then(|| STALE_NOTE.to_string()),
            tried,
        }
    }

    /// Try the primary, then at most `max_fallbacks` plan entries in order.
    pub async fn execute_with_fallback(
        &self,
        subject: &str,
        primary: &str,
        operation: &str,
        params: &Map<String, Value>,
        max_fallbacks: usize,
        cancel: &CancellationToken,
    ) -> GatewayResult<CallOutcome> {
        let mut tried = Vec::new();

        if let Some(permit) = self.breakers.try_acquire(primary) {
            let result = self
                .attempt(&permit, cancel, self.transport.dispatch(primary, operation, params))
                .await?;
            if let Some(value) = self.settle(permit, result, &mut tried)? {
                return Ok(self.finish(
                    primary,
                    FallbackLevel::Primary,
                    "Primary organ",
                    primary,
                    value,
                    tried,
                ));
            }
        } else {
            tracing::info!(subject = %subject, resource = %primary, "Primary circuit open, skipping dispatch");
            tried.push(Attempt::new(primary, CIRCUIT_OPEN));
        }

        for option in self.plans.plan(primary).iter().take(max_fallbacks) {
            match option {
                FallbackOption::Secondary { target, description } => {
                    let Some(permit) = self.breakers.try_acquire(target) else {
                        tried.push(Attempt::new(target.as_str(), CIRCUIT_OPEN));
                        continue;
                    };
                    let result = self
                        .attempt(&permit, cancel, self.transport.dispatch(target, operation, params))
                        .await?;
                    if let Some(value) = self.settle(permit, result, &mut tried)? {
                        return Ok(self.finish(
                            primary,
                            FallbackLevel::Secondary,
                            description,
                            target,
                            value,
                            tried,
                        ));
                    }
                }
                FallbackOption::NativeTool { tool, description } => {
                    let Some(permit) = self.breakers.try_acquire(tool) else {
                        tried.push(Attempt::new(tool.as_str(), CIRCUIT_OPEN));
                        continue;
                    };
                    let mapped = self.mappers.map(primary, tool, params);
                    let result = self
                        .attempt(&permit, cancel, self.transport.invoke_tool(tool, &mapped))
                        .await?;
                    if let Some(value) = self.settle(permit, result, &mut tried)? {
                        return Ok(self.finish(
                            primary,
                            FallbackLevel::Native,
                            description,
                            tool,
                            value,
                            tried,
                        ));
                    }
                }
                FallbackOption::Cached { description } => {
                    if cancel.is_cancelled() {
                        return Err(GatewayError::Cancelled);
                    }
                    let Some(cache) = &self.cache else {
                        tried.push(Attempt::new(CACHE_TARGET, "cache disabled"));
                        continue;
                    };
                    match cache.try_get(primary, operation, params).await {
                        Ok(Some(hit)) => {
                            return Ok(self.finish(
                                primary,
                                FallbackLevel::Cached,
                                description,
                                CACHE_TARGET,
                                hit.value,
                                tried,
                            ));
                        }
                        Ok(None) => tried.push(Attempt::new(CACHE_TARGET, "no cached result")),
                        Err(e) => tried.push(Attempt::new(CACHE_TARGET, e.to_string())),
                    }
                }
                FallbackOption::None { .. } => {}
            }
        }

        self.record_usage(primary, FallbackLevel::Failed);
        tracing::warn!(
            subject = %subject,
            resource = %primary,
            operation = %operation,
            attempts = tried.len(),
            "All fallbacks exhausted"
        );
        Err(GatewayError::AllFallbacksExhausted {
            resource: primary.to_string(),
            operation: operation.to_string(),
            tried: AttemptLog(tried),
        })
    }

    /// Outcome counts per primary resource and level.
    pub fn fallback_stats(&self) -> BTreeMap<String, BTreeMap<FallbackLevel, u64>> {
        self.usage
            .iter()
            .map(|entry| {
                let levels = entry.value().iter().map(|(l, c)| (*l, *c)).collect();
                (entry.key().clone(), levels)
            })
            .collect()
    }

    /// The configured plan for `resource`.
    pub fn available_fallbacks(&self, resource: &str) -> Vec<FallbackOption> {
        self.plans.plan(resource).to_vec()
    }

    /// Every configured plan, keyed by primary resource.
    pub fn plans(&self) -> &FallbackPlans {
        &self.plans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, CircuitBreakerConfig};
    use crate::transport::scripted::ScriptedTransport;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        transport: Arc<ScriptedTransport>,
        breakers: Arc<CircuitBreakerRegistry>,
        cache: Arc<ResultCache>,
        orchestrator: FallbackOrchestrator,
    }

    fn harness(plans: Vec<(&str, Vec<FallbackOption>)>) -> Harness {
        let transport = Arc::new(ScriptedTransport::new());
        let breakers = Arc::new(CircuitBreakerRegistry::new(&CircuitBreakerConfig::default()));
        let cache = Arc::new(ResultCache::in_memory(&CacheConfig::default()));
        let plans = FallbackPlans::new(
            plans
                .into_iter()
                .map(|(r, options)| (r.to_string(), options))
                .collect(),
        );
        let orchestrator = FallbackOrchestrator::new(
            transport.clone(),
            breakers.clone(),
            Some(cache.clone()),
            plans,
            ParamMapperRegistry::with_builtins(),
        );
        Harness {
            transport,
            breakers,
            cache,
            orchestrator,
        }
    }

    fn secondary(target: &str) -> FallbackOption {
        FallbackOption::Secondary {
            target: target.into(),
            description: format!("{} fallback", target),
        }
    }

    fn native(tool: &str) -> FallbackOption {
        FallbackOption::NativeTool {
            tool: tool.into(),
            description: format!("{} tool", tool),
        }
    }

    fn cached() -> FallbackOption {
        FallbackOption::Cached {
            description: "cached".into(),
        }
    }

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_primary_success_resets_breaker() {
        let h = harness(vec![("a", vec![secondary("b")])]);
        h.breakers.record_failure("a");
        h.transport.reply("a", Ok(json!({"ok": true})));

        let outcome = h
            .orchestrator
            .execute_with_fallback("borg-1", "a", "op", &Map::new(), 3, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.level, FallbackLevel::Primary);
        assert_eq!(outcome.served_by, "a");
        assert!(outcome.tried.is_empty());
        assert_eq!(h.breakers.snapshot("a").unwrap().failure_count, 0);
        assert_eq!(h.transport.called(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_max_fallbacks_bounds_plan_walk() {
        let h = harness(vec![("a", vec![secondary("b"), native("t"), cached()])]);
        h.transport.fail("a");
        h.transport.fail("b");
        h.transport.fail("t");
        h.cache.put("a", "op", &Map::new(), &json!("old"), None).await;

        let err = h
            .orchestrator
            .execute_with_fallback("borg-1", "a", "op", &Map::new(), 2, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(h.transport.called(), vec!["a", "b", "t"]);
        let targets: Vec<_> = err.attempts().iter().map(|a| a.target.as_str()).collect();
        assert_eq!(targets, vec!["a", "b", "t"]);
        assert_eq!(h.cache.stats().hits, 0);
    }

    #[tokio::test]
    async fn test_native_tool_gets_mapped_params() {
        let h = harness(vec![("gmail", vec![native("archon:send_email")])]);
        h.transport.fail("gmail");
        h.transport.reply("archon:send_email", Ok(json!({"sent": true})));

        let p = params(json!({"to": "x@y.z", "subject": "s", "body": "b", "labels": ["inbox"]}));
        let outcome = h
            .orchestrator
            .execute_with_fallback("borg-1", "gmail", "send", &p, 3, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.level, FallbackLevel::Native);
        assert_eq!(outcome.served_by, "archon:send_email");
        assert_eq!(outcome.tried.len(), 1);
        let sent = h.transport.params_for("archon:send_email").unwrap();
        assert!(!sent.contains_key("labels"));
        assert_eq!(sent["to"], json!("x@y.z"));
    }

    #[tokio::test]
    async fn test_open_primary_goes_straight_to_cache() {
        let h = harness(vec![("search", vec![cached()])]);
        for _ in 0..5 {
            h.breakers.record_failure("search");
        }
        let p = params(json!({"query": "rust"}));
        h.cache.put("search", "query", &p, &json!(["result"]), None).await;

        let outcome = h
            .orchestrator
            .execute_with_fallback("borg-1", "search", "query", &p, 3, &CancellationToken::new())
            .await
            .unwrap();

        assert!(h.transport.called().is_empty());
        assert_eq!(outcome.level, FallbackLevel::Cached);
        assert_eq!(outcome.note.as_deref(), Some("stale data"));
        assert_eq!(outcome.tried, vec![Attempt::new("search", "circuit open")]);
    }

    #[tokio::test]
    async fn test_open_secondary_is_skipped() {
        let h = harness(vec![("a", vec![secondary("b"), secondary("c")])]);
        for _ in 0..5 {
            h.breakers.record_failure("b");
        }
        h.transport.fail("a");
        h.transport.reply("c", Ok(json!(1)));

        let outcome = h
            .orchestrator
            .execute_with_fallback("borg-1", "a", "op", &Map::new(), 3, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.served_by, "c");
        assert_eq!(h.transport.called(), vec!["a", "c"]);
        assert_eq!(outcome.tried[1], Attempt::new("b", "circuit open"));
    }

    #[tokio::test]
    async fn test_structural_error_stops_chain() {
        let h = harness(vec![("a", vec![secondary("b")])]);
        h.transport
            .reply("a", Err(DispatchError::InvalidRequest("missing query".into())));
        h.transport.reply("b", Ok(json!(1)));

        let err = h
            .orchestrator
            .execute_with_fallback("borg-1", "a", "op", &Map::new(), 3, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::InvalidRequest(_)));
        assert_eq!(h.transport.called(), vec!["a"]);
        assert_eq!(h.breakers.snapshot("a").unwrap().failure_count, 0);
    }

    #[tokio::test]
    async fn test_none_option_falls_through() {
        let h = harness(vec![(
            "stripe",
            vec![FallbackOption::None {
                description: "no fallback".into(),
            }],
        )]);
        h.transport.fail("stripe");

        let err = h
            .orchestrator
            .execute_with_fallback("borg-1", "stripe", "charge", &Map::new(), 3, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.attempts().len(), 1);
        assert_eq!(h.breakers.snapshot("stripe").unwrap().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_attempt() {
        let h = harness(vec![("a", vec![secondary("b")])]);
        h.transport.reply("a", Ok(json!(1)));
        h.transport.delay("a", Duration::from_secs(10));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = h
            .orchestrator
            .execute_with_fallback("borg-1", "a", "op", &Map::new(), 3, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Cancelled));
        assert_eq!(h.transport.called(), vec!["a"]);
        assert_eq!(h.breakers.snapshot("a").unwrap().failure_count, 0);
    }

    #[tokio::test]
    async fn test_stats_count_serving_level() {
        let h = harness(vec![("a", vec![secondary("b")])]);
        h.transport.reply("a", Ok(json!(1)));
        h.transport.reply("b", Ok(json!(2)));
        let cancel = CancellationToken::new();

        h.orchestrator
            .execute_with_fallback("s", "a", "op", &Map::new(), 3, &cancel)
            .await
            .unwrap();
        h.transport.fail("a");
        h.orchestrator
            .execute_with_fallback("s", "a", "op", &Map::new(), 3, &cancel)
            .await
            .unwrap();
        h.orchestrator
            .execute_with_fallback("s", "a", "op", &Map::new(), 0, &cancel)
            .await
            .unwrap_err();

        let stats = h.orchestrator.fallback_stats();
        assert_eq!(stats["a"][&FallbackLevel::Primary], 1);
        assert_eq!(stats["a"][&FallbackLevel::Secondary], 1);
        assert_eq!(stats["a"][&FallbackLevel::Failed], 1);
        assert_eq!(h.orchestrator.available_fallbacks("a"), vec![secondary("b")]);
    }
}
