//! Result cache with staleness tracking.
//!
//! Successful organ results are stored under a key derived from the resource,
//! the operation and the stable subset of params. The fallback chain reads
//! them back when every live option has failed.
//!
//! # Design Decisions
//! - Entries are written whole and never mutated; re-caching overwrites
//! - Expiry belongs to the store; this layer never deletes except on invalidate
//! - Entries past 80% of their TTL are reported stale
//! - Store faults are counted and degrade to a miss

pub mod key;
pub mod store;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::CacheConfig;
use crate::observability::metrics;

pub use store::{CacheError, CacheStore, MemoryStore, StoredValue};

/// Fraction of the TTL after which an entry is considered stale.
const STALE_FRACTION: f64 = 0.8;

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Serialized form of one cache entry.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    result: Value,
    resource: String,
    operation: String,
    /// Wall-clock write time, milliseconds since the Unix epoch.
    cached_at_ms: u64,
    ttl_ms: u64,
}

/// A cache hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedResult {
    pub value: Value,
    pub cached_at: SystemTime,
    pub age_seconds: u64,
    pub is_stale: bool,
}

/// Counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
}

/// Cache of organ results in front of a [`CacheStore`].
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
    volatile_fields: HashSet<String>,
    counters: Counters,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            volatile_fields: config.volatile_fields.iter().cloned().collect(),
            counters: Counters::default(),
        }
    }

    /// Cache backed by a fresh [`MemoryStore`].
    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    pub fn key(&self, resource: &str, operation: &str, params: &Map<String, Value>) -> String {
        key::derive_key(resource, operation, params, &self.volatile_fields)
    }

    fn record_error(&self, action: &str, err: &CacheError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_event("error");
        tracing::warn!(action, error = %err, "Cache fault, continuing without cache");
    }

    /// Store `value`; returns false if the store rejected it.
    pub async fn put(
        &self,
        resource: &str,
        operation: &str,
        params: &Map<String, Value>,
        value: &Value,
        ttl: Option<Duration>,
    ) -> bool {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let key = self.key(resource, operation, params);
        let envelope = Envelope {
            result: value.clone(),
            resource: resource.to_string(),
            operation: operation.to_string(),
            cached_at_ms: millis(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default(),
            ),
            ttl_ms: millis(ttl),
        };

        let written = match serde_json::to_vec(&envelope) {
            Ok(payload) => self.store.set(&key, payload, ttl).await,
            Err(e) => Err(CacheError::from(e)),
        };

        match written {
            Ok(()) => {
                self.counters.sets.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_event("set");
                tracing::debug!(key = %key, ttl_ms = millis(ttl), "Cached result");
                true
            }
            Err(e) => {
                self.record_error("set", &e);
                false
            }
        }
    }

    /// Read back a cached result, stale or not.
    pub async fn get(
        &self,
        resource: &str,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Option<CachedResult> {
        self.try_get(resource, operation, params).await.unwrap_or(None)
    }

    /// Like [`ResultCache::get`], but hands the fault back to callers that
    /// want to report it. Faults are counted and logged either way.
    pub async fn try_get(
        &self,
        resource: &str,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<Option<CachedResult>, CacheError> {
        let key = self.key(resource, operation, params);
        match self.lookup(&key).await {
            Ok(Some(hit)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_event("hit");
                Ok(Some(hit))
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_event("miss");
                Ok(None)
            }
            Err(e) => {
                self.record_error("get", &e);
                Err(e)
            }
        }
    }

    async fn lookup(&self, key: &str) -> Result<Option<CachedResult>, CacheError> {
        let Some(stored) = self.store.get(key).await? else {
            return Ok(None);
        };
        let envelope: Envelope = serde_json::from_slice(&stored.payload)?;

        // Age comes from the store's monotonic TTL, not the wall clock.
        let ttl = Duration::from_millis(envelope.ttl_ms);
        let age = ttl.saturating_sub(stored.ttl_remaining);
        let is_stale = age.as_secs_f64() > ttl.as_secs_f64() * STALE_FRACTION;

        Ok(Some(CachedResult {
            value: envelope.result,
            cached_at: UNIX_EPOCH + Duration::from_millis(envelope.cached_at_ms),
            age_seconds: age.as_secs(),
            is_stale,
        }))
    }

    /// Drop every entry for `resource`, or only those for one operation.
    pub async fn invalidate(&self, resource: &str, operation: Option<&str>) -> usize {
        let prefix = match operation {
            Some(op) => key::operation_prefix(resource, op),
            None => key::resource_prefix(resource),
        };
        match self.store.delete_prefix(&prefix).await {
            Ok(removed) => {
                tracing::info!(resource = %resource, operation = ?operation, removed, "Cache invalidated");
                removed
            }
            Err(e) => {
                self.record_error("invalidate", &e);
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_threshold() {
        let cache = ResultCache::in_memory(&CacheConfig::default());
        let p = params(json!({"query": "rust"}));
        cache
            .put("search", "query", &p, &json!({"hits": 3}), Some(Duration::from_secs(100)))
            .await;

        tokio::time::advance(Duration::from_secs(79)).await;
        let fresh = cache.get("search", "query", &p).await.unwrap();
        assert!(!fresh.is_stale);
        assert_eq!(fresh.age_seconds, 79);

        tokio::time::advance(Duration::from_secs(2)).await;
        let stale = cache.get("search", "query", &p).await.unwrap();
        assert!(stale.is_stale);
        assert_eq!(stale.value, json!({"hits": 3}));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(cache.get("search", "query", &p).await.is_none());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (2, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_second_ttl_goes_stale() {
        let cache = ResultCache::in_memory(&CacheConfig::default());
        let p = params(json!({"query": "rust"}));
        let before = SystemTime::now();
        cache
            .put("search", "query", &p, &json!(1), Some(Duration::from_millis(500)))
            .await;

        tokio::time::advance(Duration::from_millis(300)).await;
        let fresh = cache.get("search", "query", &p).await.unwrap();
        assert!(!fresh.is_stale);
        assert!(fresh.cached_at + Duration::from_millis(1) >= before);
        assert!(fresh.cached_at <= SystemTime::now());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(cache.get("search", "query", &p).await.unwrap().is_stale);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(cache.get("search", "query", &p).await.is_none());
    }

    #[tokio::test]
    async fn test_volatile_params_hit_same_entry() {
        let cache = ResultCache::in_memory(&CacheConfig::default());
        cache
            .put("search", "query", &params(json!({"query": "x", "nonce": 1})), &json!("r"), None)
            .await;
        let hit = cache.get("search", "query", &params(json!({"query": "x", "nonce": 2}))).await;
        assert_eq!(hit.unwrap().value, json!("r"));
    }

    #[tokio::test]
    async fn test_invalidate_by_resource_and_operation() {
        let cache = ResultCache::in_memory(&CacheConfig::default());
        let p = params(json!({"id": 1}));
        cache.put("mongodb", "find", &p, &json!(1), None).await;
        cache.put("mongodb", "aggregate", &p, &json!(2), None).await;
        cache.put("postgres", "find", &p, &json!(3), None).await;

        assert_eq!(cache.invalidate("mongodb", Some("find")).await, 1);
        assert!(cache.get("mongodb", "aggregate", &p).await.is_some());
        assert_eq!(cache.invalidate("mongodb", None).await, 1);
        assert!(cache.get("postgres", "find", &p).await.is_some());
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<StoredValue>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn set(&self, _key: &str, _payload: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn delete_prefix(&self, _prefix: &str) -> Result<usize, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_store_faults_degrade_to_miss() {
        let cache = ResultCache::new(Arc::new(BrokenStore), &CacheConfig::default());
        let p = params(json!({"query": "x"}));
        assert!(!cache.put("search", "query", &p, &json!(1), None).await);
        assert!(cache.get("search", "query", &p).await.is_none());
        assert!(matches!(
            cache.try_get("search", "query", &p).await,
            Err(CacheError::Backend(_))
        ));
        assert_eq!(cache.invalidate("search", None).await, 0);
        assert_eq!(cache.stats().errors, 4);
        assert_eq!(cache.stats().misses, 0);
    }
}
