//! TTL-capable key/value stores backing the result cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

/// Faults raised by a cache store. Always non-fatal to callers.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// A value read back from a store together with its remaining lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub payload: Vec<u8>,
    pub ttl_remaining: Duration,
}

/// Key-addressed store with per-key expiry.
///
/// Expired keys must read as absent. Implementations are shared between
/// concurrent callers and must not require external locking.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, CacheError>;

    async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Delete every key starting with `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    payload: Vec<u8>,
    expires_at: Instant,
}

/// In-process store. Expired entries are dropped lazily on read or by
/// [`MemoryStore::purge_expired`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.len();
        self.inner.retain(|_, entry| entry.expires_at > now);
        before - self.inner.len()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, CacheError> {
        let now = Instant::now();
        let found = self.inner.get(key).map(|r| r.value().clone());
        match found {
            Some(entry) if entry.expires_at > now => Ok(Some(StoredValue {
                payload: entry.payload,
                ttl_remaining: entry.expires_at - now,
            })),
            Some(_) => {
                self.inner.remove_if(key, |_, e| e.expires_at <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.inner.insert(
            key.to_string(),
            MemoryEntry {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let before = self.inner.len();
        self.inner.retain(|k, _| !k.starts_with(prefix));
        Ok(before - self.inner.len())
    }
}
