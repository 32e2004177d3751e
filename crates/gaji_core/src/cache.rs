//! Key/value cache with per-entry expiry
//!
//! Built prompts and built contexts are cached as JSON strings. The cache is an
//! optimization only: every failure is logged and treated as a miss, never
//! surfaced to the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};

use crate::utils::ErrorChain;
use crate::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
}

/// String key/value store with TTL support
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration)
    -> Result<(), CacheError>;
}

/// Entries kept before least-recently-used eviction kicks in
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    ttl: Duration,
}

/// Expires each entry after the TTL it was written with
struct EntryTtl;

impl Expiry<String, CacheEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-process cache with per-entry expiry and a bounded entry count
///
/// Expired entries are evicted by moka's housekeeping whether or not their key
/// is read again.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(max_entries: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(EntryTtl)
                .build(),
        }
    }

    /// Live entry count as of the last housekeeping pass
    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply pending evictions now instead of on moka's own schedule
    pub async fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks().await;
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.get(key).await.map(|entry| entry.value))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), CacheEntry { value, ttl })
            .await;
        Ok(())
    }
}

/// Key for a built context
pub fn context_key(conversation_id: &str) -> String {
    format!("context:{}", conversation_id)
}

/// Key for an adapted prompt, tied to the exact base prompt it was built from
pub fn prompt_key(scenario_id: &str, base_prompt: &str) -> String {
    let digest = Sha256::digest(base_prompt.as_bytes());
    let fingerprint: String = digest
        .iter()
        .take(8)
        .map(|byte| format!("{:02x}", byte))
        .collect();
    format!("prompt:{}:{}", scenario_id, fingerprint)
}

/// JSON-encode a value for caching
pub fn encode<T: Serialize>(data_type: &str, value: &T) -> crate::Result<String> {
    serde_json::to_string(value).map_err(|cause| CoreError::SerializationError {
        data_type: data_type.to_string(),
        cause,
    })
}

/// Typed view over a [`CacheStore`] that swallows failures
#[derive(Debug, Clone)]
pub struct JsonCache {
    store: Arc<dyn CacheStore>,
    op_timeout: Duration,
}

impl JsonCache {
    pub fn new(store: Arc<dyn CacheStore>, op_timeout: Duration) -> Self {
        Self { store, op_timeout }
    }

    /// Look up and decode a value. Misses, backend errors, timeouts and
    /// undecodable payloads all come back as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match tokio::time::timeout(self.op_timeout, self.store.get(key)).await {
            Ok(Ok(raw)) => raw?,
            Ok(Err(e)) => {
                tracing::warn!(key, error = %ErrorChain(&e), "cache read failed");
                return None;
            }
            Err(_) => {
                let e = CacheError::Timeout(self.op_timeout);
                tracing::warn!(key, error = %e, "cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding undecodable cache entry");
                None
            }
        }
    }

    /// Encode and store a value. Failures are logged and dropped.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match encode(std::any::type_name::<T>(), value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %ErrorChain(&e), "could not encode cache entry");
                return;
            }
        };

        match tokio::time::timeout(self.op_timeout, self.store.set_with_ttl(key, raw, ttl)).await {
            Ok(Ok(())) => tracing::debug!(key, ttl_secs = ttl.as_secs(), "cached"),
            Ok(Err(e)) => tracing::warn!(key, error = %ErrorChain(&e), "cache write failed"),
            Err(_) => tracing::warn!(key, timeout = ?self.op_timeout, "cache write timed out"),
        }
    }
}
