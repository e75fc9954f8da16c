use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CACHE_STALE_WINDOW_SECS;

// ---------------------------------------------------------------------------
// Cache keys
// ---------------------------------------------------------------------------

/// Deterministic fingerprint of (provider, request parameters). Parameters
/// are caller-normalized strings, so equal requests always collide and the
/// key is stable across processes.
pub fn fingerprint(provider: &str, params: &[&str]) -> String {
    let mut key = String::with_capacity(32);
    key.push_str(provider);
    for p in params {
        key.push(':');
        key.push_str(p);
    }
    key
}

// ---------------------------------------------------------------------------
// Tier 1: optional shared backend
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("shared cache error: {0}")]
    Backend(String),
}

/// Shared cache tier. Implementations must expire entries server-side; the
/// wrapper never trusts tier 1 for stale reads.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
}

#[cfg(feature = "redis-cache")]
pub mod redis_cache {
    use super::{CacheError, SharedCache};
    use async_trait::async_trait;
    use redis::AsyncCommands;
    use std::time::Duration;

    pub struct RedisCache {
        conn: redis::aio::MultiplexedConnection,
    }

    impl RedisCache {
        pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
            let client = redis::Client::open(redis_url)
                .map_err(|e| CacheError::Backend(e.to_string()))?;
            let conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;
            Ok(Self { conn })
        }
    }

    #[async_trait]
    impl SharedCache for RedisCache {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            let value: Option<String> = self
                .conn
                .clone()
                .get(key)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;
            Ok(value)
        }

        async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
            let _: () = self
                .conn
                .clone()
                .set_ex(key, value, ttl.as_secs().max(1))
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Tiered cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

/// Read-through cache: shared tier first, then the in-process tier, then the
/// provider. Tier unavailability is logged and degraded around, never
/// surfaced. The in-process tier keeps expired entries for a bounded stale
/// window so an open circuit breaker can still serve last-known values.
pub struct TieredCache {
    shared: Option<Box<dyn SharedCache>>,
    local: DashMap<String, CacheEntry>,
    stale_window: Duration,
}

impl TieredCache {
    pub fn new(shared: Option<Box<dyn SharedCache>>) -> Self {
        Self {
            shared,
            local: DashMap::new(),
            stale_window: Duration::from_secs(CACHE_STALE_WINDOW_SECS),
        }
    }

    #[cfg(test)]
    fn with_stale_window(shared: Option<Box<dyn SharedCache>>, stale_window: Duration) -> Self {
        Self {
            shared,
            local: DashMap::new(),
            stale_window,
        }
    }

    /// A value still within its TTL, checking tier 1 then tier 2.
    pub async fn get_fresh(&self, key: &str) -> Option<serde_json::Value> {
        if let Some(shared) = &self.shared {
            match shared.get(key).await {
                Ok(Some(raw)) => match serde_json::from_str(&raw) {
                    Ok(value) => {
                        debug!(key, tier = 1, "cache hit");
                        return Some(value);
                    }
                    Err(e) => warn!(key, error = %e, "shared cache entry was not valid JSON"),
                },
                Ok(None) => {}
                Err(e) => warn!(key, error = %e, "shared cache read failed, using local tier"),
            }
        }
        let entry = self.local.get(key)?;
        if entry.is_fresh() {
            debug!(key, tier = 2, "cache hit");
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// The most recent value regardless of TTL, within the stale window.
    /// Used only when the breaker refuses live calls.
    pub fn get_stale(&self, key: &str) -> Option<serde_json::Value> {
        let entry = self.local.get(key)?;
        if entry.stored_at.elapsed() < self.stale_window {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Populate both tiers. Shared-tier failures degrade to local-only.
    pub async fn put(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        if let Some(shared) = &self.shared {
            match serde_json::to_string(&value) {
                Ok(raw) => {
                    if let Err(e) = shared.set(key, &raw, ttl).await {
                        warn!(key, error = %e, "shared cache write failed");
                    }
                }
                Err(e) => warn!(key, error = %e, "cache value not serializable"),
            }
        }
        self.local.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Drop local entries past the stale window. Runs from a periodic sweep
    /// task; correctness never depends on it.
    pub fn evict_stale(&self) -> usize {
        let before = self.local.len();
        self.local
            .retain(|_, entry| entry.stored_at.elapsed() < self.stale_window);
        before - self.local.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fresh_roundtrip_via_local_tier() {
        let cache = TieredCache::new(None);
        let key = fingerprint("market-data", &["events", "fed-cut"]);
        cache.put(&key, json!({"n": 1}), Duration::from_secs(60)).await;
        assert_eq!(cache.get_fresh(&key).await, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn expired_entry_is_invisible_to_fresh_reads_but_stale_readable() {
        let cache = TieredCache::new(None);
        let key = fingerprint("news", &["q"]);
        cache.put(&key, json!("old"), Duration::from_millis(0)).await;

        assert_eq!(cache.get_fresh(&key).await, None, "ttl elapsed");
        assert_eq!(cache.get_stale(&key), Some(json!("old")), "stale window holds it");
    }

    #[tokio::test]
    async fn stale_window_bounds_fallback_reads() {
        let cache = TieredCache::with_stale_window(None, Duration::from_millis(0));
        let key = fingerprint("news", &["q"]);
        cache.put(&key, json!("old"), Duration::from_millis(0)).await;
        assert_eq!(cache.get_stale(&key), None);
        assert_eq!(cache.evict_stale(), 1);
    }

    #[test]
    fn fingerprints_are_deterministic_and_distinct() {
        let a = fingerprint("news", &["fed rates", "8"]);
        let b = fingerprint("news", &["fed rates", "8"]);
        let c = fingerprint("news", &["fed rates", "9"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, fingerprint("model", &["fed rates", "8"]));
    }

    struct FailingShared;

    #[async_trait]
    impl SharedCache for FailingShared {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("down".to_string()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".to_string()))
        }
    }

    #[tokio::test]
    async fn shared_tier_failure_degrades_to_local() {
        let cache = TieredCache::new(Some(Box::new(FailingShared)));
        let key = fingerprint("market-data", &["slug"]);
        cache.put(&key, json!(42), Duration::from_secs(30)).await;
        assert_eq!(cache.get_fresh(&key).await, Some(json!(42)));
    }
}
