//! Namespaced cache service with TTL and bulk invalidation.
//!
//! Keys live in a flat keyspace `prefix:namespace:key`. Values cross an
//! explicit encode/decode boundary: every call site states the value's
//! static type and the wire format is UTF-8 JSON.
//!
//! ## Error policy
//!
//! Reads and deletes degrade: a missing key, corrupt JSON or a connection
//! error all read as a miss and are logged, never thrown. A cache outage
//! costs latency, not failed requests. Writes and counters propagate errors
//! because their callers need write confirmation.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use redis::AsyncCommands;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tabletap_config::CacheSettings;
use tracing::{debug, warn};

use crate::connection::{RedisConnections, scan_keys};
use crate::error::Result;

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (absent, corrupt or errored reads).
    pub misses: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Redis-backed cache with a namespaced keyspace.
pub struct CacheService {
    connections: Arc<RedisConnections>,
    prefix: String,
    default_ttl_secs: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheService {
    pub fn new(connections: Arc<RedisConnections>, settings: &CacheSettings) -> Self {
        Self {
            connections,
            prefix: settings.prefix.clone(),
            default_ttl_secs: settings.default_ttl_secs,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub(crate) fn build_key(&self, namespace: &str, key: &str) -> String {
        format!("{}{}:{}", self.prefix, namespace, key)
    }

    /// Get a value from the cache.
    ///
    /// Returns `None` for absent keys, corrupt entries and connection
    /// errors alike.
    pub async fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let full_key = self.build_key(namespace, key);
        let mut conn = match self.connections.cache().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(key = %full_key, error = %e, "cache get failed to connect");
                return self.record_miss();
            }
        };
        match conn.get::<_, Option<String>>(&full_key).await {
            Ok(Some(raw)) => match decode(&full_key, &raw) {
                Some(value) => {
                    debug!(key = %full_key, "cache hit");
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some(value)
                }
                None => self.record_miss(),
            },
            Ok(None) => {
                debug!(key = %full_key, "cache miss");
                self.record_miss()
            }
            Err(e) => {
                self.connections.reset_if_readonly(&e).await;
                warn!(key = %full_key, error = %e, "cache get error");
                self.record_miss()
            }
        }
    }

    /// Set a value. `ttl` of `None` uses the configured default; a
    /// non-positive TTL writes without expiry.
    pub async fn set<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Option<i64>,
    ) -> Result<()> {
        let full_key = self.build_key(namespace, key);
        let payload = serde_json::to_string(value)?;
        let ttl = ttl.unwrap_or(self.default_ttl_secs as i64);
        let mut conn = self.connections.cache().await?;
        let result = if ttl > 0 {
            conn.set_ex::<_, _, ()>(&full_key, payload, ttl as u64).await
        } else {
            conn.set::<_, _, ()>(&full_key, payload).await
        };
        if let Err(e) = result {
            self.connections.reset_if_readonly(&e).await;
            return Err(e.into());
        }
        debug!(key = %full_key, ttl, "cache set");
        Ok(())
    }

    /// Batch read with the same per-key miss contract as [`CacheService::get`].
    pub async fn mget<T: DeserializeOwned>(&self, namespace: &str, keys: &[&str]) -> Vec<Option<T>> {
        if keys.is_empty() {
            return Vec::new();
        }
        let full_keys: Vec<String> = keys.iter().map(|k| self.build_key(namespace, k)).collect();
        let all_misses = || {
            self.misses.fetch_add(keys.len() as u64, Ordering::Relaxed);
            keys.iter().map(|_| None).collect::<Vec<Option<T>>>()
        };

        let mut conn = match self.connections.cache().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "cache mget failed to connect");
                return all_misses();
            }
        };
        let raws: Vec<Option<String>> = match redis::cmd("MGET")
            .arg(&full_keys)
            .query_async(&mut conn)
            .await
        {
            Ok(raws) => raws,
            Err(e) => {
                self.connections.reset_if_readonly(&e).await;
                warn!(error = %e, "cache mget error");
                return all_misses();
            }
        };
        // Same per-key hit/miss accounting as single-key get.
        raws.into_iter()
            .zip(full_keys)
            .map(|(raw, full_key)| {
                let value = raw.and_then(|r| decode(&full_key, &r));
                if value.is_some() {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                }
                value
            })
            .collect()
    }

    /// Delete one key. Returns whether a key was removed.
    pub async fn del(&self, namespace: &str, key: &str) -> bool {
        let full_key = self.build_key(namespace, key);
        let mut conn = match self.connections.cache().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(key = %full_key, error = %e, "cache del failed to connect");
                return false;
            }
        };
        match conn.del::<_, u64>(&full_key).await {
            Ok(count) => count > 0,
            Err(e) => {
                self.connections.reset_if_readonly(&e).await;
                warn!(key = %full_key, error = %e, "cache del error");
                false
            }
        }
    }

    /// Delete several keys; returns how many were removed.
    pub async fn mdel(&self, namespace: &str, keys: &[&str]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        let full_keys: Vec<String> = keys.iter().map(|k| self.build_key(namespace, k)).collect();
        let mut conn = match self.connections.cache().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "cache mdel failed to connect");
                return 0;
            }
        };
        match redis::cmd("DEL").arg(&full_keys).query_async::<u64>(&mut conn).await {
            Ok(count) => count,
            Err(e) => {
                self.connections.reset_if_readonly(&e).await;
                warn!(error = %e, "cache mdel error");
                0
            }
        }
    }

    /// Whether a key exists.
    pub async fn exists(&self, namespace: &str, key: &str) -> bool {
        let full_key = self.build_key(namespace, key);
        let mut conn = match self.connections.cache().await {
            Ok(conn) => conn,
            Err(_) => return false,
        };
        match conn.exists::<_, bool>(&full_key).await {
            Ok(exists) => exists,
            Err(e) => {
                self.connections.reset_if_readonly(&e).await;
                warn!(key = %full_key, error = %e, "cache exists error");
                false
            }
        }
    }

    /// Set a key's TTL. Returns whether the key existed.
    pub async fn expire(&self, namespace: &str, key: &str, ttl_secs: i64) -> bool {
        let full_key = self.build_key(namespace, key);
        let mut conn = match self.connections.cache().await {
            Ok(conn) => conn,
            Err(_) => return false,
        };
        match conn.expire::<_, bool>(&full_key, ttl_secs).await {
            Ok(set) => set,
            Err(e) => {
                self.connections.reset_if_readonly(&e).await;
                warn!(key = %full_key, error = %e, "cache expire error");
                false
            }
        }
    }

    /// Remaining TTL in seconds (-1 no expiry, -2 missing), `None` on error.
    pub async fn ttl(&self, namespace: &str, key: &str) -> Option<i64> {
        let full_key = self.build_key(namespace, key);
        let mut conn = self.connections.cache().await.ok()?;
        match conn.ttl::<_, i64>(&full_key).await {
            Ok(ttl) => Some(ttl),
            Err(e) => {
                self.connections.reset_if_readonly(&e).await;
                warn!(key = %full_key, error = %e, "cache ttl error");
                None
            }
        }
    }

    /// Atomically increment a counter by one.
    pub async fn incr(&self, namespace: &str, key: &str) -> Result<i64> {
        self.incr_by(namespace, key, 1).await
    }

    /// Atomically increment a counter. Errors propagate: counter callers
    /// need write confirmation.
    pub async fn incr_by(&self, namespace: &str, key: &str, delta: i64) -> Result<i64> {
        let full_key = self.build_key(namespace, key);
        let mut conn = self.connections.cache().await?;
        match conn.incr::<_, _, i64>(&full_key, delta).await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.connections.reset_if_readonly(&e).await;
                Err(e.into())
            }
        }
    }

    /// Atomically decrement a counter by one.
    pub async fn decr(&self, namespace: &str, key: &str) -> Result<i64> {
        self.incr_by(namespace, key, -1).await
    }

    /// Scan-and-delete every key under the prefix matching `pattern`
    /// (default `*`). Not atomic; coarse invalidation only, never a
    /// correctness-critical path. Returns the number of keys removed.
    pub async fn clear(&self, pattern: Option<&str>) -> u64 {
        let match_pattern = format!("{}{}", self.prefix, pattern.unwrap_or("*"));
        let mut conn = match self.connections.cache().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "cache clear failed to connect");
                return 0;
            }
        };
        let keys = match scan_keys(&mut conn, &match_pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(pattern = %match_pattern, error = %e, "cache clear scan error");
                return 0;
            }
        };
        let mut deleted = 0;
        for chunk in keys.chunks(100) {
            match redis::cmd("DEL").arg(chunk).query_async::<u64>(&mut conn).await {
                Ok(count) => deleted += count,
                Err(e) => {
                    warn!(error = %e, "cache clear delete error");
                    break;
                }
            }
        }
        debug!(pattern = %match_pattern, deleted, "cache cleared");
        deleted
    }

    /// Read-through helper: return the cached value or compute, store and
    /// return it. A failed store is logged, not propagated; the caller
    /// still gets the computed value.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        ttl: Option<i64>,
        init: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get(namespace, key).await {
            return Ok(value);
        }
        let value = init().await?;
        if let Err(e) = self.set(namespace, key, &value, ttl).await {
            warn!(namespace, key, error = %e, "read-through store failed");
        }
        Ok(value)
    }

    /// Hit/miss counters since service creation.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn record_miss<T>(&self) -> Option<T> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("prefix", &self.prefix)
            .field("default_ttl_secs", &self.default_ttl_secs)
            .finish()
    }
}

/// Deserialize a cached payload; corrupt entries read as a miss.
fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key = %key, error = %e, "corrupt cache entry treated as miss");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabletap_config::Settings;

    fn service() -> CacheService {
        let settings = Settings::default();
        CacheService::new(
            Arc::new(RedisConnections::new(settings.redis)),
            &settings.cache,
        )
    }

    #[test]
    fn test_key_layout() {
        let cache = service();
        assert_eq!(cache.build_key("menu", "cafe-1:items"), "tabletap:cache:menu:cafe-1:items");
    }

    #[test]
    fn test_namespaces_never_collide() {
        let cache = service();
        assert_ne!(cache.build_key("a", "k"), cache.build_key("b", "k"));
    }

    #[test]
    fn test_decode_corrupt_json_is_miss() {
        assert!(decode::<serde_json::Value>("k", "{broken").is_none());
        assert!(decode::<Vec<String>>("k", "42").is_none());
    }

    #[test]
    fn test_decode_valid_json() {
        let value: Vec<i64> = decode("k", "[1,2,3]").unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }

    #[test]
    fn test_stats_hit_rate() {
        let stats = CacheStats { hits: 3, misses: 1 };
        assert_eq!(stats.hit_rate(), 75.0);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_mget_empty_keys_is_empty() {
        let cache = service();
        let values: Vec<Option<serde_json::Value>> = cache.mget("menu", &[]).await;
        assert!(values.is_empty());
        // Nothing was read, so nothing was counted.
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.stats().misses, 0);
    }
}
