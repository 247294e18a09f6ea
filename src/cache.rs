//! Response caching with TTL for upstream recipe API results
//!
//! Entries are keyed by a digest of the fully resolved upstream URL, so every
//! distinct upstream request gets its own slot. Expiry is lazy on read; a
//! background sweep (see [`ResponseCache::evict_expired`]) reclaims memory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use url::Url;

/// Thread-safe response cache with TTL expiry
pub struct ResponseCache {
    /// Cache entries keyed by `host/path:url_hash`
    entries: DashMap<String, CachedResponse>,
    /// Maximum number of entries, `0` means unbounded
    max_entries: usize,
    /// Cache statistics
    stats: CacheStats,
}

/// A cached response with its absolute expiry
struct CachedResponse {
    /// The cached JSON value
    value: Value,
    /// First instant at which the entry is no longer served
    expires_at: Instant,
}

impl CachedResponse {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache statistics tracked atomically
#[derive(Debug)]
pub struct CacheStats {
    /// Total cache hits (entries served from cache)
    pub hits: AtomicU64,
    /// Total cache misses (entries not found or expired)
    pub misses: AtomicU64,
    /// Total evictions (expired or displaced entries removed)
    pub evictions: AtomicU64,
}

impl CacheStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get current cache hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get current cache miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get current eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0-1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl ResponseCache {
    /// Create an unbounded cache
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a cache holding at most `max_entries` entries (`0` = unbounded)
    #[must_use]
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            stats: CacheStats::new(),
        }
    }

    /// Get a cached response if it exists and hasn't expired
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            drop(entry);
            // A concurrent set may have replaced the entry in between
            if self
                .entries
                .remove_if(key, |_, e| e.is_expired(now))
                .is_some()
            {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value with the given TTL, replacing any existing entry
    ///
    /// A zero TTL, or one too large to represent as an instant, stores
    /// nothing. Returns whether the value was stored.
    pub fn set(&self, key: &str, value: Value, ttl: Duration) -> bool {
        if ttl.is_zero() {
            return false;
        }
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            return false;
        };

        if self.max_entries > 0
            && self.entries.len() >= self.max_entries
            && !self.entries.contains_key(key)
        {
            self.make_room();
        }

        let entry = CachedResponse { value, expires_at };
        self.entries.insert(key.to_string(), entry);
        true
    }

    /// Free at least one slot: expired entries first, then the one closest to expiry
    fn make_room(&self) {
        self.evict_expired();
        if self.entries.len() < self.max_entries {
            return;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            if self.entries.remove(&key).is_some() {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Remove every expired entry, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0usize;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            self.stats
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Number of stored entries, expired ones included until swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            evictions: self.stats.evictions(),
            size: self.entries.len(),
            hit_rate: self.stats.hit_rate(),
        }
    }

    /// Build a cache key from a fully resolved upstream URL
    ///
    /// The key format is `{host}{path}:{hash}` where `hash` is the SHA-256
    /// hex digest of the whole URL. With `canonical` set, query pairs are
    /// sorted before hashing so parameter order does not split entries.
    /// The API key is part of the hashed URL, so a key rotation starts from
    /// an empty cache; it never appears in the key in clear text.
    #[must_use]
    pub fn build_key(url: &Url, canonical: bool) -> String {
        let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        if canonical {
            pairs.sort();
        }

        let mut hasher = Sha256::new();
        hasher.update(url.scheme().as_bytes());
        hasher.update(b"://");
        hasher.update(url.host_str().unwrap_or_default().as_bytes());
        if let Some(port) = url.port() {
            hasher.update(port.to_string().as_bytes());
        }
        hasher.update(url.path().as_bytes());
        for (name, value) in &pairs {
            hasher.update(b"&");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }

        format!(
            "{}{}:{}",
            url.host_str().unwrap_or_default(),
            url.path(),
            hex::encode(hasher.finalize())
        )
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Total evictions
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::time::advance;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_cache_hit() {
        let cache = ResponseCache::new();
        let value = json!({"results": [{"id": 1}]});

        assert!(cache.set("key", value.clone(), Duration::from_secs(60)));
        assert_eq!(cache.get("key"), Some(value));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_cache_miss() {
        let cache = ResponseCache::new();
        assert_eq!(cache.get("nonexistent"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expiry() {
        let cache = ResponseCache::new();
        cache.set("key", json!(1), Duration::from_secs(300));

        advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get("key"), Some(json!(1)));

        advance(Duration::from_secs(1)).await;
        // now == expires_at counts as expired
        assert_eq!(cache.get("key"), None);
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_is_not_stored() {
        let cache = ResponseCache::new();
        assert!(!cache.set("key", json!(1), Duration::ZERO));
        assert_eq!(cache.get("key"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_unrepresentable_ttl_is_not_stored() {
        let cache = ResponseCache::new();
        assert!(!cache.set("key", json!(1), Duration::from_secs(u64::MAX)));
        assert_eq!(cache.len(), 0);

        assert!(cache.set("key", json!(2), Duration::from_secs(60)));
        assert_eq!(cache.get("key"), Some(json!(2)));
    }

    #[test]
    fn test_last_write_wins() {
        let cache = ResponseCache::new();
        cache.set("key", json!("first"), Duration::from_secs(60));
        cache.set("key", json!("second"), Duration::from_secs(60));
        assert_eq!(cache.get("key"), Some(json!("second")));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_resets_expiry() {
        let cache = ResponseCache::new();
        cache.set("key", json!("old"), Duration::from_secs(10));
        advance(Duration::from_secs(8)).await;
        cache.set("key", json!("new"), Duration::from_secs(10));
        advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get("key"), Some(json!("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired() {
        let cache = ResponseCache::new();
        cache.set("short", json!(1), Duration::from_secs(1));
        cache.set("long", json!(2), Duration::from_secs(60));

        advance(Duration::from_secs(5)).await;

        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.stats().size, 1);
        assert_eq!(cache.get("long"), Some(json!(2)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_prefers_expired_victims() {
        let cache = ResponseCache::with_capacity(2);
        cache.set("stale", json!(1), Duration::from_secs(1));
        cache.set("fresh", json!(2), Duration::from_secs(60));
        advance(Duration::from_secs(2)).await;

        cache.set("new", json!(3), Duration::from_secs(60));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("fresh"), Some(json!(2)));
        assert_eq!(cache.get("new"), Some(json!(3)));
    }

    #[test]
    fn test_capacity_evicts_soonest_to_expire() {
        let cache = ResponseCache::with_capacity(2);
        cache.set("a", json!(1), Duration::from_secs(10));
        cache.set("b", json!(2), Duration::from_secs(600));
        cache.set("c", json!(3), Duration::from_secs(600));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(json!(2)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_capacity_overwrite_does_not_evict() {
        let cache = ResponseCache::with_capacity(1);
        cache.set("a", json!(1), Duration::from_secs(60));
        cache.set("a", json!(2), Duration::from_secs(60));
        assert_eq!(cache.get("a"), Some(json!(2)));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_hit_rate() {
        let cache = ResponseCache::new();
        cache.set("key1", json!(1), Duration::from_secs(60));
        cache.set("key2", json!(2), Duration::from_secs(60));

        cache.get("key1");
        cache.get("key2");
        cache.get("key3");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_build_key_format() {
        let key = ResponseCache::build_key(
            &url("https://api.example.com/recipes/complexSearch?apiKey=secret&query=pasta"),
            false,
        );

        let (prefix, hash) = key.rsplit_once(':').unwrap();
        assert_eq!(prefix, "api.example.com/recipes/complexSearch");
        assert_eq!(hash.len(), 64);
        assert!(!key.contains("secret"));
    }

    #[test]
    fn test_build_key_order_sensitivity() {
        let a = url("https://api.example.com/r?apiKey=k&query=pasta&diet=vegan");
        let b = url("https://api.example.com/r?apiKey=k&diet=vegan&query=pasta");

        assert_ne!(
            ResponseCache::build_key(&a, false),
            ResponseCache::build_key(&b, false)
        );
        assert_eq!(
            ResponseCache::build_key(&a, true),
            ResponseCache::build_key(&b, true)
        );
    }

    #[test]
    fn test_build_key_includes_api_key() {
        let a = url("https://api.example.com/r?apiKey=old&query=pasta");
        let b = url("https://api.example.com/r?apiKey=new&query=pasta");
        assert_ne!(
            ResponseCache::build_key(&a, true),
            ResponseCache::build_key(&b, true)
        );
    }

    #[test]
    fn test_concurrent_sets_keep_one_entry() {
        let cache = std::sync::Arc::new(ResponseCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = std::sync::Arc::clone(&cache);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        cache.set("shared", json!(i), Duration::from_secs(60));
                        let _ = cache.get("shared");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 1);
        assert!(cache.get("shared").is_some());
    }
}
