//! Expiring key/value cache backed by `DashMap`.
//!
//! Entries carry an absolute expiry instant. Expired entries are evicted
//! lazily on read, or in bulk by [`TtlCache::cleanup_expired`], which the
//! background sweeper and the `/cache/cleanup` endpoint call.
//!
//! Every removal bumps a generation counter. A reader that misses, loads
//! from the source of truth and then fills the cache passes the generation
//! it saw before loading to [`TtlCache::insert_if_current`], so a fill that
//! raced with an invalidation is dropped instead of resurrecting old data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::metrics;

/// Point-in-time snapshot of a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries currently held, expired or not.
    #[serde(rename = "total_items")]
    pub total: usize,
    /// Entries past their expiry that have not been evicted yet.
    #[serde(rename = "expired_items")]
    pub expired: usize,
    #[serde(rename = "active_items")]
    pub active: usize,
    #[serde(rename = "hit_count")]
    pub hits: u64,
    #[serde(rename = "miss_count")]
    pub misses: u64,
    /// Entries removed because their TTL elapsed.
    pub evictions: u64,
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

/// Cached entry with expiration time.
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Thread-safe cache whose entries expire after a TTL.
pub struct TtlCache<V> {
    name: &'static str,
    entries: DashMap<String, CacheEntry<V>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    generation: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache. `name` labels its Prometheus series.
    ///
    /// ```
    /// use std::time::Duration;
    /// use affiliate_server::cache::TtlCache;
    ///
    /// let cache: TtlCache<u32> = TtlCache::new("example", Duration::from_secs(60));
    /// cache.insert("answer", 42);
    /// assert_eq!(cache.get("answer"), Some(42));
    /// ```
    pub fn new(name: &'static str, default_ttl: Duration) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the value if present and not expired. An expired entry is
    /// evicted on the spot.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_hit(self.name);
                return Some(entry.value.clone());
            }
            // Entry expired, remove it
            drop(entry);
            if self
                .entries
                .remove_if(key, |_, e| e.is_expired(now))
                .is_some()
            {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_miss(self.name);
        None
    }

    /// Insert with the cache's default TTL, replacing any existing entry.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.into(), entry);
    }

    /// Current invalidation generation. Read it before loading the value
    /// that will be handed to [`TtlCache::insert_if_current`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Inserts only if nothing was removed since `generation` was read.
    ///
    /// The check runs while the entry's shard is locked, so it cannot
    /// interleave with a concurrent [`TtlCache::remove`] of the same key.
    pub fn insert_if_current(&self, key: impl Into<String>, value: V, generation: u64) -> bool {
        let entry = self.entries.entry(key.into());
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(cache = self.name, "Skipped stale cache fill");
            return false;
        }
        entry.insert(CacheEntry {
            value,
            expires_at: Instant::now() + self.default_ttl,
        });
        true
    }

    /// Returns whether an entry was removed.
    pub fn remove(&self, key: &str) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(key).is_some()
    }

    /// Removes every entry and returns how many there were.
    pub fn clear(&self) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut removed = 0;
        self.entries.retain(|_, _| {
            removed += 1;
            false
        });
        tracing::debug!(cache = self.name, removed, "Cache cleared");
        removed
    }

    /// Clean up expired entries.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        metrics::set_cache_entries(self.name, self.entries.len());

        removed
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let mut total = 0;
        let mut expired = 0;
        for entry in self.entries.iter() {
            total += 1;
            if entry.is_expired(now) {
                expired += 1;
            }
        }
        CacheStats {
            total,
            expired,
            active: total - expired,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        cache.insert("k", "v".to_string());

        assert_eq!(cache.get("k").as_deref(), Some("v"));

        let stats = cache.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_cache_miss() {
        let cache: TtlCache<u32> = TtlCache::new("test", Duration::from_secs(60));

        assert!(cache.get("nonexistent").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_insert_overwrites() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        cache.insert("k", 1);
        cache.insert("k", 2);
        assert_eq!(cache.get("k"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        cache.insert("k", 1);

        assert!(cache.remove("k"));
        assert!(!cache.remove("k"));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn fill_after_invalidation_is_dropped() {
        let cache = TtlCache::new("test", Duration::from_secs(60));

        // Reader loads the old value, then a writer invalidates.
        let seen = cache.generation();
        cache.remove("k");

        assert!(!cache.insert_if_current("k", "old", seen));
        assert!(cache.get("k").is_none());

        let seen = cache.generation();
        assert!(cache.insert_if_current("k", "new", seen));
        assert_eq!(cache.get("k"), Some("new"));
    }

    #[test]
    fn clear_invalidates_pending_fills() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        let seen = cache.generation();
        cache.clear();

        assert!(!cache.insert_if_current("k", 1, seen));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_expiration() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        cache.insert_with_ttl("k", 1, Duration::from_millis(10));
        assert_eq!(cache.get("k"), Some(1));

        // Wait for expiration
        tokio::time::sleep(Duration::from_millis(30)).await;

        let stats = cache.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.active, 0);

        // Should return None and evict
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.stats().total, 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        cache.insert_with_ttl("short-1", 1, Duration::from_millis(10));
        cache.insert_with_ttl("short-2", 2, Duration::from_millis(10));
        cache.insert("long", 3);

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.cleanup_expired(), 0);
        assert_eq!(cache.get("long"), Some(3));
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn test_clear() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        for i in 0..5 {
            cache.insert(format!("k-{i}"), i);
        }

        assert_eq!(cache.clear(), 5);
        assert!(cache.is_empty());
        assert_eq!(cache.clear(), 0);
    }

    #[test]
    fn stats_serialize_with_item_counts() {
        let stats = CacheStats {
            total: 3,
            expired: 1,
            active: 2,
            hits: 4,
            misses: 5,
            evictions: 6,
        };
        assert_eq!(
            serde_json::to_value(stats).unwrap(),
            serde_json::json!({
                "total_items": 3,
                "expired_items": 1,
                "active_items": 2,
                "hit_count": 4,
                "miss_count": 5,
                "evictions": 6
            })
        );
    }
}
