//! Bounded in-memory cache with TTL expiry and insertion-time eviction.

use crate::Result;
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Removal counts at or above this are logged as a burst.
const EVICTION_BURST: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// One cached computation result.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    /// Insertion (or last explicit `set`) time.
    pub timestamp: Instant,
    pub hits: u64,
    /// Tie-breaker for entries inserted at the same instant.
    seq: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub size: usize,
}

#[derive(Debug, Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
}

/// Generic TTL cache.
///
/// - `get` on an entry older than `ttl` removes it and counts a miss plus an eviction
/// - `set` of a new key at capacity evicts the entry with the oldest insertion
///   time; reads never refresh an entry's age
/// - Operations on one key are atomic; different keys do not contend on a
///   global lock
pub struct TtlCache<K, V> {
    name: String,
    config: CacheConfig,
    entries: DashMap<K, CacheEntry<V>>,
    seq: AtomicU64,
    stats: AtomicStats,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        Self {
            name: name.into(),
            config,
            entries: DashMap::new(),
            seq: AtomicU64::new(0),
            stats: AtomicStats::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.timestamp) > self.config.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(mut entry) => {
                if !self.is_expired(&entry, now) {
                    entry.hits += 1;
                    let value = entry.value.clone();
                    drop(entry);
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(value);
                }
            }
        }
        if self
            .entries
            .remove_if(key, |_, e| self.is_expired(e, now))
            .is_some()
        {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or overwrite. Overwriting resets the entry's age and hit count.
    pub fn set(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            timestamp: Instant::now(),
            hits: 0,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        let is_new = self.entries.insert(key, entry).is_none();
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        if is_new {
            self.evict_to_capacity();
        }
    }

    /// Evict oldest-inserted entries until the size bound holds again.
    fn evict_to_capacity(&self) {
        let mut evicted = 0usize;
        while self.entries.len() > self.config.max_size {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| (e.timestamp, e.seq))
                .map(|e| (e.key().clone(), e.seq));
            let Some((key, seq)) = oldest else { break };
            // Skip if the slot was overwritten meanwhile; the loop re-scans.
            if self.entries.remove_if(&key, |_, e| e.seq == seq).is_some() {
                evicted += 1;
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(cache = self.name.as_str(), key = ?key, "evicted oldest entry");
            }
        }
        if evicted >= EVICTION_BURST {
            info!(cache = self.name.as_str(), evicted, "cache eviction burst");
        }
    }

    /// Return the cached value, or compute, store and return it.
    pub async fn get_or_insert_with<F, Fut>(&self, key: K, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(v) = self.get(&key) {
            return Ok(v);
        }
        let value = compute().await?;
        self.set(key, value.clone());
        Ok(value)
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry whose key matches `pred`. Returns how many were removed.
    pub fn invalidate_where(&self, pred: impl Fn(&K) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| !pred(k));
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !self.is_expired(e, now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.stats
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
            if removed >= EVICTION_BURST {
                info!(cache = self.name.as_str(), removed, "cache eviction burst");
            } else {
                debug!(cache = self.name.as_str(), removed, "purged expired entries");
            }
        }
        removed
    }

    /// Presence check that neither counts as a hit nor a miss.
    pub fn contains(&self, key: &K) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .map(|e| !self.is_expired(&e, now))
            .unwrap_or(false)
    }

    /// Hit count of a live entry.
    pub fn entry_hits(&self, key: &K) -> Option<u64> {
        self.entries.get(key).map(|e| e.hits)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metrics(&self) -> CacheMetrics {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheMetrics {
            hits,
            misses,
            sets: self.stats.sets.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            size: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn cache(max: usize, ttl_secs: u64) -> TtlCache<String, u32> {
        TtlCache::new(
            "test",
            CacheConfig::new()
                .with_max_size(max)
                .with_ttl(Duration::from_secs(ttl_secs)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_and_expiry() {
        let c = cache(10, 60);
        c.set("a".into(), 1);
        assert_eq!(c.get(&"a".into()), Some(1));
        assert_eq!(c.entry_hits(&"a".into()), Some(1));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(c.get(&"a".into()), None);
        assert!(c.is_empty());

        let m = c.metrics();
        assert_eq!((m.hits, m.misses, m.sets, m.evictions), (1, 1, 1, 1));
        assert!((m.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_at_exact_ttl_is_live() {
        let c = cache(10, 60);
        c.set("a".into(), 1);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(c.get(&"a".into()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicts_oldest_insertion() {
        let c = cache(3, 600);
        for (i, k) in ["a", "b", "c"].iter().enumerate() {
            c.set(k.to_string(), i as u32);
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        // reads do not protect "a": eviction is by insertion time
        assert_eq!(c.get(&"a".into()), Some(0));
        c.set("d".into(), 3);
        assert_eq!(c.len(), 3);
        assert!(!c.contains(&"a".into()));
        assert!(c.contains(&"b".into()));
        assert!(c.contains(&"d".into()));
        assert_eq!(c.metrics().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_instant_uses_insertion_order() {
        let c = cache(2, 600);
        c.set("x".into(), 1);
        c.set("y".into(), 2);
        c.set("z".into(), 3);
        assert!(!c.contains(&"x".into()));
        assert!(c.contains(&"y".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_does_not_evict() {
        let c = cache(2, 600);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        c.set("a".into(), 10);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(&"a".into()), Some(10));
        assert_eq!(c.metrics().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_and_invalidate() {
        let c = cache(100, 10);
        for i in 0..20u32 {
            c.set(format!("k{i}"), i);
        }
        assert!(c.invalidate(&"k0".into()));
        assert_eq!(c.invalidate_where(|k| k.starts_with("k1")), 11);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(c.purge_expired(), 8);
        c.set("fresh".into(), 1);
        c.clear();
        assert!(c.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_or_insert_with() {
        let c = cache(10, 60);
        let v = c
            .get_or_insert_with("k".into(), || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(v, 7);
        let v = c
            .get_or_insert_with("k".into(), || async { Ok(99) })
            .await
            .unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sets_stay_bounded() {
        let c = Arc::new(cache(50, 600));
        let mut handles = Vec::new();
        for t in 0..4u32 {
            let c = c.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..200u32 {
                    c.set(format!("{t}-{i}"), i);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(c.len() <= 50);
        assert_eq!(c.metrics().sets, 800);
    }
}
