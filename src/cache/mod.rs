//! 通用缓存模块：带 TTL 与容量上限的内存缓存及缓存键生成。
//!
//! # Caching Module
//!
//! A reusable bounded cache with hit/miss metrics, plus deterministic key
//! generation for anything that needs to be memoized by a set of components.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TtlCache`] | Concurrent TTL cache with insertion-time eviction |
//! | [`CacheConfig`] | Size bound and TTL |
//! | [`CacheMetrics`] | Hits, misses, sets, evictions and hit rate |
//! | [`CacheKeyGenerator`] | SHA-256 keys over canonical JSON components |
//!
//! ## Example
//!
//! ```rust
//! use ai_orchestra::cache::{CacheConfig, TtlCache};
//! use std::time::Duration;
//!
//! let cache: TtlCache<String, u64> = TtlCache::new(
//!     "analytics",
//!     CacheConfig::new().with_max_size(500).with_ttl(Duration::from_secs(60)),
//! );
//! cache.set("user-1:week".to_string(), 42);
//! assert_eq!(cache.get(&"user-1:week".to_string()), Some(42));
//! assert_eq!(cache.metrics().hits, 1);
//! ```
//!
//! Eviction under size pressure removes the entry inserted longest ago, not the
//! least recently read one. A key that is read constantly but was inserted
//! early can therefore be evicted before a cold, newer key.

mod key;
mod ttl;

pub use key::{CacheKey, CacheKeyGenerator};
pub use ttl::{CacheConfig, CacheEntry, CacheMetrics, TtlCache};
