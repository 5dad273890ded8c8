//! Model resolution with a TTL-bound handle cache.

use super::handle::{HandleFactory, ModelHandle, ModelSpec};
use crate::cache::{CacheKey, CacheKeyGenerator};
use crate::resilience::classifier::classify;
use crate::resilience::fallback::now_ms;
use crate::{Error, Result};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    pub ttl: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
        }
    }
}

impl ResolverConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolverMetrics {
    pub cached: usize,
    pub hits: u64,
    pub misses: u64,
    pub builds: u64,
    pub build_failures: u64,
}

struct Slot<B> {
    handle: Arc<ModelHandle<B>>,
    expires_at: Instant,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
    build_failures: AtomicU64,
}

/// Resolves `(provider, model, context, settings)` to a shared [`ModelHandle`].
///
/// Concurrent misses on the same key serialize on a per-key async lock and
/// re-check the cache after acquiring it, so a handle is normally built once.
/// Misses on different keys never wait on each other. A key's lock leaves the
/// table as soon as no caller holds or awaits it.
pub struct ModelResolver<F: HandleFactory> {
    factory: F,
    config: ResolverConfig,
    keys: CacheKeyGenerator,
    entries: DashMap<CacheKey, Slot<F::Binding>>,
    build_locks: DashMap<CacheKey, Arc<Mutex<()>>>,
    counters: Counters,
}

impl<F: HandleFactory> ModelResolver<F> {
    pub fn new(factory: F, config: ResolverConfig) -> Self {
        Self {
            factory,
            config,
            keys: CacheKeyGenerator::new(),
            entries: DashMap::new(),
            build_locks: DashMap::new(),
            counters: Counters::default(),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn key_for(&self, spec: &ModelSpec) -> CacheKey {
        self.keys
            .for_model(&spec.provider, &spec.model, &spec.context, &spec.settings)
    }

    /// Shorthand for resolving a spec without extra settings.
    pub async fn resolve_model(
        &self,
        provider: &str,
        model: &str,
        context: &str,
    ) -> Result<Arc<ModelHandle<F::Binding>>> {
        self.resolve(&ModelSpec::new(provider, model, context)).await
    }

    pub async fn resolve(&self, spec: &ModelSpec) -> Result<Arc<ModelHandle<F::Binding>>> {
        let key = self.key_for(spec);
        if let Some(handle) = self.lookup(&key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(handle);
        }

        let lock = self
            .build_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let resolved = {
            let _guard = lock.lock().await;
            self.resolve_locked(spec, &key).await
        };
        drop(lock);
        // Only the table's own reference left: nobody is waiting on this key.
        self.build_locks.remove_if(&key, |_, l| Arc::strong_count(l) == 1);
        resolved
    }

    /// Recheck and build while holding the key's build lock.
    async fn resolve_locked(
        &self,
        spec: &ModelSpec,
        key: &CacheKey,
    ) -> Result<Arc<ModelHandle<F::Binding>>> {
        // Another caller may have finished building while we waited.
        if let Some(handle) = self.lookup(key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(handle);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let binding = match self.factory.build(spec).await {
            Ok(b) => b,
            Err(err) => {
                self.counters.build_failures.fetch_add(1, Ordering::Relaxed);
                let kind = classify(&err).kind;
                warn!(
                    provider = spec.provider.as_str(),
                    model = spec.model.as_str(),
                    error_kind = kind.name(),
                    error = %err,
                    "model handle construction failed"
                );
                return Err(Error::ModelResolution {
                    provider: spec.provider.clone(),
                    model: spec.model.clone(),
                    kind,
                    message: err.to_string(),
                });
            }
        };
        self.counters.builds.fetch_add(1, Ordering::Relaxed);

        let handle = Arc::new(ModelHandle::new(
            spec,
            key.hash.clone(),
            binding,
            now_ms(),
        ));
        self.entries.insert(
            key.clone(),
            Slot {
                handle: handle.clone(),
                expires_at: Instant::now() + self.config.ttl,
            },
        );
        debug!(
            provider = spec.provider.as_str(),
            model = spec.model.as_str(),
            duration_ms = started.elapsed().as_millis() as u64,
            "model handle built"
        );
        Ok(handle)
    }

    /// Live handle for `key`; an expired slot is dropped.
    fn lookup(&self, key: &CacheKey) -> Option<Arc<ModelHandle<F::Binding>>> {
        let now = Instant::now();
        let live = self.entries.get(key).and_then(|slot| {
            if now < slot.expires_at {
                Some(slot.handle.clone())
            } else {
                None
            }
        });
        match live {
            Some(handle) => {
                handle.touch(now_ms());
                Some(handle)
            }
            None => {
                self.entries.remove_if(key, |_, s| now >= s.expires_at);
                None
            }
        }
    }

    /// Drop one cached handle, or all of them when `key` is `None`.
    pub fn invalidate(&self, key: Option<&CacheKey>) -> usize {
        let removed = match key {
            Some(k) => usize::from(self.entries.remove(k).is_some()),
            None => {
                let n = self.entries.len();
                self.entries.clear();
                self.build_locks.clear();
                n
            }
        };
        if removed > 0 {
            info!(removed, "model handles invalidated");
        }
        removed
    }

    /// Drop every expired handle, plus build locks nobody holds. Returns how
    /// many handles were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, s| now < s.expires_at);
        self.build_locks.retain(|_, l| Arc::strong_count(l) > 1);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "purged expired model handles");
        }
        removed
    }

    pub fn invalidate_spec(&self, spec: &ModelSpec) -> bool {
        self.invalidate(Some(&self.key_for(spec))) > 0
    }

    /// Drop every handle bound to `provider`, e.g. after a credential change.
    pub fn invalidate_provider(&self, provider: &str) -> usize {
        let provider = provider.trim().to_ascii_lowercase();
        let before = self.entries.len();
        self.entries.retain(|_, s| s.handle.provider != provider);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            info!(provider = provider.as_str(), removed, "provider handles invalidated");
        }
        removed
    }

    pub fn metrics(&self) -> ResolverMetrics {
        ResolverMetrics {
            cached: self.entries.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            builds: self.counters.builds.load(Ordering::Relaxed),
            build_failures: self.counters.build_failures.load(Ordering::Relaxed),
        }
    }
}
