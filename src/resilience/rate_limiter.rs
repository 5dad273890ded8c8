use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Per-key admission counter.
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    pub window_start: Instant,
    pub count: u32,
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitWindow {
    fn elapsed_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub count: u32,
    pub limit: u32,
    /// Time left until the current window resets (ms).
    pub reset_in_ms: u64,
}

/// Admission decision behind a swappable interface, so the in-process
/// limiter can be replaced by one backed by a shared counter store.
#[async_trait]
pub trait AdmissionGate: Send + Sync {
    async fn admit(&self, key: &str, limit: u32, window: Duration) -> bool;

    /// Milliseconds until `key` may be admitted again, when the gate knows.
    async fn retry_after_ms(&self, _key: &str) -> Option<u64> {
        None
    }
}

/// Fixed-window request counter keyed by caller-chosen strings.
///
/// - First check for a key, or the first check after its window elapsed,
///   starts a new window with `count = 1`
/// - Within a window, admits while `count < limit`
/// - Rejections do not increment the counter
/// - Stale keys are reset lazily on their next check
///
/// A burst of up to `2 * limit` is possible across a window boundary.
#[derive(Debug, Default)]
pub struct FixedWindowRateLimiter {
    windows: DashMap<String, RateLimitWindow>,
    rejected: AtomicU64,
}

impl FixedWindowRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and count one request for `key`. A zero limit rejects everything.
    pub fn allow(&self, key: &str, limit: u32, window: Duration) -> bool {
        if limit == 0 {
            self.reject(key, limit);
            return false;
        }
        let now = Instant::now();
        // The entry guard holds the shard lock, making the check-and-increment
        // atomic for this key only.
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateLimitWindow {
                window_start: now,
                count: 0,
                limit,
                window,
            });
        let w = entry.value_mut();
        w.limit = limit;
        w.window = window;

        if w.count == 0 || w.elapsed_at(now) {
            w.window_start = now;
            w.count = 1;
            return true;
        }
        if w.count < limit {
            w.count += 1;
            return true;
        }
        drop(entry);
        self.reject(key, limit);
        false
    }

    fn reject(&self, key: &str, limit: u32) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(key, limit, "rate limit rejected request");
    }

    /// Current window state for `key`, if it is tracked and not yet elapsed.
    pub fn snapshot(&self, key: &str) -> Option<RateLimiterSnapshot> {
        let now = Instant::now();
        self.windows.get(key).and_then(|w| {
            if w.elapsed_at(now) {
                return None;
            }
            let reset_at = w.window_start + w.window;
            Some(RateLimiterSnapshot {
                count: w.count,
                limit: w.limit,
                reset_in_ms: reset_at.saturating_duration_since(now).as_millis() as u64,
            })
        })
    }

    /// Drop every key whose window has elapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, w| !w.elapsed_at(now));
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, "purged stale rate limit windows");
        }
        removed
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Total rejections since construction.
    pub fn rejected_total(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AdmissionGate for FixedWindowRateLimiter {
    async fn admit(&self, key: &str, limit: u32, window: Duration) -> bool {
        self.allow(key, limit, window)
    }

    async fn retry_after_ms(&self, key: &str) -> Option<u64> {
        self.snapshot(key).map(|s| s.reset_in_ms)
    }
}
