use crate::cache::CacheMetrics;
use crate::models::ResolverMetrics;
use crate::resilience::circuit_breaker::CircuitBreakerSnapshot;
use crate::resilience::rate_limiter::RateLimiterSnapshot;

/// A lightweight snapshot of runtime "signals" for orchestration.
///
/// This is intentionally *facts only* (no policy). Applications can build
/// routing or alerting strategies on top of these signals.
#[derive(Debug, Clone, Default)]
pub struct SignalsSnapshot {
    /// Breaker state per provider, sorted by provider id. Empty when breakers are disabled.
    pub circuit_breakers: Vec<(String, CircuitBreakerSnapshot)>,
    /// Window state of the requested admission key, if it is tracked.
    pub rate_limiter: Option<RateLimiterSnapshot>,
    pub rate_limited_keys: usize,
    pub rate_limit_rejections: u64,
    pub resolver: ResolverMetrics,
    pub analytics_cache: CacheMetrics,
    pub tracked_users: usize,
}

impl SignalsSnapshot {
    /// Providers whose circuit is currently open.
    pub fn open_circuits(&self) -> Vec<&str> {
        self.circuit_breakers
            .iter()
            .filter(|(_, s)| s.open_remaining_ms.is_some())
            .map(|(p, _)| p.as_str())
            .collect()
    }
}
