use crate::error_code::ErrorKind;
use crate::{Error, ErrorContext, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
    /// Cooldown has elapsed and the next outcome decides the state.
    pub half_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the cooldown duration
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

#[derive(Debug)]
struct State {
    consecutive_failures: u32,
    open_until: Option<Instant>,
    half_open: bool,
}

/// Breaker for a single provider.
///
/// - Counts consecutive call-level failures whose kind trips the breaker
/// - Opens for a cooldown duration after threshold
/// - Cooldown expiry moves it to half-open: calls go through again, a
///   success closes it and the first tripping failure reopens it at once
pub struct CircuitBreaker {
    name: String,
    cfg: CircuitBreakerConfig,
    state: std::sync::Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            state: std::sync::Mutex::new(State {
                consecutive_failures: 0,
                open_until: None,
                half_open: false,
            }),
        }
    }

    pub fn allow(&self) -> Result<()> {
        let mut st = self.state.lock().map_err(|_| {
            Error::runtime_with_context(
                "CircuitBreaker poisoned",
                ErrorContext::new()
                    .with_source("circuit_breaker")
                    .with_provider(self.name.clone()),
            )
        })?;
        if let Some(until) = st.open_until {
            if Instant::now() < until {
                return Err(Error::CircuitOpen {
                    provider: self.name.clone(),
                });
            }
            st.open_until = None;
            st.consecutive_failures = 0;
            st.half_open = true;
        }
        Ok(())
    }

    pub fn on_success(&self) {
        if let Ok(mut st) = self.state.lock() {
            st.consecutive_failures = 0;
            st.open_until = None;
            st.half_open = false;
        }
    }

    /// Record a failed call. Kinds that say nothing about provider health
    /// (rate limits, bad requests) leave the counter untouched.
    pub fn on_failure(&self, kind: ErrorKind) {
        if !kind.trips_breaker() {
            return;
        }
        if let Ok(mut st) = self.state.lock() {
            st.consecutive_failures = st.consecutive_failures.saturating_add(1);
            let tripped = st.half_open || st.consecutive_failures >= self.cfg.failure_threshold;
            if tripped && st.open_until.is_none() {
                st.open_until = Some(Instant::now() + self.cfg.cooldown);
                st.half_open = false;
                warn!(
                    provider = self.name.as_str(),
                    consecutive_failures = st.consecutive_failures,
                    cooldown_ms = self.cfg.cooldown.as_millis() as u64,
                    error_kind = kind.name(),
                    "circuit opened for provider"
                );
            }
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let (consecutive_failures, open_remaining_ms, half_open) = match self.state.lock() {
            Ok(st) => (
                st.consecutive_failures,
                st.open_until
                    .filter(|until| *until > now)
                    .map(|until| (until - now).as_millis() as u64),
                st.half_open,
            ),
            Err(_) => (0, None, false),
        };
        CircuitBreakerSnapshot {
            failure_threshold: self.cfg.failure_threshold,
            cooldown_ms: self.cfg.cooldown.as_millis() as u64,
            consecutive_failures,
            open_remaining_ms,
            half_open,
        }
    }
}

/// One breaker per provider id, created on first use.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    pub fn get(&self, provider: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, self.config.clone())))
            .clone()
    }

    pub fn allow(&self, provider: &str) -> bool {
        self.get(provider).allow().is_ok()
    }

    pub fn record_success(&self, provider: &str) {
        self.get(provider).on_success();
    }

    pub fn record_failure(&self, provider: &str, kind: ErrorKind) {
        self.get(provider).on_failure(kind);
    }

    pub fn reset(&self, provider: &str) {
        self.breakers.remove(provider);
    }

    pub fn snapshot(&self) -> Vec<(String, CircuitBreakerSnapshot)> {
        let mut out: Vec<_> = self
            .breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_circuit_breaker_config_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.cooldown, Duration::from_secs(60));
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = CircuitBreaker::new("p", CircuitBreakerConfig::new().with_failure_threshold(5));
        cb.on_failure(ErrorKind::Network);
        cb.on_failure(ErrorKind::Auth);
        assert_eq!(cb.snapshot().consecutive_failures, 2);
        cb.on_success();
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_ignores_non_tripping_kinds() {
        let cb = CircuitBreaker::new("p", CircuitBreakerConfig::new().with_failure_threshold(1));
        cb.on_failure(ErrorKind::RateLimited);
        cb.on_failure(ErrorKind::TokenLimit);
        assert!(cb.allow().is_ok());
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold_and_closes_after_cooldown() {
        let config = CircuitBreakerConfig::new()
            .with_failure_threshold(2)
            .with_cooldown(Duration::from_secs(30));
        let registry = CircuitBreakerRegistry::new(config);

        registry.record_failure("anthropic", ErrorKind::Auth);
        assert!(registry.allow("anthropic"));
        registry.record_failure("anthropic", ErrorKind::Auth);
        assert!(!registry.allow("anthropic"));
        assert!(registry.allow("openai"));
        assert!(matches!(
            registry.get("anthropic").allow(),
            Err(Error::CircuitOpen { .. })
        ));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(registry.allow("anthropic"));
        assert_eq!(registry.get("anthropic").snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_immediately() {
        let cb = CircuitBreaker::new(
            "openai",
            CircuitBreakerConfig::new()
                .with_failure_threshold(3)
                .with_cooldown(Duration::from_secs(10)),
        );
        for _ in 0..3 {
            cb.on_failure(ErrorKind::Timeout);
        }
        assert!(cb.allow().is_err());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cb.allow().is_ok());
        assert!(cb.snapshot().half_open);

        // one failure is enough while half-open
        cb.on_failure(ErrorKind::Network);
        assert!(cb.allow().is_err());
        let snap = cb.snapshot();
        assert!(!snap.half_open);
        assert_eq!(snap.open_remaining_ms, Some(10_000));

        // a half-open success closes it for good
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cb.allow().is_ok());
        cb.on_success();
        cb.on_failure(ErrorKind::Network);
        assert!(cb.allow().is_ok());
        assert!(!cb.snapshot().half_open);
    }

    #[test]
    fn test_thread_safe() {
        let cb = Arc::new(CircuitBreaker::new(
            "p",
            CircuitBreakerConfig::new().with_failure_threshold(100),
        ));
        let mut handles = vec![];
        for _ in 0..10 {
            let cb_clone = Arc::clone(&cb);
            handles.push(thread::spawn(move || {
                for _ in 0..5 {
                    cb_clone.on_failure(ErrorKind::Network);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cb.snapshot().consecutive_failures, 50);
    }
}
