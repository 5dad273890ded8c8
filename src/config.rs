//! Orchestrator configuration.
//!
//! Every section is optional in the source document; missing fields take the
//! defaults below. Environment variables prefixed `AI_ORCHESTRA_` override the
//! loaded values (see [`OrchestratorConfig::apply_env_overrides`]).
//!
//! ```yaml
//! retry:
//!   max_attempts: 3
//!   base_delay_ms: 100
//!   kind_limits: { auth: 1, schema_invalid: 2 }
//! rate_limit: { limit: 5, window_ms: 60000 }
//! breaker: { enabled: true, failure_threshold: 3, cooldown_secs: 60 }
//! providers:
//!   openai: { retry: { max_attempts: 2 } }
//! ```

use crate::cache::CacheConfig;
use crate::error_code::ErrorKind;
use crate::models::ResolverConfig;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::retry::RetryPolicy;
use crate::usage::{LedgerConfig, PricingTable};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const ENV_PREFIX: &str = "AI_ORCHESTRA_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
    /// `null` or 0 lets attempts run unbounded.
    pub attempt_timeout_ms: Option<u64>,
    pub kind_limits: BTreeMap<ErrorKind, u32>,
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter_ratio: policy.jitter_ratio,
            attempt_timeout_ms: policy.attempt_timeout.map(|t| t.as_millis() as u64),
            kind_limits: policy.kind_limits,
        }
    }
}

impl RetrySection {
    pub fn to_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter_ratio(self.jitter_ratio);
        policy.attempt_timeout = self
            .attempt_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        for (kind, limit) in &self.kind_limits {
            policy = policy.with_kind_limit(*kind, *limit);
        }
        policy
    }

    fn validate(&self, path: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(invalid(path, "max_attempts", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(invalid(path, "jitter_ratio", "must be within [0, 1]"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(invalid(path, "base_delay_ms", "must not exceed max_delay_ms"));
        }
        if self.kind_limits.values().any(|v| *v == 0) {
            return Err(invalid(path, "kind_limits", "limits must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub enabled: bool,
    pub limit: u32,
    pub window_ms: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 60,
            window_ms: 60_000,
        }
    }
}

impl RateLimitSection {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSection {
    pub ttl_secs: u64,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_size: usize,
    pub ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditsSection {
    pub initial_balance: f64,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub projection_window_days: u32,
    pub max_events_per_user: usize,
}

impl Default for CreditsSection {
    fn default() -> Self {
        let l = LedgerConfig::default();
        Self {
            initial_balance: l.initial_balance,
            warning_threshold: l.warning_threshold,
            critical_threshold: l.critical_threshold,
            projection_window_days: l.projection_window_days,
            max_events_per_user: l.max_events_per_user,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: 3,
            cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    /// Replaces the global retry section for this provider.
    pub retry: Option<RetrySection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub retry: RetrySection,
    pub rate_limit: RateLimitSection,
    pub resolver: ResolverSection,
    pub cache: CacheSection,
    pub credits: CreditsSection,
    pub breaker: BreakerSection,
    /// Built-in table when absent.
    pub pricing: Option<PricingTable>,
    pub providers: BTreeMap<String, ProviderSection>,
}

fn invalid(section: &str, field: &str, details: &str) -> Error {
    Error::configuration_with_context(
        format!("invalid value for {}.{}", section, field),
        ErrorContext::new()
            .with_field_path(format!("{}.{}", section, field))
            .with_details(details)
            .with_source("config"),
    )
}

impl OrchestratorConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a `.json` file as JSON and anything else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    /// Apply `AI_ORCHESTRA_*` variables from the process environment.
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    /// Apply overrides from an arbitrary source keyed without the prefix
    /// (`RETRY_MAX_ATTEMPTS`, `RATE_LIMIT`, ...). Unparsable values are
    /// logged and ignored.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse::<T>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key = %format!("{}{}", ENV_PREFIX, key), value = raw.as_str(), "ignoring unparsable override");
                    None
                }
            }
        }

        if let Some(v) = parsed(&lookup, "RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = v;
        }
        if let Some(v) = parsed(&lookup, "RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = v;
        }
        if let Some(v) = parsed(&lookup, "RETRY_MAX_DELAY_MS") {
            self.retry.max_delay_ms = v;
        }
        if let Some(v) = parsed(&lookup, "RETRY_ATTEMPT_TIMEOUT_MS") {
            self.retry.attempt_timeout_ms = Some(v);
        }
        if let Some(v) = parsed(&lookup, "RATE_LIMIT") {
            self.rate_limit.limit = v;
        }
        if let Some(v) = parsed(&lookup, "RATE_LIMIT_WINDOW_MS") {
            self.rate_limit.window_ms = v;
        }
        if let Some(v) = parsed(&lookup, "BREAKER_ENABLED") {
            self.breaker.enabled = v;
        }
        if let Some(v) = parsed(&lookup, "BREAKER_FAILURE_THRESHOLD") {
            self.breaker.failure_threshold = v;
        }
        if let Some(v) = parsed(&lookup, "BREAKER_COOLDOWN_SECS") {
            self.breaker.cooldown_secs = v;
        }
        if let Some(v) = parsed(&lookup, "INITIAL_CREDIT") {
            self.credits.initial_balance = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.retry.validate("retry")?;
        for (name, provider) in &self.providers {
            if let Some(retry) = &provider.retry {
                retry.validate(&format!("providers.{}.retry", name))?;
            }
        }
        if self.rate_limit.window_ms == 0 {
            return Err(invalid("rate_limit", "window_ms", "must be positive"));
        }
        if self.cache.max_size == 0 {
            return Err(invalid("cache", "max_size", "must be at least 1"));
        }
        let c = &self.credits;
        if !c.initial_balance.is_finite() {
            return Err(invalid("credits", "initial_balance", "must be finite"));
        }
        if c.critical_threshold > c.warning_threshold {
            return Err(invalid(
                "credits",
                "critical_threshold",
                "must not exceed warning_threshold",
            ));
        }
        if c.projection_window_days == 0 {
            return Err(invalid("credits", "projection_window_days", "must be at least 1"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(invalid("breaker", "failure_threshold", "must be at least 1"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.to_policy()
    }

    /// Per-provider policy overrides.
    pub fn provider_policies(&self) -> BTreeMap<String, RetryPolicy> {
        self.providers
            .iter()
            .filter_map(|(name, p)| p.retry.as_ref().map(|r| (name.clone(), r.to_policy())))
            .collect()
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig::default().with_ttl(Duration::from_secs(self.resolver.ttl_secs))
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .with_max_size(self.cache.max_size)
            .with_ttl(Duration::from_secs(self.cache.ttl_secs))
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        let c = &self.credits;
        LedgerConfig::default()
            .with_initial_balance(c.initial_balance)
            .with_thresholds(c.warning_threshold, c.critical_threshold)
            .with_projection_window_days(c.projection_window_days)
            .with_max_events_per_user(c.max_events_per_user)
    }

    /// `None` when the breaker section is disabled.
    pub fn breaker_config(&self) -> Option<CircuitBreakerConfig> {
        self.breaker.enabled.then(|| {
            CircuitBreakerConfig::new()
                .with_failure_threshold(self.breaker.failure_threshold)
                .with_cooldown(Duration::from_secs(self.breaker.cooldown_secs))
        })
    }

    pub fn pricing_table(&self) -> PricingTable {
        self.pricing.clone().unwrap_or_else(PricingTable::builtin)
    }
}
