use crate::client::core::Orchestrator;
use crate::config::OrchestratorConfig;
use crate::models::{HandleFactory, ModelResolver};
use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
use crate::resilience::fallback::FallbackOrchestrator;
use crate::resilience::rate_limiter::{AdmissionGate, FixedWindowRateLimiter};
use crate::resilience::retry::RetryHooks;
use crate::telemetry::EventSink;
use crate::usage::{CreditLedger, UsageAnalytics, UsageLedger};
use crate::Result;
use std::sync::Arc;

/// Builder for [`Orchestrator`].
///
/// Keep this surface area small and predictable: everything tunable lives in
/// [`OrchestratorConfig`]; the builder only injects collaborators.
pub struct OrchestratorBuilder<F: HandleFactory> {
    factory: F,
    config: OrchestratorConfig,
    use_env: bool,
    gate: Option<Arc<dyn AdmissionGate>>,
    ledger: Option<Arc<UsageLedger>>,
    credits: Option<Arc<dyn CreditLedger>>,
    hooks: RetryHooks,
    sink: Arc<dyn EventSink>,
}

impl<F: HandleFactory> OrchestratorBuilder<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            config: OrchestratorConfig::default(),
            use_env: false,
            gate: None,
            ledger: None,
            credits: None,
            hooks: RetryHooks::default(),
            sink: crate::telemetry::noop_sink(),
        }
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Apply `AI_ORCHESTRA_*` environment overrides at build time.
    pub fn with_env_overrides(mut self, enable: bool) -> Self {
        self.use_env = enable;
        self
    }

    /// Replace the in-process limiter used for admission (e.g. with one backed
    /// by a shared store). Rejections and `allow` go through the gate; signals
    /// keep reporting the local limiter.
    pub fn admission_gate(mut self, gate: Arc<dyn AdmissionGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Share a ledger between several orchestrators.
    pub fn ledger(mut self, ledger: Arc<UsageLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Meter completions and answer credit status through another ledger
    /// (e.g. one backed by a shared store). Analytics keep summarizing the
    /// process-local ledger.
    pub fn credit_ledger(mut self, credits: Arc<dyn CreditLedger>) -> Self {
        self.credits = Some(credits);
        self
    }

    pub fn retry_hooks(mut self, hooks: RetryHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Inject an event sink. Default is a no-op sink.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> Result<Orchestrator<F>> {
        let config = if self.use_env {
            self.config.apply_env_overrides()?
        } else {
            self.config.validate()?;
            self.config
        };

        let mut fallback = FallbackOrchestrator::new(config.retry_policy()).with_hooks(self.hooks);
        for (provider, policy) in config.provider_policies() {
            fallback = fallback.with_provider_policy(provider, policy);
        }
        if let Some(breaker) = config.breaker_config() {
            fallback = fallback.with_circuit_breakers(Arc::new(CircuitBreakerRegistry::new(breaker)));
        }

        let limiter = Arc::new(FixedWindowRateLimiter::new());
        let gate: Arc<dyn AdmissionGate> = match self.gate {
            Some(g) => g,
            None => limiter.clone(),
        };
        let ledger = self.ledger.unwrap_or_else(|| {
            Arc::new(UsageLedger::new(config.ledger_config(), config.pricing_table()))
        });
        let credits: Arc<dyn CreditLedger> = match self.credits {
            Some(c) => c,
            None => ledger.clone(),
        };
        let analytics = Arc::new(UsageAnalytics::new(ledger.clone(), config.cache_config()));
        let resolver = Arc::new(ModelResolver::new(self.factory, config.resolver_config()));

        Ok(Orchestrator {
            rate_limit: config.rate_limit.clone(),
            limiter,
            gate,
            resolver,
            fallback,
            ledger,
            credits,
            analytics,
            sink: self.sink,
        })
    }
}
