use crate::client::signals::SignalsSnapshot;
use crate::client::types::{Completion, Dispatch, Metered, OrchestrationRequest, TokenUsage};
use crate::config::RateLimitSection;
use crate::models::{HandleFactory, ModelHandle, ModelResolver};
use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
use crate::resilience::fallback::{now_ms, summarize, FallbackOptions, FallbackOrchestrator};
use crate::resilience::rate_limiter::{AdmissionGate, FixedWindowRateLimiter};
use crate::telemetry::{EventSink, OrchestrationEvent};
use crate::usage::{
    AnalyticsPeriod, CostEstimate, CreditLedger, CreditStatus, MetadataValue, UsageAnalytics,
    UsageLedger, UsageReceipt, UsageSummary,
};
use crate::{Error, ErrorContext, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Entry point wiring admission, model resolution, fallback and usage
/// accounting into one call.
pub struct Orchestrator<F: HandleFactory> {
    pub(crate) rate_limit: RateLimitSection,
    pub(crate) limiter: Arc<FixedWindowRateLimiter>,
    pub(crate) gate: Arc<dyn AdmissionGate>,
    pub(crate) resolver: Arc<ModelResolver<F>>,
    pub(crate) fallback: FallbackOrchestrator,
    pub(crate) ledger: Arc<UsageLedger>,
    pub(crate) credits: Arc<dyn CreditLedger>,
    pub(crate) analytics: Arc<UsageAnalytics>,
    pub(crate) sink: Arc<dyn EventSink>,
}

impl<F: HandleFactory> Orchestrator<F> {
    /// Run one logical request.
    ///
    /// `operation` receives the resolved handle of the route being attempted and
    /// performs the actual backend call. It may be invoked several times (retries
    /// and fallbacks), always for one route at a time.
    pub async fn execute<T, Op, Fut>(
        &self,
        request: OrchestrationRequest,
        operation: Op,
    ) -> Result<Dispatch<T>>
    where
        T: Metered,
        Op: Fn(Arc<ModelHandle<F::Binding>>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(rejected) = self.admit(&request).await {
            return Ok(rejected);
        }

        let routes = &request.routes;
        let context = request.context.as_str();
        let resolver = &self.resolver;
        let op = &operation;
        let providers: Vec<&str> = routes.iter().map(|r| r.provider.as_str()).collect();

        let mut options = FallbackOptions::new(request.operation_name.clone());
        options.preferred_provider = request.preferred_provider.clone();
        options.cancel = request.cancel.clone();

        let result = self
            .fallback
            .execute_with_fallback(&providers, options, |provider| {
                let spec = routes
                    .iter()
                    .find(|r| r.provider == provider)
                    .map(|r| r.spec(context));
                async move {
                    let spec = spec.ok_or_else(|| {
                        Error::configuration_with_context(
                            format!("no route for provider '{}'", provider),
                            ErrorContext::new()
                                .with_provider(provider.clone())
                                .with_source("orchestrator"),
                        )
                    })?;
                    let handle = resolver.resolve(&spec).await?;
                    op(handle).await
                }
            })
            .await;

        let call_id = result.call_id.clone();
        if !result.is_success() {
            if !matches!(result.error, Some(Error::Cancelled)) {
                let _ = self
                    .sink
                    .report(OrchestrationEvent::Exhausted {
                        call_id: call_id.clone(),
                        operation: result.operation.clone(),
                        attempts: result.attempts.clone(),
                        last_error: result
                            .error
                            .as_ref()
                            .map(|e| e.to_string())
                            .unwrap_or_default(),
                        timestamp_ms: now_ms(),
                    })
                    .await;
            }
            return match result.into_result() {
                Ok(_) => Err(Error::Cancelled),
                Err(err) => Err(err),
            };
        }

        let attempts = result.attempts;
        let (Some(provider), Some(value)) = (result.provider, result.value) else {
            return Err(Error::Cancelled);
        };
        let model = routes
            .iter()
            .find(|r| r.provider == provider)
            .map(|r| r.model.clone())
            .unwrap_or_default();

        let (receipt, cost) = match value.usage() {
            Some(usage) => self.meter(&request, &call_id, &provider, &model, usage).await,
            None => (None, None),
        };

        let _ = self
            .sink
            .report(OrchestrationEvent::Completed {
                call_id: call_id.clone(),
                operation: request.operation_name.clone(),
                provider: provider.clone(),
                model: model.clone(),
                attempts: attempts.clone(),
                timestamp_ms: now_ms(),
            })
            .await;
        info!(
            call_id = call_id.as_str(),
            user_id = request.user_id.as_str(),
            provider = provider.as_str(),
            model = model.as_str(),
            attempts = attempts.len(),
            trail = %summarize(&attempts),
            "request completed"
        );

        Ok(Dispatch::Completed(Completion {
            call_id,
            value,
            provider,
            model,
            attempts,
            receipt,
            cost,
        }))
    }

    /// `Some` with the rejection when the request is not admitted.
    async fn admit<T>(&self, request: &OrchestrationRequest) -> Option<Dispatch<T>> {
        if !self.rate_limit.enabled {
            return None;
        }
        let key = request.admission_key();
        let limit = self.rate_limit.limit;
        if self.gate.admit(key, limit, self.rate_limit.window()).await {
            return None;
        }
        let _ = self
            .sink
            .report(OrchestrationEvent::rate_limited(key, limit))
            .await;
        Some(Dispatch::RateLimited {
            key: key.to_string(),
            limit,
            retry_after_ms: self.gate.retry_after_ms(key).await,
        })
    }

    /// Price and record usage; ledger failures are logged, never surfaced.
    async fn meter(
        &self,
        request: &OrchestrationRequest,
        call_id: &str,
        provider: &str,
        model: &str,
        usage: TokenUsage,
    ) -> (Option<UsageReceipt>, Option<CostEstimate>) {
        let mut metadata = request.metadata.clone();
        metadata.insert("call_id".into(), MetadataValue::from(call_id));
        metadata.insert("provider".into(), MetadataValue::from(provider));
        metadata.insert(
            "operation".into(),
            MetadataValue::from(request.operation_name.as_str()),
        );

        match self
            .credits
            .record_completion(
                &request.user_id,
                model,
                usage.input_units,
                usage.output_units,
                metadata,
            )
            .await
        {
            Ok((receipt, cost)) => {
                self.analytics.invalidate_user(&request.user_id);
                if let Some(level) = receipt.alert {
                    let _ = self
                        .sink
                        .report(OrchestrationEvent::credit_alert(
                            request.user_id.as_str(),
                            level,
                            receipt.new_balance,
                        ))
                        .await;
                }
                (Some(receipt), Some(cost))
            }
            Err(err) => {
                warn!(
                    call_id,
                    user_id = request.user_id.as_str(),
                    error = %err,
                    "failed to record usage"
                );
                (None, None)
            }
        }
    }

    /// Plain admission check against the configured window, through the
    /// same gate `execute` uses.
    pub async fn allow(&self, key: &str) -> bool {
        self.gate
            .admit(key, self.rate_limit.limit, self.rate_limit.window())
            .await
    }

    pub async fn status(&self, user_id: &str) -> CreditStatus {
        self.credits.credit_status(user_id).await
    }

    pub fn summary(&self, user_id: &str, period: AnalyticsPeriod) -> UsageSummary {
        self.analytics.summary(user_id, period)
    }

    pub fn resolver(&self) -> &Arc<ModelResolver<F>> {
        &self.resolver
    }

    /// Process-local ledger backing analytics.
    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.ledger
    }

    /// Ledger that meters completions and answers `status`.
    pub fn credits(&self) -> &Arc<dyn CreditLedger> {
        &self.credits
    }

    pub fn analytics(&self) -> &Arc<UsageAnalytics> {
        &self.analytics
    }

    pub fn limiter(&self) -> &Arc<FixedWindowRateLimiter> {
        &self.limiter
    }

    pub fn circuit_breakers(&self) -> Option<&Arc<CircuitBreakerRegistry>> {
        self.fallback.circuit_breakers()
    }

    /// Snapshot current runtime signals (facts only).
    pub fn signals(&self, admission_key: Option<&str>) -> SignalsSnapshot {
        SignalsSnapshot {
            circuit_breakers: self
                .circuit_breakers()
                .map(|b| b.snapshot())
                .unwrap_or_default(),
            rate_limiter: admission_key.and_then(|k| self.limiter.snapshot(k)),
            rate_limited_keys: self.limiter.len(),
            rate_limit_rejections: self.limiter.rejected_total(),
            resolver: self.resolver.metrics(),
            analytics_cache: self.analytics.cache_metrics(),
            tracked_users: self.ledger.len(),
        }
    }
}
