//! Fallback orchestration.
//!
//! Attempts one logical operation against a ranked list of providers,
//! strictly in order, delegating each provider's attempts to the
//! [`RetryEngine`]. Stops at the first success; on total exhaustion the result
//! carries the full attempt trail and the *last* error seen.

use crate::error_code::ErrorKind;
use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
use crate::resilience::classifier::classify;
use crate::resilience::retry::{RetryEngine, RetryHooks, RetryPolicy};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failed,
    /// Provider skipped because its circuit was open; the operation was not invoked.
    CircuitOpen,
    Cancelled,
}

/// One try of one operation against one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub provider: String,
    /// 1-based attempt number within this provider.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    /// Unix epoch milliseconds at which the attempt finished.
    pub timestamp_ms: u64,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl AttemptRecord {
    fn base(provider: &str, attempt: u32, outcome: AttemptOutcome, elapsed: Duration) -> Self {
        Self {
            provider: provider.to_string(),
            attempt,
            outcome,
            error_kind: None,
            error_message: None,
            duration_ms: elapsed.as_millis() as u64,
            timestamp_ms: now_ms(),
        }
    }

    pub(crate) fn success(provider: &str, attempt: u32, elapsed: Duration) -> Self {
        Self::base(provider, attempt, AttemptOutcome::Success, elapsed)
    }

    pub(crate) fn failure(
        provider: &str,
        attempt: u32,
        kind: ErrorKind,
        err: &Error,
        elapsed: Duration,
    ) -> Self {
        let mut rec = Self::base(provider, attempt, AttemptOutcome::Failed, elapsed);
        rec.error_kind = Some(kind);
        rec.error_message = Some(err.to_string());
        rec
    }

    pub(crate) fn cancelled(provider: &str, attempt: u32, elapsed: Duration) -> Self {
        Self::base(provider, attempt, AttemptOutcome::Cancelled, elapsed)
    }

    pub(crate) fn circuit_open(provider: &str) -> Self {
        let mut rec = Self::base(provider, 1, AttemptOutcome::CircuitOpen, Duration::ZERO);
        rec.error_kind = Some(ErrorKind::Network);
        rec
    }
}

/// Terminal state of one fallback sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    Success,
    AllExhausted,
    Cancelled,
}

/// Outcome of a multi-provider attempt sequence.
#[derive(Debug)]
pub struct FallbackResult<T> {
    pub call_id: String,
    pub operation: String,
    pub attempts: Vec<AttemptRecord>,
    /// Provider that produced `value`.
    pub provider: Option<String>,
    pub value: Option<T>,
    /// Last error encountered, set when no provider succeeded.
    pub error: Option<Error>,
}

impl<T> FallbackResult<T> {
    pub fn is_success(&self) -> bool {
        self.value.is_some()
    }

    pub fn state(&self) -> FallbackState {
        match (&self.value, &self.error) {
            (Some(_), _) => FallbackState::Success,
            (None, Some(Error::Cancelled)) => FallbackState::Cancelled,
            _ => FallbackState::AllExhausted,
        }
    }

    /// Number of attempts made against `provider`.
    pub fn attempts_for(&self, provider: &str) -> usize {
        self.attempts.iter().filter(|a| a.provider == provider).count()
    }

    /// Distinct providers in the trail, in the order they were tried.
    pub fn providers_tried(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.attempts
            .iter()
            .map(|a| a.provider.as_str())
            .filter(|p| seen.insert(*p))
            .collect()
    }

    /// Collapse into a plain result; exhaustion becomes [`Error::Exhausted`].
    pub fn into_result(self) -> Result<T> {
        if let Some(value) = self.value {
            return Ok(value);
        }
        match self.error {
            Some(Error::Cancelled) => Err(Error::Cancelled),
            last => Err(Error::Exhausted {
                operation: self.operation,
                attempts: self.attempts,
                last: Box::new(last.unwrap_or_else(|| {
                    Error::runtime_with_context(
                        "no attempt was made",
                        ErrorContext::new().with_source("fallback"),
                    )
                })),
            }),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct FallbackOptions {
    pub preferred_provider: Option<String>,
    pub operation_name: String,
    pub cancel: Option<CancellationToken>,
}

impl FallbackOptions {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Sequences provider attempts for one logical request.
#[derive(Clone, Default)]
pub struct FallbackOrchestrator {
    engine: RetryEngine,
    default_policy: RetryPolicy,
    provider_policies: HashMap<String, RetryPolicy>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    hooks: RetryHooks,
}

impl FallbackOrchestrator {
    pub fn new(default_policy: RetryPolicy) -> Self {
        Self {
            default_policy,
            ..Default::default()
        }
    }

    /// Override the retry policy for one provider.
    pub fn with_provider_policy(mut self, provider: impl Into<String>, policy: RetryPolicy) -> Self {
        self.provider_policies.insert(provider.into(), policy);
        self
    }

    pub fn with_circuit_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn with_hooks(mut self, hooks: RetryHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn policy_for(&self, provider: &str) -> &RetryPolicy {
        self.provider_policies
            .get(provider)
            .unwrap_or(&self.default_policy)
    }

    pub fn circuit_breakers(&self) -> Option<&Arc<CircuitBreakerRegistry>> {
        self.breakers.as_ref()
    }

    /// Rank order for a call: duplicates collapsed (first occurrence wins),
    /// the preferred provider moved to the front when present.
    pub fn rank<S: AsRef<str>>(providers: &[S], preferred: Option<&str>) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ranked: Vec<String> = providers
            .iter()
            .map(|p| p.as_ref().to_string())
            .filter(|p| seen.insert(p.clone()))
            .collect();
        if let Some(pref) = preferred {
            if let Some(pos) = ranked.iter().position(|p| p == pref) {
                let p = ranked.remove(pos);
                ranked.insert(0, p);
            }
        }
        ranked
    }

    /// Run `op(provider_id)` against each provider in rank order until one succeeds.
    pub async fn execute_with_fallback<T, S, F, Fut>(
        &self,
        providers: &[S],
        options: FallbackOptions,
        mut op: F,
    ) -> FallbackResult<T>
    where
        S: AsRef<str>,
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let call_id = Uuid::new_v4().to_string();
        let operation = options.operation_name.clone();
        let ranked = Self::rank(providers, options.preferred_provider.as_deref());
        let cancel = options.cancel.as_ref();

        let mut trail: Vec<AttemptRecord> = Vec::new();
        let mut last_err: Option<Error> = None;

        if ranked.is_empty() {
            last_err = Some(Error::configuration_with_context(
                "no providers configured",
                ErrorContext::new()
                    .with_field_path("providers")
                    .with_source("fallback"),
            ));
        }

        for (idx, provider) in ranked.iter().enumerate() {
            if cancel.map(|t| t.is_cancelled()).unwrap_or(false) {
                last_err = Some(Error::Cancelled);
                break;
            }

            if let Some(breakers) = &self.breakers {
                if !breakers.allow(provider) {
                    debug!(
                        call_id = call_id.as_str(),
                        provider = provider.as_str(),
                        "skipping provider with open circuit"
                    );
                    trail.push(AttemptRecord::circuit_open(provider));
                    last_err = Some(Error::CircuitOpen {
                        provider: provider.clone(),
                    });
                    continue;
                }
            }

            let policy = self.policy_for(provider);
            let outcome = self
                .engine
                .run_recorded(provider, policy, &self.hooks, cancel, || op(provider.clone()))
                .await;
            trail.extend(outcome.attempts);

            match outcome.result {
                Ok(value) => {
                    if let Some(breakers) = &self.breakers {
                        breakers.record_success(provider);
                    }
                    info!(
                        call_id = call_id.as_str(),
                        operation = operation.as_str(),
                        provider = provider.as_str(),
                        rank = idx,
                        attempts = trail.len(),
                        "operation succeeded"
                    );
                    return FallbackResult {
                        call_id,
                        operation,
                        attempts: trail,
                        provider: Some(provider.clone()),
                        value: Some(value),
                        error: None,
                    };
                }
                Err(Error::Cancelled) => {
                    last_err = Some(Error::Cancelled);
                    break;
                }
                Err(err) => {
                    let kind = classify(&err).kind;
                    if let Some(breakers) = &self.breakers {
                        breakers.record_failure(provider, kind);
                    }
                    debug!(
                        call_id = call_id.as_str(),
                        provider = provider.as_str(),
                        error_kind = kind.name(),
                        "provider exhausted, moving to next"
                    );
                    last_err = Some(err);
                }
            }
        }

        match &last_err {
            Some(Error::Cancelled) => {
                info!(
                    call_id = call_id.as_str(),
                    operation = operation.as_str(),
                    attempts = trail.len(),
                    "operation cancelled"
                );
            }
            _ => {
                warn!(
                    call_id = call_id.as_str(),
                    operation = operation.as_str(),
                    providers = ranked.len(),
                    attempts = trail.len(),
                    trail = %summarize(&trail),
                    "all providers exhausted"
                );
            }
        }

        FallbackResult {
            call_id,
            operation,
            attempts: trail,
            provider: None,
            value: None,
            error: last_err,
        }
    }
}

/// Compact one-line rendering of an attempt trail for logs.
pub fn summarize(trail: &[AttemptRecord]) -> String {
    trail
        .iter()
        .map(|a| {
            let kind = a.error_kind.map(|k| k.name()).unwrap_or("ok");
            format!("{}#{}:{}", a.provider, a.attempt, kind)
        })
        .collect::<Vec<_>>()
        .join(", ")
}
