//! Retry engine.
//!
//! Runs a caller-supplied async operation with bounded attempts, exponential
//! backoff and jitter. The engine holds no state between calls, so a single
//! instance can be shared by every in-flight request.

use crate::error_code::ErrorKind;
use crate::resilience::classifier::classify;
use crate::resilience::fallback::AttemptRecord;
use crate::{Error, Result};
use rand::Rng;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-attempt bound applied unless a policy overrides it.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry behavior for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Delay is scaled by a random factor in `[1 - ratio, 1 + ratio]`.
    pub jitter_ratio: f64,
    /// Upper bound for a single attempt; expiry is reported as `timeout`.
    /// `None` lets an attempt run until it finishes or is cancelled.
    pub attempt_timeout: Option<Duration>,
    /// Per-kind cap on total attempts. A failure of kind `k` at attempt `n`
    /// stops the sequence when `n >= kind_limits[k]`.
    pub kind_limits: BTreeMap<ErrorKind, u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let mut kind_limits = BTreeMap::new();
        kind_limits.insert(ErrorKind::Auth, 1);
        kind_limits.insert(ErrorKind::TokenLimit, 1);
        kind_limits.insert(ErrorKind::SchemaInvalid, 2);
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter_ratio: 0.2,
            attempt_timeout: Some(DEFAULT_ATTEMPT_TIMEOUT),
            kind_limits,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single attempt, no backoff.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_ratio: 0.0,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Let attempts run unbounded; only cancellation stops them.
    pub fn without_attempt_timeout(mut self) -> Self {
        self.attempt_timeout = None;
        self
    }

    /// Cap the total attempts made while a given kind keeps failing.
    pub fn with_kind_limit(mut self, kind: ErrorKind, max_attempts: u32) -> Self {
        self.kind_limits.insert(kind, max_attempts.max(1));
        self
    }

    /// Attempts allowed when the latest failure has the given kind.
    pub fn attempts_allowed_for(&self, kind: ErrorKind) -> u32 {
        let cap = self.kind_limits.get(&kind).copied().unwrap_or(u32::MAX);
        cap.min(self.max_attempts.max(1))
    }

    /// Un-jittered delay after the given failed attempt (1-based):
    /// `min(base_delay * 2^(attempt-1), max_delay)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if self.jitter_ratio <= 0.0 || delay.is_zero() {
            return delay;
        }
        let ratio = self.jitter_ratio.min(1.0);
        let factor = rand::thread_rng().gen_range((1.0 - ratio)..=(1.0 + ratio));
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }
}

pub type ErrorHook = Arc<dyn Fn(&Error, u32) + Send + Sync>;
pub type RetryHook = Arc<dyn Fn(u32, Duration) + Send + Sync>;

/// Observability callbacks fired by the engine.
///
/// `on_error(error, attempt)` fires for every failed attempt;
/// `on_retry(attempt, delay)` fires after the backoff sleep, right before the
/// next attempt starts.
#[derive(Clone, Default)]
pub struct RetryHooks {
    on_error: Option<ErrorHook>,
    on_retry: Option<RetryHook>,
}

impl RetryHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_error(mut self, f: impl Fn(&Error, u32) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_retry(mut self, f: impl Fn(u32, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(f));
        self
    }

    fn fire_error(&self, err: &Error, attempt: u32) {
        if let Some(f) = &self.on_error {
            f(err, attempt);
        }
    }

    fn fire_retry(&self, attempt: u32, delay: Duration) {
        if let Some(f) = &self.on_retry {
            f(attempt, delay);
        }
    }
}

impl std::fmt::Debug for RetryHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryHooks")
            .field("on_error", &self.on_error.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Result of a retried operation plus the per-attempt trail.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryEngine;

impl RetryEngine {
    pub fn new() -> Self {
        Self
    }

    /// Run `op` under `policy`, returning only the final result.
    pub async fn run<T, F, Fut>(&self, policy: &RetryPolicy, hooks: &RetryHooks, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_recorded("", policy, hooks, None, op).await.result
    }

    /// Run `op` under `policy` on behalf of `provider`, recording every attempt.
    pub async fn run_recorded<T, F, Fut>(
        &self,
        provider: &str,
        policy: &RetryPolicy,
        hooks: &RetryHooks,
        cancel: Option<&CancellationToken>,
        mut op: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempts = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            if cancel.map(|t| t.is_cancelled()).unwrap_or(false) {
                return RetryOutcome {
                    result: Err(Error::Cancelled),
                    attempts,
                };
            }
            attempt += 1;

            let started = Instant::now();
            let res = guarded(op(), policy.attempt_timeout, cancel).await;
            let elapsed = started.elapsed();

            let err = match res {
                Ok(value) => {
                    attempts.push(AttemptRecord::success(provider, attempt, elapsed));
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(Error::Cancelled) => {
                    attempts.push(AttemptRecord::cancelled(provider, attempt, elapsed));
                    return RetryOutcome {
                        result: Err(Error::Cancelled),
                        attempts,
                    };
                }
                Err(e) => e,
            };

            let verdict = classify(&err);
            attempts.push(AttemptRecord::failure(
                provider,
                attempt,
                verdict.kind,
                &err,
                elapsed,
            ));
            hooks.fire_error(&err, attempt);

            let allowed = policy.attempts_allowed_for(verdict.kind).min(max_attempts);
            if !verdict.retryable || attempt >= allowed {
                debug!(
                    provider,
                    attempt,
                    error_kind = verdict.kind.name(),
                    retryable = verdict.retryable,
                    "giving up on provider"
                );
                return RetryOutcome {
                    result: Err(err),
                    attempts,
                };
            }

            let delay = policy.delay_for(attempt);
            warn!(
                provider,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error_kind = verdict.kind.name(),
                error = %err,
                "retrying after failed attempt"
            );

            if !sleep_or_cancel(delay, cancel).await {
                return RetryOutcome {
                    result: Err(Error::Cancelled),
                    attempts,
                };
            }
            hooks.fire_retry(attempt, delay);
        }
    }
}

/// Await one attempt, bounded by the per-attempt timeout and the caller's token.
async fn guarded<T, Fut>(
    fut: Fut,
    timeout: Option<Duration>,
    cancel: Option<&CancellationToken>,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    let bounded = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout {
                    elapsed_ms: limit.as_millis() as u64,
                }),
            },
            None => fut.await,
        }
    };

    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Cancelled),
                res = bounded => res,
            }
        }
        None => bounded.await,
    }
}

/// Returns `false` if the token fired before the delay elapsed.
async fn sleep_or_cancel(delay: Duration, cancel: Option<&CancellationToken>) -> bool {
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            }
        }
        None => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::fallback::AttemptOutcome;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1))
            .with_jitter_ratio(0.0)
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let policy = fast_policy().with_max_attempts(20);
        let mut last = Duration::ZERO;
        for attempt in 1..=20 {
            let d = policy.backoff(attempt);
            assert!(d >= last);
            assert!(d <= policy.max_delay);
            last = d;
        }
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(40), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = fast_policy().with_jitter_ratio(0.25);
        for _ in 0..200 {
            let d = policy.delay_for(2);
            assert!(d >= Duration::from_millis(150));
            assert!(d <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_kind_limits() {
        let policy = RetryPolicy::default().with_max_attempts(5);
        assert_eq!(policy.attempts_allowed_for(ErrorKind::Auth), 1);
        assert_eq!(policy.attempts_allowed_for(ErrorKind::SchemaInvalid), 2);
        assert_eq!(policy.attempts_allowed_for(ErrorKind::Network), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_from_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let engine = RetryEngine::new();
        let outcome = engine
            .run_recorded("p1", &fast_policy(), &RetryHooks::new(), None, || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(Error::provider("connection reset by peer"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(outcome.result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.attempts.len(), 3);
        assert_eq!(outcome.attempts[0].error_kind, Some(ErrorKind::Network));
        assert_eq!(outcome.attempts[2].outcome, AttemptOutcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let policy = fast_policy().with_max_attempts(4);
        let res: Result<()> = RetryEngine::new()
            .run(&policy, &RetryHooks::new(), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(Error::provider("socket hang up"))
                }
            })
            .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let started = Instant::now();
        let res: Result<()> = RetryEngine::new()
            .run(&fast_policy(), &RetryHooks::new(), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(Error::provider_status(401, "invalid api key"))
                }
            })
            .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schema_invalid_is_capped() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let policy = fast_policy().with_max_attempts(5);
        let _: Result<()> = RetryEngine::new()
            .run(&policy, &RetryHooks::new(), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(Error::provider("response did not match schema"))
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hooks_fire() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let retries = Arc::new(Mutex::new(Vec::new()));
        let (e, r) = (errors.clone(), retries.clone());
        let hooks = RetryHooks::new()
            .on_error(move |_, attempt| e.lock().unwrap().push(attempt))
            .on_retry(move |attempt, delay| r.lock().unwrap().push((attempt, delay)));

        let _: Result<()> = RetryEngine::new()
            .run(&fast_policy(), &hooks, || async {
                Err(Error::provider("network unreachable"))
            })
            .await;

        assert_eq!(*errors.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(
            *retries.lock().unwrap(),
            vec![
                (1, Duration::from_millis(100)),
                (2, Duration::from_millis(200))
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout() {
        let policy = fast_policy()
            .with_max_attempts(2)
            .with_attempt_timeout(Duration::from_secs(1));
        let outcome: RetryOutcome<()> = RetryEngine::new()
            .run_recorded("slow", &policy, &RetryHooks::new(), None, || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(matches!(outcome.result, Err(Error::Timeout { .. })));
        assert_eq!(outcome.attempts.len(), 2);
        assert!(outcome
            .attempts
            .iter()
            .all(|a| a.error_kind == Some(ErrorKind::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_policy_bounds_a_hung_attempt() {
        let policy = RetryPolicy::default().with_max_attempts(1);
        assert_eq!(policy.attempt_timeout, Some(DEFAULT_ATTEMPT_TIMEOUT));

        let started = Instant::now();
        let outcome: RetryOutcome<()> = RetryEngine::new()
            .run_recorded("hung", &policy, &RetryHooks::new(), None, || {
                std::future::pending::<Result<()>>()
            })
            .await;
        assert!(matches!(
            outcome.result,
            Err(Error::Timeout { elapsed_ms: 30_000 })
        ));
        assert_eq!(outcome.attempts[0].error_kind, Some(ErrorKind::Timeout));
        assert!(started.elapsed() >= DEFAULT_ATTEMPT_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_attempt_waits_for_cancellation() {
        let policy = RetryPolicy::no_retry().without_attempt_timeout();
        let token = CancellationToken::new();
        let t = token.clone();
        let handle = tokio::spawn(async move {
            RetryEngine::new()
                .run_recorded("hung", &policy, &RetryHooks::new(), Some(&t), || {
                    std::future::pending::<Result<()>>()
                })
                .await
        });
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!handle.is_finished());
        token.cancel();
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome.result, Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let outcome: RetryOutcome<()> = RetryEngine::new()
            .run_recorded("p", &fast_policy(), &RetryHooks::new(), Some(&token), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;
        assert!(matches!(outcome.result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let token = CancellationToken::new();
        let t = token.clone();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let policy = fast_policy().with_base_delay(Duration::from_secs(5));
        let handle = tokio::spawn(async move {
            RetryEngine::new()
                .run_recorded("p", &policy, &RetryHooks::new(), Some(&t), || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(Error::provider("timeout"))
                    }
                })
                .await
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome.result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
