//! 弹性模块：错误分类、重试、多提供商回退、熔断与准入限流。
//!
//! # Resilience Module
//!
//! Everything that decides whether, where and how often a provider call is
//! attempted. None of these pieces performs I/O itself; the caller supplies the
//! operation and the layer only sequences it.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`classifier`] | Maps a failure to an [`ErrorKind`](crate::error_code::ErrorKind) and a retryable flag |
//! | [`retry`] | Bounded attempts with exponential backoff, jitter and cancellation |
//! | [`fallback`] | Ranked provider sequencing with a full attempt trail |
//! | [`circuit_breaker`] | Per-provider cool-down after repeated auth/network/timeout failures |
//! | [`rate_limiter`] | Fixed-window per-key admission gate |
//!
//! ## Fallback with retries
//!
//! ```rust
//! use ai_orchestra::resilience::fallback::{FallbackOptions, FallbackOrchestrator};
//! use ai_orchestra::resilience::retry::RetryPolicy;
//! use ai_orchestra::Error;
//!
//! # async fn demo() {
//! let orchestrator = FallbackOrchestrator::new(RetryPolicy::default());
//! let result = orchestrator
//!     .execute_with_fallback(
//!         &["primary", "secondary"],
//!         FallbackOptions::new("summarize"),
//!         |provider| async move {
//!             if provider == "primary" {
//!                 Err(Error::provider_status(401, "invalid api key"))
//!             } else {
//!                 Ok(format!("answer from {provider}"))
//!             }
//!         },
//!     )
//!     .await;
//! assert_eq!(result.provider.as_deref(), Some("secondary"));
//! # }
//! ```
//!
//! ## Admission
//!
//! ```rust
//! use ai_orchestra::resilience::rate_limiter::FixedWindowRateLimiter;
//! use std::time::Duration;
//!
//! let limiter = FixedWindowRateLimiter::new();
//! assert!(limiter.allow("user-42", 1, Duration::from_secs(60)));
//! assert!(!limiter.allow("user-42", 1, Duration::from_secs(60)));
//! ```

pub mod circuit_breaker;
pub mod classifier;
pub mod fallback;
pub mod rate_limiter;
pub mod retry;
