//! # ai-orchestra
//!
//! 面向多提供商 AI 调用的请求编排与弹性层：错误分类、重试、回退、准入限流与额度跟踪。
//!
//! Request orchestration and resilience layer for multi-provider AI calls.
//!
//! ## Overview
//!
//! The crate never talks to a model provider itself. Callers hand it an
//! operation ("make this request against provider X") and it decides whether
//! to run it at all, against which provider, how often, and what it cost:
//!
//! 1. the **rate limiter** admits or rejects the request per key;
//! 2. the **model resolver** returns a cached, ready-to-call handle;
//! 3. the **fallback orchestrator** walks the ranked providers, driving the
//!    **retry engine** per provider using the **error classifier**'s verdicts;
//! 4. successful completions are priced and recorded in the **usage ledger**;
//!    derived analytics are memoized in a **TTL cache**.
//!
//! All state is in-memory, per process, held by explicitly constructed
//! service objects.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_orchestra::models::{HandleFactory, ModelSpec};
//! use ai_orchestra::{OrchestrationRequest, OrchestratorBuilder, OrchestratorConfig, WithUsage, TokenUsage};
//! use async_trait::async_trait;
//!
//! struct Clients;
//!
//! #[async_trait]
//! impl HandleFactory for Clients {
//!     type Binding = String;
//!     async fn build(&self, spec: &ModelSpec) -> ai_orchestra::Result<String> {
//!         Ok(format!("https://api.example.com/{}", spec.id()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> ai_orchestra::Result<()> {
//!     let orchestrator = OrchestratorBuilder::new(Clients)
//!         .config(OrchestratorConfig::default())
//!         .build()?;
//!
//!     let request = OrchestrationRequest::new("user-1", "summarize")
//!         .route("openai", "gpt-4o")
//!         .route("anthropic", "claude-3-5-sonnet");
//!
//!     let dispatch = orchestrator
//!         .execute(request, |handle| async move {
//!             // perform the real backend call with `handle.binding()`
//!             Ok(WithUsage::new(format!("done by {}", handle.provider), TokenUsage::new(120, 40)))
//!         })
//!         .await?;
//!
//!     if let Some(done) = dispatch.completion() {
//!         println!("{} via {} after {} attempts", done.value.value, done.provider, done.attempts.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error_code`] | Closed failure taxonomy ([`ErrorKind`]) |
//! | [`resilience`] | Classifier, retry engine, fallback, circuit breaker, rate limiter |
//! | [`models`] | Model specs, handles and the caching resolver |
//! | [`cache`] | Generic TTL cache and cache keys |
//! | [`usage`] | Pricing, usage ledger, credit alerts and analytics |
//! | [`client`] | The [`Orchestrator`] facade and its builder |
//! | [`config`] | Serde-backed configuration with env overrides |
//! | [`telemetry`] | Tracing setup and orchestration event sinks |

pub mod cache;
pub mod client;
pub mod config;
pub mod error_code;
pub mod models;
pub mod resilience;
pub mod telemetry;
pub mod usage;

// Re-export main types for convenience
pub use client::{
    Completion, Dispatch, Metered, OrchestrationRequest, Orchestrator, OrchestratorBuilder,
    ProviderRoute, SignalsSnapshot, TokenUsage, WithUsage,
};
pub use config::OrchestratorConfig;
pub use error_code::ErrorKind;
pub use resilience::classifier::{classify, Classification};
pub use resilience::fallback::{AttemptOutcome, AttemptRecord, FallbackResult};
pub use resilience::retry::RetryPolicy;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
