use crate::models::ModelSpec;
use crate::resilience::fallback::AttemptRecord;
use crate::usage::{CostEstimate, Metadata, UsageReceipt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Billable units reported by a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_units: u64,
    pub output_units: u64,
}

impl TokenUsage {
    pub fn new(input_units: u64, output_units: u64) -> Self {
        Self {
            input_units,
            output_units,
        }
    }
}

/// Implemented by operation results that can report their usage.
pub trait Metered {
    fn usage(&self) -> Option<TokenUsage> {
        None
    }
}

impl Metered for () {}
impl Metered for String {}

/// Reads an OpenAI- or Anthropic-shaped `usage` object, if present.
impl Metered for serde_json::Value {
    fn usage(&self) -> Option<TokenUsage> {
        let usage = self.get("usage")?;
        let pick = |names: &[&str]| names.iter().find_map(|n| usage.get(*n)?.as_u64());
        let input = pick(&["input_tokens", "prompt_tokens"]);
        let output = pick(&["output_tokens", "completion_tokens"]);
        if input.is_none() && output.is_none() {
            return None;
        }
        Some(TokenUsage::new(input.unwrap_or(0), output.unwrap_or(0)))
    }
}

/// A value paired with explicit usage.
#[derive(Debug, Clone, PartialEq)]
pub struct WithUsage<T> {
    pub value: T,
    pub usage: TokenUsage,
}

impl<T> WithUsage<T> {
    pub fn new(value: T, usage: TokenUsage) -> Self {
        Self { value, usage }
    }
}

impl<T> Metered for WithUsage<T> {
    fn usage(&self) -> Option<TokenUsage> {
        Some(self.usage)
    }
}

/// One candidate backend for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRoute {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl ProviderRoute {
    pub fn new(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.trim().to_ascii_lowercase(),
            model: model.trim().to_string(),
            settings: BTreeMap::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    pub(crate) fn spec(&self, context: &str) -> ModelSpec {
        let mut spec = ModelSpec::new(&self.provider, &self.model, context);
        spec.settings = self.settings.clone();
        spec
    }
}

/// One logical request handed to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct OrchestrationRequest {
    pub user_id: String,
    /// Rate-limit key; the user id when unset.
    pub admission_key: Option<String>,
    /// Candidates in rank order.
    pub routes: Vec<ProviderRoute>,
    pub context: String,
    pub preferred_provider: Option<String>,
    pub operation_name: String,
    pub metadata: Metadata,
    pub cancel: Option<CancellationToken>,
}

impl OrchestrationRequest {
    pub fn new(user_id: impl Into<String>, operation_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn route(mut self, provider: &str, model: &str) -> Self {
        self.routes.push(ProviderRoute::new(provider, model));
        self
    }

    pub fn with_route(mut self, route: ProviderRoute) -> Self {
        self.routes.push(route);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_admission_key(mut self, key: impl Into<String>) -> Self {
        self.admission_key = Some(key.into());
        self
    }

    pub fn with_preferred_provider(mut self, provider: &str) -> Self {
        self.preferred_provider = Some(provider.trim().to_ascii_lowercase());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<crate::usage::MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn admission_key(&self) -> &str {
        self.admission_key.as_deref().unwrap_or(&self.user_id)
    }
}

/// Successful orchestration outcome.
#[derive(Debug)]
pub struct Completion<T> {
    pub call_id: String,
    pub value: T,
    pub provider: String,
    pub model: String,
    pub attempts: Vec<AttemptRecord>,
    /// Ledger receipt when the value reported usage.
    pub receipt: Option<UsageReceipt>,
    pub cost: Option<CostEstimate>,
}

/// What happened to a request.
///
/// Admission rejection is a decision, not an error, so it is a variant here
/// rather than an `Err`.
#[derive(Debug)]
pub enum Dispatch<T> {
    Completed(Completion<T>),
    RateLimited {
        key: String,
        limit: u32,
        retry_after_ms: Option<u64>,
    },
}

impl<T> Dispatch<T> {
    pub fn completion(self) -> Option<Completion<T>> {
        match self {
            Dispatch::Completed(c) => Some(c),
            Dispatch::RateLimited { .. } => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Dispatch::RateLimited { .. })
    }
}
