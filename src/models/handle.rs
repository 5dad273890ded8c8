use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Normalized description of the model binding a caller asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider: String,
    pub model: String,
    /// Free-form usage tag, e.g. `chat` or `embedding`.
    #[serde(default)]
    pub context: String,
    /// Settings that change how the binding is built (region, endpoint, ...).
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl ModelSpec {
    pub fn new(provider: &str, model: &str, context: &str) -> Self {
        Self {
            provider: normalize(provider),
            model: model.trim().to_string(),
            context: normalize(context),
            settings: BTreeMap::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// `provider/model`
    pub fn id(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

/// Ready-to-call binding of one model under one provider.
///
/// Handles are immutable apart from their last-used stamp; invalidation
/// replaces the cache slot rather than touching a handle other callers hold.
#[derive(Debug)]
pub struct ModelHandle<B> {
    pub provider: String,
    pub model: String,
    pub context: String,
    /// Hex digest identifying the spec this handle was built from.
    pub config_hash: String,
    /// Unix epoch milliseconds.
    pub created_at_ms: u64,
    last_used_at_ms: AtomicU64,
    binding: Arc<B>,
}

impl<B> ModelHandle<B> {
    pub(crate) fn new(spec: &ModelSpec, config_hash: String, binding: B, now_ms: u64) -> Self {
        Self {
            provider: spec.provider.clone(),
            model: spec.model.clone(),
            context: spec.context.clone(),
            config_hash,
            created_at_ms: now_ms,
            last_used_at_ms: AtomicU64::new(now_ms),
            binding: Arc::new(binding),
        }
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }

    pub fn binding_arc(&self) -> Arc<B> {
        self.binding.clone()
    }

    pub fn last_used_at_ms(&self) -> u64 {
        self.last_used_at_ms.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self, now_ms: u64) {
        self.last_used_at_ms.fetch_max(now_ms, Ordering::Relaxed);
    }
}

/// Builds the provider-specific binding for a [`ModelSpec`].
///
/// Construction may fail (missing credentials, unreachable endpoint); the
/// resolver classifies the failure and surfaces it as
/// [`Error::ModelResolution`](crate::Error::ModelResolution).
#[async_trait]
pub trait HandleFactory: Send + Sync + 'static {
    type Binding: Send + Sync + 'static;

    async fn build(&self, spec: &ModelSpec) -> Result<Self::Binding>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_normalization() {
        let spec = ModelSpec::new("  OpenAI ", " gpt-4o ", "Chat");
        assert_eq!(spec.provider, "openai");
        assert_eq!(spec.model, "gpt-4o");
        assert_eq!(spec.context, "chat");
        assert_eq!(spec.id(), "openai/gpt-4o");
    }

    #[test]
    fn test_touch_is_monotonic() {
        let spec = ModelSpec::new("p", "m", "");
        let handle = ModelHandle::new(&spec, "h".into(), (), 100);
        handle.touch(200);
        handle.touch(150);
        assert_eq!(handle.last_used_at_ms(), 200);
        assert_eq!(handle.created_at_ms, 100);
    }
}
