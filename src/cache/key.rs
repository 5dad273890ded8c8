//! Cache key generation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    /// Plain `a:b:c` key for small, already-normalized components.
    pub fn composite(parts: &[&str]) -> Self {
        Self::new(parts.join(":"))
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Hashes a canonical JSON rendering of named components.
///
/// Components are kept in a `BTreeMap`, so insertion order never changes the
/// resulting key.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn generate(&self, mut parts: BTreeMap<String, serde_json::Value>) -> CacheKey {
        if let Some(ref s) = self.salt {
            parts.insert("salt".into(), serde_json::Value::String(s.clone()));
        }
        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        CacheKey::new(sha256_hex(canonical.as_bytes()))
    }

    /// Key for a resolved model binding: provider, model, context tag and any
    /// settings that change how the binding is built.
    pub fn for_model(
        &self,
        provider: &str,
        model: &str,
        context: &str,
        settings: &BTreeMap<String, serde_json::Value>,
    ) -> CacheKey {
        let mut parts = BTreeMap::new();
        parts.insert("provider".to_string(), provider.into());
        parts.insert("model".to_string(), model.into());
        parts.insert("context".to_string(), context.into());
        if !settings.is_empty() {
            parts.insert(
                "settings".to_string(),
                serde_json::to_value(settings).unwrap_or_default(),
            );
        }
        self.generate(parts)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
