//! Model pricing and cost estimation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".into()
}

impl ModelPricing {
    pub fn new(input: f64, output: f64) -> Self {
        Self {
            input_cost_per_1k: input,
            output_cost_per_1k: output,
            currency: default_currency(),
        }
    }

    pub fn calculate_cost(&self, model: &str, input_units: u64, output_units: u64) -> CostEstimate {
        let ic = (input_units as f64 / 1000.0) * self.input_cost_per_1k;
        let oc = (output_units as f64 / 1000.0) * self.output_cost_per_1k;
        CostEstimate {
            model: model.to_string(),
            input_units,
            output_units,
            input_cost: ic,
            output_cost: oc,
            total_cost: ic + oc,
            currency: self.currency.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub model: String,
    pub input_units: u64,
    pub output_units: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub currency: String,
}

impl CostEstimate {
    pub fn format(&self) -> String {
        format!("{} {:.6}", self.currency, self.total_cost)
    }
}

/// Static model-id to unit-cost mapping with a catch-all default entry.
///
/// Lookup order: exact id, then the longest configured id that prefixes the
/// requested one (so `gpt-4o-mini-2024-07-18` prices as `gpt-4o-mini`), then
/// `default`. Ids are compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    #[serde(default)]
    pub models: BTreeMap<String, ModelPricing>,
    #[serde(default = "default_entry")]
    pub default: ModelPricing,
}

fn default_entry() -> ModelPricing {
    ModelPricing::new(0.002, 0.006)
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PricingTable {
    pub fn new(default: ModelPricing) -> Self {
        Self {
            models: BTreeMap::new(),
            default,
        }
    }

    /// Table preloaded with common hosted models.
    pub fn builtin() -> Self {
        Self::new(default_entry())
            .with_model("gpt-4o", ModelPricing::new(0.005, 0.015))
            .with_model("gpt-4o-mini", ModelPricing::new(0.00015, 0.0006))
            .with_model("claude-3-5-sonnet", ModelPricing::new(0.003, 0.015))
            .with_model("claude-3-haiku", ModelPricing::new(0.00025, 0.00125))
    }

    pub fn with_model(mut self, model: &str, pricing: ModelPricing) -> Self {
        self.models.insert(model.trim().to_ascii_lowercase(), pricing);
        self
    }

    pub fn lookup(&self, model: &str) -> &ModelPricing {
        let id = model.trim().to_ascii_lowercase();
        let mut best: Option<(usize, &ModelPricing)> = None;
        for (key, pricing) in &self.models {
            let key = key.to_ascii_lowercase();
            if key == id {
                return pricing;
            }
            if id.starts_with(&key) && best.map_or(true, |(len, _)| key.len() > len) {
                best = Some((key.len(), pricing));
            }
        }
        best.map(|(_, p)| p).unwrap_or(&self.default)
    }

    pub fn cost(&self, model: &str, input_units: u64, output_units: u64) -> CostEstimate {
        self.lookup(model)
            .calculate_cost(model, input_units, output_units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_order() {
        let table = PricingTable::builtin();
        assert_eq!(table.lookup("gpt-4o").input_cost_per_1k, 0.005);
        assert_eq!(
            table.lookup("GPT-4o-mini-2024-07-18").input_cost_per_1k,
            0.00015
        );
        assert_eq!(table.lookup("mistral-large"), &table.default);
    }

    #[test]
    fn test_cost() {
        let table = PricingTable::new(ModelPricing::new(1.0, 2.0));
        let est = table.cost("anything", 1500, 500);
        assert!((est.input_cost - 1.5).abs() < 1e-9);
        assert!((est.output_cost - 1.0).abs() < 1e-9);
        assert!((est.total_cost - 2.5).abs() < 1e-9);
        assert_eq!(est.format(), "USD 2.500000");
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let yaml = r#"
models:
  Local-Llama:
    input_cost_per_1k: 0.0
    output_cost_per_1k: 0.0
default:
  input_cost_per_1k: 0.01
  output_cost_per_1k: 0.03
"#;
        let table: PricingTable = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(table.default.currency, "USD");
        assert_eq!(table.cost("local-llama", 10_000, 10_000).total_cost, 0.0);
        assert!(table.models.contains_key("Local-Llama"));
    }
}
