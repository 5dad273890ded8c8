//! Derived usage summaries, memoized per `user:period`.

use super::ledger::UsageLedger;
use crate::cache::{CacheConfig, CacheMetrics, TtlCache};
use crate::resilience::fallback::now_ms;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsPeriod {
    Day,
    Week,
    Month,
    All,
}

impl AnalyticsPeriod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::All => "all",
        }
    }

    /// Window length, `None` for the whole retained history.
    pub fn window_ms(&self) -> Option<u64> {
        match self {
            Self::Day => Some(DAY_MS),
            Self::Week => Some(7 * DAY_MS),
            Self::Month => Some(30 * DAY_MS),
            Self::All => None,
        }
    }
}

impl FromStr for AnalyticsPeriod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "all" => Ok(Self::All),
            other => Err(Error::validation_with_context(
                format!("unknown analytics period '{}'", other),
                ErrorContext::new()
                    .with_field_path("period")
                    .with_details("expected day, week, month or all"),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelUsage {
    pub events: u64,
    pub cost: f64,
    pub input_units: u64,
    pub output_units: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub user_id: String,
    pub period: AnalyticsPeriod,
    pub events: u64,
    pub total_cost: f64,
    pub input_units: u64,
    pub output_units: u64,
    /// Keyed by model id; events without a model are grouped under `unattributed`.
    pub by_model: BTreeMap<String, ModelUsage>,
    pub computed_at_ms: u64,
}

/// Read-side view over a [`UsageLedger`].
pub struct UsageAnalytics {
    ledger: Arc<UsageLedger>,
    cache: TtlCache<(String, AnalyticsPeriod), UsageSummary>,
}

impl UsageAnalytics {
    pub fn new(ledger: Arc<UsageLedger>, cache: CacheConfig) -> Self {
        Self {
            ledger,
            cache: TtlCache::new("usage_analytics", cache),
        }
    }

    pub fn summary(&self, user_id: &str, period: AnalyticsPeriod) -> UsageSummary {
        let key = (user_id.to_string(), period);
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }
        let summary = self.compute(user_id, period, now_ms());
        self.cache.set(key, summary.clone());
        summary
    }

    fn compute(&self, user_id: &str, period: AnalyticsPeriod, now: u64) -> UsageSummary {
        let since = period.window_ms().map(|w| now.saturating_sub(w));
        let mut summary = UsageSummary {
            user_id: user_id.to_string(),
            period,
            events: 0,
            total_cost: 0.0,
            input_units: 0,
            output_units: 0,
            by_model: BTreeMap::new(),
            computed_at_ms: now,
        };
        for event in self.ledger.events(user_id) {
            if since.map_or(false, |s| event.timestamp_ms < s) {
                continue;
            }
            summary.events += 1;
            summary.total_cost += event.cost;
            summary.input_units += event.input_units;
            summary.output_units += event.output_units;
            let model = event.model.as_deref().unwrap_or("unattributed");
            let slot = summary.by_model.entry(model.to_string()).or_default();
            slot.events += 1;
            slot.cost += event.cost;
            slot.input_units += event.input_units;
            slot.output_units += event.output_units;
        }
        summary
    }

    /// Drop every cached summary for `user_id`; called after new usage lands.
    pub fn invalidate_user(&self, user_id: &str) -> usize {
        self.cache.invalidate_where(|(user, _)| user == user_id)
    }

    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }
}
