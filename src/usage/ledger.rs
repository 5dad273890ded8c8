//! Usage ledger and credit tracking.
//!
//! Every billable completion becomes an immutable [`UsageEvent`]; each
//! principal's [`CreditBalance`] is updated atomically with it. Alerts are
//! advisory: recording never refuses, it only raises severity.

use super::pricing::{CostEstimate, PricingTable};
use crate::resilience::fallback::now_ms;
use crate::{Error, ErrorContext, Result};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Primitive metadata value attached to a usage event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
    Null,
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<u64> for MetadataValue {
    fn from(n: u64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// One billable consumption record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: String,
    pub user_id: String,
    pub model: Option<String>,
    pub input_units: u64,
    pub output_units: u64,
    pub cost: f64,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditBalance {
    pub balance: f64,
    pub total_used: f64,
    pub last_updated_ms: u64,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
}

impl CreditBalance {
    /// Balance below zero; must be surfaced wherever the balance is shown.
    pub fn is_overdrawn(&self) -> bool {
        self.balance < 0.0
    }

    /// Active alert levels, least severe first.
    pub fn alerts(&self) -> Vec<AlertLevel> {
        AlertLevel::ALL
            .into_iter()
            .filter(|level| self.balance <= level.threshold(self))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Critical,
    Depleted,
}

impl AlertLevel {
    pub const ALL: [AlertLevel; 3] = [AlertLevel::Warning, AlertLevel::Critical, AlertLevel::Depleted];

    fn threshold(&self, balance: &CreditBalance) -> f64 {
        match self {
            AlertLevel::Warning => balance.warning_threshold,
            AlertLevel::Critical => balance.critical_threshold,
            AlertLevel::Depleted => 0.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
            AlertLevel::Depleted => "depleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReceipt {
    pub success: bool,
    pub new_balance: f64,
    /// Set on every event that leaves the balance below zero.
    pub overdrawn: bool,
    /// Most severe level crossed by this event, if any.
    pub alert: Option<AlertLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub average_daily_cost: f64,
    pub days_until_exhaustion: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditStatus {
    pub user_id: String,
    pub balance: f64,
    pub total_used: f64,
    pub overdrawn: bool,
    pub alerts: Vec<AlertLevel>,
    /// `None` when nothing was spent inside the projection window.
    pub projection: Option<Projection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    pub initial_balance: f64,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub projection_window_days: u32,
    /// Oldest events beyond this are dropped from a user's history.
    pub max_events_per_user: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_balance: 100.0,
            warning_threshold: 20.0,
            critical_threshold: 5.0,
            projection_window_days: 7,
            max_events_per_user: 1000,
        }
    }
}

impl LedgerConfig {
    pub fn with_initial_balance(mut self, balance: f64) -> Self {
        self.initial_balance = balance;
        self
    }

    pub fn with_thresholds(mut self, warning: f64, critical: f64) -> Self {
        self.warning_threshold = warning;
        self.critical_threshold = critical;
        self
    }

    pub fn with_projection_window_days(mut self, days: u32) -> Self {
        self.projection_window_days = days.max(1);
        self
    }

    pub fn with_max_events_per_user(mut self, n: usize) -> Self {
        self.max_events_per_user = n.max(1);
        self
    }
}

struct Account {
    credit: CreditBalance,
    events: VecDeque<UsageEvent>,
}

/// Ledger interface, so a shared external store can stand in for the
/// process-local implementation.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn record(&self, user_id: &str, cost: f64, metadata: Metadata) -> Result<UsageReceipt>;

    /// Price a completion and debit it.
    async fn record_completion(
        &self,
        user_id: &str,
        model: &str,
        input_units: u64,
        output_units: u64,
        metadata: Metadata,
    ) -> Result<(UsageReceipt, CostEstimate)>;

    async fn credit_status(&self, user_id: &str) -> CreditStatus;
}

/// Process-local ledger keyed by principal.
pub struct UsageLedger {
    config: LedgerConfig,
    accounts: DashMap<String, Account>,
    pricing: ArcSwap<PricingTable>,
}

impl UsageLedger {
    pub fn new(config: LedgerConfig, pricing: PricingTable) -> Self {
        Self {
            config,
            accounts: DashMap::new(),
            pricing: ArcSwap::from_pointee(pricing),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn pricing(&self) -> Arc<PricingTable> {
        self.pricing.load_full()
    }

    /// Replace the pricing table; in-flight pricing keeps the old snapshot.
    pub fn update_pricing(&self, pricing: PricingTable) {
        self.pricing.store(Arc::new(pricing));
        debug!("pricing table replaced");
    }

    fn new_account(&self, now: u64) -> Account {
        Account {
            credit: CreditBalance {
                balance: self.config.initial_balance,
                total_used: 0.0,
                last_updated_ms: now,
                warning_threshold: self.config.warning_threshold,
                critical_threshold: self.config.critical_threshold,
            },
            events: VecDeque::new(),
        }
    }

    /// Debit `cost` from `user_id`. The balance may go negative.
    pub fn record_usage(&self, user_id: &str, cost: f64, metadata: Metadata) -> Result<UsageReceipt> {
        let event = UsageEvent {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            model: None,
            input_units: 0,
            output_units: 0,
            cost,
            timestamp_ms: now_ms(),
            metadata,
        };
        self.record_event(event)
    }

    /// Price a completion from the current table and record it.
    pub fn record_completion(
        &self,
        user_id: &str,
        model: &str,
        input_units: u64,
        output_units: u64,
        metadata: Metadata,
    ) -> Result<(UsageReceipt, CostEstimate)> {
        let estimate = self.pricing.load().cost(model, input_units, output_units);
        let event = UsageEvent {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            model: Some(model.to_string()),
            input_units,
            output_units,
            cost: estimate.total_cost,
            timestamp_ms: now_ms(),
            metadata,
        };
        let receipt = self.record_event(event)?;
        Ok((receipt, estimate))
    }

    /// Append a fully-formed event and apply it to the user's balance.
    pub fn record_event(&self, event: UsageEvent) -> Result<UsageReceipt> {
        if !event.cost.is_finite() || event.cost < 0.0 {
            return Err(Error::validation_with_context(
                format!("usage cost must be a finite, non-negative number, got {}", event.cost),
                ErrorContext::new()
                    .with_field_path("cost")
                    .with_source("usage_ledger"),
            ));
        }
        if event.user_id.trim().is_empty() {
            return Err(Error::validation_with_context(
                "user id must not be empty",
                ErrorContext::new()
                    .with_field_path("user_id")
                    .with_source("usage_ledger"),
            ));
        }

        let now = event.timestamp_ms;
        let mut account = self
            .accounts
            .entry(event.user_id.clone())
            .or_insert_with(|| self.new_account(now));

        let before = account.credit.alerts();
        account.credit.balance -= event.cost;
        account.credit.total_used += event.cost;
        account.credit.last_updated_ms = account.credit.last_updated_ms.max(now);
        let after = account.credit.alerts();
        let new_balance = account.credit.balance;

        account.events.push_back(event);
        while account.events.len() > self.config.max_events_per_user {
            account.events.pop_front();
        }
        let user_id = account.key().clone();
        drop(account);

        let alert = after.into_iter().filter(|l| !before.contains(l)).max();
        if let Some(level) = alert {
            warn!(
                user_id = user_id.as_str(),
                level = level.name(),
                balance = new_balance,
                "credit threshold crossed"
            );
        }
        Ok(UsageReceipt {
            success: true,
            new_balance,
            overdrawn: new_balance < 0.0,
            alert,
        })
    }

    /// Top up a user's credit.
    pub fn grant(&self, user_id: &str, amount: f64) -> Result<f64> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(Error::validation_with_context(
                format!("grant amount must be positive, got {}", amount),
                ErrorContext::new()
                    .with_field_path("amount")
                    .with_source("usage_ledger"),
            ));
        }
        let now = now_ms();
        let mut account = self
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| self.new_account(now));
        account.credit.balance += amount;
        account.credit.last_updated_ms = now;
        Ok(account.credit.balance)
    }

    /// Override alert thresholds for one user.
    pub fn set_thresholds(&self, user_id: &str, warning: f64, critical: f64) -> Result<()> {
        if !(warning.is_finite() && critical.is_finite()) || critical > warning {
            return Err(Error::validation_with_context(
                "critical threshold must not exceed the warning threshold",
                ErrorContext::new()
                    .with_field_path("thresholds")
                    .with_details(format!("warning={warning}, critical={critical}"))
                    .with_source("usage_ledger"),
            ));
        }
        let now = now_ms();
        let mut account = self
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| self.new_account(now));
        account.credit.warning_threshold = warning;
        account.credit.critical_threshold = critical;
        Ok(())
    }

    pub fn balance(&self, user_id: &str) -> Option<CreditBalance> {
        self.accounts.get(user_id).map(|a| a.credit.clone())
    }

    /// Retained history for a user, oldest first.
    pub fn events(&self, user_id: &str) -> Vec<UsageEvent> {
        self.accounts
            .get(user_id)
            .map(|a| a.events.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn status(&self, user_id: &str) -> CreditStatus {
        self.status_at(user_id, now_ms())
    }

    /// Status as of `now_ms`; untracked users report the initial balance.
    pub fn status_at(&self, user_id: &str, now_ms: u64) -> CreditStatus {
        let window_ms = u64::from(self.config.projection_window_days.max(1)) * DAY_MS;
        let since = now_ms.saturating_sub(window_ms);

        let (credit, window_spend) = match self.accounts.get(user_id) {
            Some(account) => {
                let spend: f64 = account
                    .events
                    .iter()
                    .filter(|e| e.timestamp_ms >= since && e.timestamp_ms <= now_ms)
                    .map(|e| e.cost)
                    .sum();
                (account.credit.clone(), spend)
            }
            None => (self.new_account(now_ms).credit, 0.0),
        };

        let projection = if window_spend > 0.0 {
            let average = window_spend / f64::from(self.config.projection_window_days.max(1));
            Some(Projection {
                average_daily_cost: average,
                days_until_exhaustion: if credit.balance <= 0.0 {
                    0.0
                } else {
                    credit.balance / average
                },
            })
        } else {
            None
        };

        CreditStatus {
            user_id: user_id.to_string(),
            balance: credit.balance,
            total_used: credit.total_used,
            overdrawn: credit.is_overdrawn(),
            alerts: credit.alerts(),
            projection,
        }
    }

    /// Number of tracked principals.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new(LedgerConfig::default(), PricingTable::builtin())
    }
}

#[async_trait]
impl CreditLedger for UsageLedger {
    async fn record(&self, user_id: &str, cost: f64, metadata: Metadata) -> Result<UsageReceipt> {
        self.record_usage(user_id, cost, metadata)
    }

    async fn record_completion(
        &self,
        user_id: &str,
        model: &str,
        input_units: u64,
        output_units: u64,
        metadata: Metadata,
    ) -> Result<(UsageReceipt, CostEstimate)> {
        UsageLedger::record_completion(self, user_id, model, input_units, output_units, metadata)
    }

    async fn credit_status(&self, user_id: &str) -> CreditStatus {
        self.status(user_id)
    }
}
