//! 用量模块：定价、用量账本、额度告警与用量分析。
//!
//! # Usage Module
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`PricingTable`] | Model id → per-1k unit cost, with a default entry |
//! | [`UsageLedger`] | Per-principal balances, event history, alerts and projection |
//! | [`UsageAnalytics`] | Cached per-period summaries derived from the ledger |
//!
//! ## Example
//!
//! ```rust
//! use ai_orchestra::usage::{LedgerConfig, Metadata, PricingTable, UsageLedger};
//!
//! let ledger = UsageLedger::new(LedgerConfig::default(), PricingTable::builtin());
//! let receipt = ledger.record_usage("user-1", 1.25, Metadata::new()).unwrap();
//! assert!(receipt.success);
//! let status = ledger.status("user-1");
//! assert_eq!(status.total_used, 1.25);
//! ```

pub mod analytics;
pub mod ledger;
pub mod pricing;

pub use analytics::{AnalyticsPeriod, ModelUsage, UsageAnalytics, UsageSummary};
pub use ledger::{
    AlertLevel, CreditBalance, CreditLedger, CreditStatus, LedgerConfig, Metadata, MetadataValue,
    Projection, UsageEvent, UsageLedger, UsageReceipt,
};
pub use pricing::{CostEstimate, ModelPricing, PricingTable};
