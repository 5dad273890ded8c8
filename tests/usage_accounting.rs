//! Configuration loading and the usage/credit side of the crate.

use ai_orchestra::cache::CacheConfig;
use ai_orchestra::usage::{
    AlertLevel, AnalyticsPeriod, LedgerConfig, Metadata, ModelPricing, PricingTable,
    UsageAnalytics, UsageLedger,
};
use ai_orchestra::{ErrorKind, OrchestratorConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const SAMPLE_CONFIG: &str = r#"
retry:
  max_attempts: 4
  base_delay_ms: 250
  kind_limits:
    schema_invalid: 1
rate_limit:
  limit: 10
  window_ms: 1000
credits:
  initial_balance: 5.0
  warning_threshold: 1.0
  critical_threshold: 0.25
breaker:
  enabled: true
pricing:
  models:
    My-Model:
      input_cost_per_1k: 1.0
      output_cost_per_1k: 2.0
providers:
  flaky:
    retry:
      max_attempts: 6
"#;

#[test]
fn test_yaml_config_maps_to_components() {
    let cfg = OrchestratorConfig::from_yaml_str(SAMPLE_CONFIG).unwrap();

    let policy = cfg.retry_policy();
    assert_eq!(policy.max_attempts, 4);
    assert_eq!(policy.base_delay, Duration::from_millis(250));
    assert_eq!(policy.attempts_allowed_for(ErrorKind::SchemaInvalid), 1);
    // untouched defaults survive
    assert_eq!(policy.attempts_allowed_for(ErrorKind::Auth), 1);

    let providers: HashMap<_, _> = cfg.provider_policies().into_iter().collect();
    assert_eq!(providers["flaky"].max_attempts, 6);

    assert!(cfg.breaker_config().is_some());
    assert_eq!(cfg.rate_limit.window(), Duration::from_secs(1));
    assert_eq!(cfg.ledger_config().initial_balance, 5.0);

    let table = cfg.pricing_table();
    assert_eq!(table.lookup("my-model-v2").input_cost_per_1k, 1.0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = OrchestratorConfig::from_yaml_str(
        "credits:\n  warning_threshold: 1.0\n  critical_threshold: 2.0\n",
    )
    .unwrap_err();
    let ctx = err.context().unwrap();
    assert_eq!(ctx.field_path.as_deref(), Some("credits.critical_threshold"));

    assert!(OrchestratorConfig::from_json_str(r#"{"rate_limit": {"window_ms": 0}}"#).is_err());
}

#[test]
fn test_overrides_take_precedence_over_file() {
    let vars: HashMap<&str, &str> = [("RATE_LIMIT", "3"), ("BREAKER_ENABLED", "false"), ("RETRY_MAX_ATTEMPTS", "nope")]
        .into_iter()
        .collect();
    let cfg = OrchestratorConfig::from_yaml_str(SAMPLE_CONFIG)
        .unwrap()
        .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
        .unwrap();

    assert_eq!(cfg.rate_limit.limit, 3);
    assert!(cfg.breaker_config().is_none());
    // unparsable values are ignored
    assert_eq!(cfg.retry.max_attempts, 4);
}

fn ledger() -> Arc<UsageLedger> {
    Arc::new(UsageLedger::new(
        LedgerConfig::default()
            .with_initial_balance(1.0)
            .with_thresholds(0.5, 0.2),
        PricingTable::builtin(),
    ))
}

#[test]
fn test_ledger_tracks_balance_and_projection() {
    let ledger = ledger();

    let r1 = ledger.record_usage("u1", 0.3, Metadata::new()).unwrap();
    assert_eq!(r1.alert, None);
    let r2 = ledger.record_usage("u1", 0.3, Metadata::new()).unwrap();
    assert_eq!(r2.alert, Some(AlertLevel::Warning));

    let status = ledger.status("u1");
    assert!((status.total_used - 0.6).abs() < 1e-9);
    assert_eq!(status.alerts, vec![AlertLevel::Warning]);
    let projection = status.projection.unwrap();
    assert!(projection.days_until_exhaustion > 0.0);

    // the recorded cost is deducted even past zero
    let r3 = ledger.record_usage("u1", 2.0, Metadata::new()).unwrap();
    assert_eq!(r3.alert, Some(AlertLevel::Depleted));
    assert!(r3.overdrawn);
    assert!(ledger.status("u1").overdrawn);
    let r4 = ledger.record_usage("u1", 0.1, Metadata::new()).unwrap();
    assert_eq!(r4.alert, None);
    assert!(r4.overdrawn);

    ledger.grant("u1", 10.0).unwrap();
    assert!(!ledger.status("u1").overdrawn);

    assert!(ledger.record_usage("u1", -1.0, Metadata::new()).is_err());
}

#[test]
fn test_pricing_swap_applies_to_new_events_only() {
    let ledger = ledger();
    let (_, before) = ledger
        .record_completion("u2", "gpt-4o", 1000, 0, Metadata::new())
        .unwrap();
    assert!((before.total_cost - 0.005).abs() < 1e-9);

    ledger.update_pricing(PricingTable::builtin().with_model("gpt-4o", ModelPricing::new(0.1, 0.1)));
    let (_, after) = ledger
        .record_completion("u2", "gpt-4o", 1000, 0, Metadata::new())
        .unwrap();
    assert!((after.total_cost - 0.1).abs() < 1e-9);

    let costs: Vec<f64> = ledger.events("u2").iter().map(|e| e.cost).collect();
    assert_eq!(costs.len(), 2);
    assert!((costs[0] - 0.005).abs() < 1e-9);
}

#[test]
fn test_analytics_cache_is_invalidated_by_new_usage() {
    let ledger = ledger();
    let analytics = UsageAnalytics::new(ledger.clone(), CacheConfig::default());

    ledger
        .record_completion("u3", "claude-3-haiku", 4000, 800, Metadata::new())
        .unwrap();
    let first = analytics.summary("u3", AnalyticsPeriod::Week);
    assert_eq!(first.events, 1);

    ledger
        .record_completion("u3", "gpt-4o-mini", 100, 100, Metadata::new())
        .unwrap();
    // served from cache until invalidated
    assert_eq!(analytics.summary("u3", AnalyticsPeriod::Week).events, 1);
    assert_eq!(analytics.cache_metrics().hits, 1);

    assert_eq!(analytics.invalidate_user("u3"), 1);
    let fresh = analytics.summary("u3", AnalyticsPeriod::Week);
    assert_eq!(fresh.events, 2);
    assert_eq!(fresh.by_model.len(), 2);
    assert_eq!(fresh.input_units, 4100);
}
