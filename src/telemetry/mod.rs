//! 遥测模块：日志初始化与可选的编排事件接收器。
//!
//! Telemetry for the orchestration layer.
//!
//! Structured logs go through `tracing`; [`init_tracing`] installs a default
//! subscriber for binaries and tests. Applications that want the raw
//! orchestration facts (attempt trails, admission rejections, credit alerts)
//! can additionally plug in an [`EventSink`]. Nothing is collected unless a
//! sink is configured.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`OrchestrationEvent`] | Typed event emitted by the orchestrator |
//! | [`EventSink`] | Trait for event destinations |
//! | [`NoopEventSink`] | Default sink (no collection) |
//! | [`InMemoryEventSink`] | Bounded in-memory sink for testing |
//! | [`CompositeEventSink`] | Fan-out to several sinks |

use crate::resilience::fallback::{now_ms, AttemptRecord};
use crate::usage::AlertLevel;
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "ai_orchestra=info";

/// Install a `fmt` subscriber filtered by `RUST_LOG`.
///
/// Returns `false` if a global subscriber was already set.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    Completed {
        call_id: String,
        operation: String,
        provider: String,
        model: String,
        attempts: Vec<AttemptRecord>,
        timestamp_ms: u64,
    },
    Exhausted {
        call_id: String,
        operation: String,
        attempts: Vec<AttemptRecord>,
        last_error: String,
        timestamp_ms: u64,
    },
    RateLimited {
        key: String,
        limit: u32,
        timestamp_ms: u64,
    },
    CreditAlert {
        user_id: String,
        level: AlertLevel,
        balance: f64,
        timestamp_ms: u64,
    },
}

impl OrchestrationEvent {
    pub fn rate_limited(key: impl Into<String>, limit: u32) -> Self {
        Self::RateLimited {
            key: key.into(),
            limit,
            timestamp_ms: now_ms(),
        }
    }

    pub fn credit_alert(user_id: impl Into<String>, level: AlertLevel, balance: f64) -> Self {
        Self::CreditAlert {
            user_id: user_id.into(),
            level,
            balance,
            timestamp_ms: now_ms(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Exhausted { .. } => "exhausted",
            Self::RateLimited { .. } => "rate_limited",
            Self::CreditAlert { .. } => "credit_alert",
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn report(&self, event: OrchestrationEvent) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn report(&self, _event: OrchestrationEvent) -> Result<()> {
        Ok(())
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoopEventSink)
}

/// In-memory sink for testing; keeps the most recent `max` events.
pub struct InMemoryEventSink {
    events: RwLock<VecDeque<OrchestrationEvent>>,
    max_events: usize,
}

impl InMemoryEventSink {
    pub fn new(max: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            max_events: max.max(1),
        }
    }

    pub fn events(&self) -> Vec<OrchestrationEvent> {
        self.events
            .read()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn events_of(&self, kind: &str) -> Vec<OrchestrationEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind() == kind)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut e) = self.events.write() {
            e.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn report(&self, event: OrchestrationEvent) -> Result<()> {
        let mut events = self
            .events
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
        Ok(())
    }
}

/// Composite sink for multiple destinations. A failing sink does not stop
/// delivery to the others.
#[derive(Default)]
pub struct CompositeEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl EventSink for CompositeEventSink {
    async fn report(&self, event: OrchestrationEvent) -> Result<()> {
        for s in &self.sinks {
            let _ = s.report(event.clone()).await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        for s in &self.sinks {
            let _ = s.close().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_sink_is_bounded() {
        let sink = InMemoryEventSink::new(2);
        for i in 0..3 {
            sink.report(OrchestrationEvent::rate_limited(format!("k{i}"), 1))
                .await
                .unwrap();
        }
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], OrchestrationEvent::RateLimited { key, .. } if key == "k1"));
    }

    #[tokio::test]
    async fn test_composite_fans_out() {
        let a = Arc::new(InMemoryEventSink::new(10));
        let b = Arc::new(InMemoryEventSink::new(10));
        let composite = CompositeEventSink::new()
            .add_sink(a.clone())
            .add_sink(noop_sink())
            .add_sink(b.clone());
        composite
            .report(OrchestrationEvent::credit_alert("u", AlertLevel::Warning, 10.0))
            .await
            .unwrap();
        assert_eq!(a.events_of("credit_alert").len(), 1);
        assert_eq!(b.len(), 1);
        composite.close().await.unwrap();
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(OrchestrationEvent::rate_limited("k", 5)).unwrap();
        assert_eq!(json["type"], "rate_limited");
        assert_eq!(json["limit"], 5);
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        assert!(!init_tracing());
    }
}
