//! Domain events and telemetry ports.
//!
//! Engines publish events through an [`EventPublisher`] handed to them at
//! construction, keeping the estimation and protection algorithms free of
//! transport concerns. Telemetry records flow to an injected
//! [`TelemetrySink`] with a `flush()` drain contract at shutdown.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::MarketRegime;

/// All domain events observable by the external alerting/orchestration layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskEvent {
    /// A VaR estimate completed.
    VarCalculated {
        /// Portfolio the estimate covers.
        portfolio_id: String,
        /// Methodology tag.
        methodology: String,
        /// Confidence level.
        confidence: f64,
        /// VaR in currency.
        value: f64,
        /// When the event occurred.
        occurred_at: DateTime<Utc>,
    },
    /// A calculation failed on degenerate inputs.
    CalculationFailed {
        /// The methodology, scenario, or position that triggered it.
        context: String,
        /// Failure description.
        message: String,
        /// When the event occurred.
        occurred_at: DateTime<Utc>,
    },
    /// A stress scenario finished.
    StressTestCompleted {
        /// Portfolio tested.
        portfolio_id: String,
        /// Scenario name.
        scenario: String,
        /// Estimated loss in currency.
        loss: f64,
        /// Whether the scenario breached the liquidation loss threshold.
        liquidation_risk: bool,
        /// When the event occurred.
        occurred_at: DateTime<Utc>,
    },
    /// A sizing recommendation was produced.
    PositionSized {
        /// Signal symbol.
        symbol: String,
        /// Methodology tag.
        methodology: String,
        /// Final recommended notional.
        recommended: f64,
        /// When the event occurred.
        occurred_at: DateTime<Utc>,
    },
    /// Margin level breached the margin-call threshold.
    MarginCall {
        /// Portfolio in breach.
        portfolio_id: String,
        /// Margin level at breach time.
        margin_level: f64,
        /// Margin deficit to restore.
        deficit: Decimal,
        /// Proposed remediation actions, human readable.
        actions: Vec<String>,
        /// Grace-period deadline.
        deadline: DateTime<Utc>,
        /// When the event occurred.
        occurred_at: DateTime<Utc>,
    },
    /// One position was liquidated.
    PositionLiquidated {
        /// Portfolio being protected.
        portfolio_id: String,
        /// Closed symbol.
        symbol: String,
        /// Net proceeds after slippage and fees.
        proceeds: Decimal,
        /// When the event occurred.
        occurred_at: DateTime<Utc>,
    },
    /// A liquidation attempt finished (fully or partially).
    LiquidationCompleted {
        /// Portfolio that was liquidated.
        portfolio_id: String,
        /// Number of positions closed.
        positions_closed: usize,
        /// Margin level after the attempt.
        final_margin_level: f64,
        /// When the event occurred.
        occurred_at: DateTime<Utc>,
    },
    /// New risk limits were published.
    LimitsUpdated {
        /// Combined multiplicative adjustment factor applied to base limits.
        adjustment_factor: f64,
        /// Detected regime at publication.
        regime: MarketRegime,
        /// When the event occurred.
        occurred_at: DateTime<Utc>,
    },
    /// The detected market regime changed.
    RegimeChanged {
        /// Previous regime.
        from: MarketRegime,
        /// New regime.
        to: MarketRegime,
        /// When the event occurred.
        occurred_at: DateTime<Utc>,
    },
    /// A metric breached a published limit.
    LimitViolation {
        /// Which limit was violated.
        limit: String,
        /// Observed value.
        observed: f64,
        /// Limit value at check time.
        allowed: f64,
        /// When the event occurred.
        occurred_at: DateTime<Utc>,
    },
    /// Emergency limit reduction was invoked.
    EmergencyReduction {
        /// Reduction factor applied.
        factor: f64,
        /// When the event occurred.
        occurred_at: DateTime<Utc>,
    },
}

impl RiskEvent {
    /// Stable event-type tag for routing and assertions.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::VarCalculated { .. } => "VAR_CALCULATED",
            Self::CalculationFailed { .. } => "CALCULATION_FAILED",
            Self::StressTestCompleted { .. } => "STRESS_TEST_COMPLETED",
            Self::PositionSized { .. } => "POSITION_SIZED",
            Self::MarginCall { .. } => "MARGIN_CALL",
            Self::PositionLiquidated { .. } => "POSITION_LIQUIDATED",
            Self::LiquidationCompleted { .. } => "LIQUIDATION_COMPLETED",
            Self::LimitsUpdated { .. } => "LIMITS_UPDATED",
            Self::RegimeChanged { .. } => "REGIME_CHANGED",
            Self::LimitViolation { .. } => "LIMIT_VIOLATION",
            Self::EmergencyReduction { .. } => "EMERGENCY_REDUCTION",
        }
    }
}

/// Port for publishing domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event. Failures are the publisher's concern; engines do
    /// not fail a calculation because an observer is away.
    async fn publish(&self, event: RiskEvent);
}

/// No-op publisher for tests and headless use.
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisher for NoOpEventPublisher {
    async fn publish(&self, _event: RiskEvent) {}
}

/// Publisher backed by a tokio broadcast channel.
#[derive(Debug)]
pub struct BroadcastPublisher {
    sender: tokio::sync::broadcast::Sender<RiskEvent>,
}

impl BroadcastPublisher {
    /// Create a publisher with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to the event stream.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RiskEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: RiskEvent) {
        // Lagging or absent receivers are not an engine failure.
        let _ = self.sender.send(event);
    }
}

/// Telemetry record kinds pushed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    /// A VaR estimation ran.
    VarCalculation,
    /// A stress test ran.
    StressTest,
    /// A sizing recommendation was produced.
    PositionSizing,
    /// A margin/liquidation check ran.
    LiquidationCheck,
    /// A risk alert was raised.
    RiskAlert,
}

/// A single telemetry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Record kind.
    pub kind: TelemetryKind,
    /// Wall-clock duration of the operation in milliseconds.
    pub duration_ms: f64,
    /// Short result summary (methodology, outcome).
    pub summary: String,
    /// When the record was produced.
    pub timestamp: DateTime<Utc>,
}

impl TelemetryRecord {
    /// Build a record stamped now.
    #[must_use]
    pub fn new(kind: TelemetryKind, duration_ms: f64, summary: impl Into<String>) -> Self {
        Self {
            kind,
            duration_ms,
            summary: summary.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Injected telemetry sink. Transport is the embedder's concern.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Record one telemetry entry.
    async fn record(&self, record: TelemetryRecord);

    /// Drain buffered records. Called at shutdown.
    async fn flush(&self);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Default)]
pub struct NoOpTelemetry;

#[async_trait]
impl TelemetrySink for NoOpTelemetry {
    async fn record(&self, _record: TelemetryRecord) {}
    async fn flush(&self) {}
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    records: tokio::sync::Mutex<Vec<TelemetryRecord>>,
}

impl MemoryTelemetry {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded entries.
    pub async fn records(&self) -> Vec<TelemetryRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl TelemetrySink for MemoryTelemetry {
    async fn record(&self, record: TelemetryRecord) {
        self.records.lock().await.push(record);
    }

    async fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_tags() {
        let event = RiskEvent::EmergencyReduction {
            factor: 0.5,
            occurred_at: Utc::now(),
        };
        assert_eq!(event.event_type(), "EMERGENCY_REDUCTION");
    }

    #[test]
    fn test_event_serde_round_trip() {
        let event = RiskEvent::VarCalculated {
            portfolio_id: "pf-1".to_string(),
            methodology: "PARAMETRIC".to_string(),
            confidence: 0.95,
            value: 3290.0,
            occurred_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("VAR_CALCULATED"));
        let parsed: RiskEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.event_type(), "VAR_CALCULATED");
    }

    #[tokio::test]
    async fn test_broadcast_publisher_delivers() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();
        publisher
            .publish(RiskEvent::EmergencyReduction {
                factor: 0.3,
                occurred_at: Utc::now(),
            })
            .await;
        let event = rx.recv().await.expect("event delivered");
        assert_eq!(event.event_type(), "EMERGENCY_REDUCTION");
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_fine() {
        let publisher = BroadcastPublisher::new(1);
        publisher
            .publish(RiskEvent::EmergencyReduction {
                factor: 0.3,
                occurred_at: Utc::now(),
            })
            .await;
    }

    #[tokio::test]
    async fn test_memory_telemetry_collects() {
        let sink = MemoryTelemetry::new();
        sink.record(TelemetryRecord::new(
            TelemetryKind::VarCalculation,
            1.25,
            "parametric 95%",
        ))
        .await;
        sink.flush().await;
        let records = sink.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, TelemetryKind::VarCalculation);
    }
}
