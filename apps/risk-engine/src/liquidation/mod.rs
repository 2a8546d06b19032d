//! Margin monitoring and liquidation.
//!
//! A state machine over the margin level (available over used margin):
//! safe, warning, margin call, liquidation. Margin calls propose remediation
//! actions with a grace deadline; a breach of the liquidation threshold
//! forces ordered position exits through an injected execution port.

mod monitor;

pub use monitor::LiquidationMonitor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::RiskResult;

/// Margin health band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarginStatusLevel {
    /// Margin level above the warning threshold.
    Safe,
    /// Margin level inside the warning band.
    Warning,
    /// Margin call raised, remediation deadline running.
    MarginCall,
    /// Liquidation threshold breached.
    Liquidation,
}

impl std::fmt::Display for MarginStatusLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safe => write!(f, "SAFE"),
            Self::Warning => write!(f, "WARNING"),
            Self::MarginCall => write!(f, "MARGIN_CALL"),
            Self::Liquidation => write!(f, "LIQUIDATION"),
        }
    }
}

/// Margin health snapshot for one portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginStatus {
    /// Margin currently in use.
    pub margin_used: Decimal,
    /// Margin still available.
    pub margin_available: Decimal,
    /// Available over used margin.
    pub margin_level: f64,
    /// Health band.
    pub status: MarginStatusLevel,
    /// Estimated seconds until the margin-call threshold, from the current
    /// burn rate. `None` when margin is not burning.
    pub time_to_margin_call_secs: Option<f64>,
    /// Estimated seconds until the liquidation threshold.
    pub time_to_liquidation_secs: Option<f64>,
    /// When the snapshot was taken.
    pub checked_at: DateTime<Utc>,
}

/// Policy for choosing which positions to reduce or close first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeleverageStrategy {
    /// Worst unrealized P&L first.
    WorstFirst,
    /// Highest leverage-times-volatility first.
    RiskWeighted,
    /// Book order, a fair rotation.
    Proportional,
    /// Weighted score over loss ratio, leverage, liquidity, concentration.
    #[default]
    Optimal,
}

impl std::fmt::Display for DeleverageStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WorstFirst => write!(f, "WORST_FIRST"),
            Self::RiskWeighted => write!(f, "RISK_WEIGHTED"),
            Self::Proportional => write!(f, "PROPORTIONAL"),
            Self::Optimal => write!(f, "OPTIMAL"),
        }
    }
}

/// A proposed remediation for an active margin call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationAction {
    /// What the operator or orchestrator should do.
    pub description: String,
    /// When the action must be completed.
    pub deadline: DateTime<Utc>,
}

/// Order type for a liquidation exit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiquidationOrderType {
    /// Immediate exit at market.
    Market,
    /// Passive exit just inside the spread.
    Limit {
        /// Limit price.
        price: Decimal,
    },
}

/// One exit order submitted to the execution port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationOrder {
    /// Order identifier.
    pub id: String,
    /// Symbol to close.
    pub symbol: String,
    /// Size to close (positive units).
    pub size: Decimal,
    /// Whether the position being closed is long.
    pub closing_long: bool,
    /// Current mark price, the reference for market fills.
    pub reference_price: Decimal,
    /// Market or limit.
    pub order_type: LiquidationOrderType,
}

/// Fill returned by the execution port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationFill {
    /// Filled symbol.
    pub symbol: String,
    /// Filled size.
    pub size: Decimal,
    /// Raw fill price before slippage and fees.
    pub price: Decimal,
}

/// Port to the execution layer that actually places exit orders.
#[async_trait]
pub trait ExecutionPort: Send + Sync {
    /// Submit one liquidation order, returning the fill.
    ///
    /// # Errors
    ///
    /// Any rejection from the execution layer; the monitor surfaces it as
    /// `LiquidationFailed` while preserving completed closures.
    async fn execute(&self, order: &LiquidationOrder) -> RiskResult<LiquidationFill>;
}

/// Execution adapter that fills every order at its reference price.
#[derive(Debug, Clone, Default)]
pub struct SimulatedExecution;

#[async_trait]
impl ExecutionPort for SimulatedExecution {
    async fn execute(&self, order: &LiquidationOrder) -> RiskResult<LiquidationFill> {
        let price = match order.order_type {
            LiquidationOrderType::Limit { price } => price,
            LiquidationOrderType::Market => order.reference_price,
        };
        Ok(LiquidationFill {
            symbol: order.symbol.clone(),
            size: order.size,
            price,
        })
    }
}

/// Outcome of one liquidation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationOutcome {
    /// Portfolio that was protected.
    pub portfolio_id: String,
    /// Symbols closed, in execution order.
    pub closed_symbols: Vec<String>,
    /// Net cash delta from all closures.
    pub proceeds: Decimal,
    /// Margin level after the attempt.
    pub final_margin_level: f64,
    /// Whether the attempt stopped early on margin recovery.
    pub stopped_early: bool,
    /// When the attempt finished.
    pub completed_at: DateTime<Utc>,
}
