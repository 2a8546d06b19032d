//! Trading signals and trade history supplied by alpha-generation
//! collaborators.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalDirection {
    /// Buy / go long.
    Long,
    /// Sell / go short.
    Short,
}

/// A trading intent produced by an alpha generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    /// Instrument symbol.
    pub symbol: String,
    /// Intended direction.
    pub direction: SignalDirection,
    /// Generator confidence in [0, 1].
    pub confidence: f64,
    /// Expected return over the signal horizon (fraction).
    pub expected_return: f64,
    /// Optional stop-loss price.
    pub stop_loss: Option<Decimal>,
    /// Signal horizon in hours.
    pub time_horizon_hours: f64,
}

/// Outcome of a completed trade, used to estimate Kelly inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    /// Instrument symbol.
    pub symbol: String,
    /// Net P&L of the trade.
    pub pnl: Decimal,
    /// Return on the capital committed (fraction).
    pub return_pct: f64,
    /// When the trade closed.
    pub closed_at: DateTime<Utc>,
}

impl TradeOutcome {
    /// Whether the trade was a winner.
    #[must_use]
    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}
