//! Portfolio aggregate: positions, cash, and margin state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use super::position::Position;

/// A leveraged multi-asset portfolio.
///
/// Invariant maintained by every core mutation:
/// `total_value == cash + Σ(signed_size × current_price)`.
/// Call [`Portfolio::recompute_totals`] after changing positions or cash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    /// Portfolio identifier.
    pub id: String,
    /// Open positions, ordered by insertion.
    pub positions: Vec<Position>,
    /// Free cash.
    pub cash: Decimal,
    /// Total portfolio value (cash plus signed position values).
    pub total_value: Decimal,
    /// Margin currently in use.
    pub margin_used: Decimal,
    /// Margin still available.
    pub margin_available: Decimal,
    /// Gross leverage (total notional over total value).
    pub leverage: Decimal,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Portfolio {
    /// Create an empty portfolio holding only cash.
    #[must_use]
    pub fn new(id: &str, cash: Decimal) -> Self {
        Self {
            id: id.to_string(),
            positions: Vec::new(),
            cash,
            total_value: cash,
            margin_used: Decimal::ZERO,
            margin_available: cash,
            leverage: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Look up a position by symbol.
    #[must_use]
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }

    /// Mutable lookup by symbol.
    pub fn position_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.positions.iter_mut().find(|p| p.symbol == symbol)
    }

    /// Gross notional exposure across all positions.
    #[must_use]
    pub fn total_exposure(&self) -> Decimal {
        self.positions.iter().map(Position::notional).sum()
    }

    /// Margin level: available over used margin. The primary health signal
    /// for the liquidation monitor. Returns `f64::INFINITY` with no margin
    /// in use.
    #[must_use]
    pub fn margin_level(&self) -> f64 {
        if self.margin_used <= Decimal::ZERO {
            return f64::INFINITY;
        }
        let available = self.margin_available.to_f64().unwrap_or(0.0);
        let used = self.margin_used.to_f64().unwrap_or(f64::MAX);
        available / used
    }

    /// Per-symbol portfolio weights (signed exposure over total value).
    ///
    /// Empty when the portfolio has no value.
    #[must_use]
    pub fn weights(&self) -> HashMap<String, f64> {
        let total = self.total_value.to_f64().unwrap_or(0.0);
        if total <= 0.0 {
            return HashMap::new();
        }
        self.positions
            .iter()
            .map(|p| {
                let value = p.market_value().to_f64().unwrap_or(0.0);
                (p.symbol.clone(), value / total)
            })
            .collect()
    }

    /// Restore the value invariant and derived fields after a mutation.
    pub fn recompute_totals(&mut self) {
        let position_value: Decimal = self.positions.iter().map(Position::market_value).sum();
        self.total_value = self.cash + position_value;
        self.margin_used = self.positions.iter().map(|p| p.margin).sum();
        self.leverage = if self.total_value > Decimal::ZERO {
            self.total_exposure() / self.total_value
        } else {
            Decimal::ZERO
        };
        self.updated_at = Utc::now();
    }

    /// Remove a position by symbol, returning it if present.
    pub fn remove_position(&mut self, symbol: &str) -> Option<Position> {
        let idx = self.positions.iter().position(|p| p.symbol == symbol)?;
        Some(self.positions.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionSide;
    use rust_decimal_macros::dec;

    fn sample_portfolio() -> Portfolio {
        let mut portfolio = Portfolio::new("pf-1", dec!(10000));
        let mut btc = Position::new("BTC", PositionSide::Long, dec!(1), dec!(50000));
        btc.margin = dec!(5000);
        let mut eth = Position::new("ETH", PositionSide::Short, dec!(10), dec!(3000));
        eth.margin = dec!(3000);
        portfolio.positions.push(btc);
        portfolio.positions.push(eth);
        portfolio.recompute_totals();
        portfolio
    }

    #[test]
    fn test_value_invariant_after_recompute() {
        let portfolio = sample_portfolio();
        // 10000 cash + 50000 long - 30000 short
        assert_eq!(portfolio.total_value, dec!(30000));
        assert_eq!(portfolio.margin_used, dec!(8000));
    }

    #[test]
    fn test_invariant_holds_after_price_update() {
        let mut portfolio = sample_portfolio();
        if let Some(p) = portfolio.position_mut("BTC") {
            p.update_price(dec!(60000));
        }
        portfolio.recompute_totals();
        let expected: Decimal = portfolio.cash
            + portfolio
                .positions
                .iter()
                .map(Position::market_value)
                .sum::<Decimal>();
        assert_eq!(portfolio.total_value, expected);
    }

    #[test]
    fn test_weights_sum_matches_exposure() {
        let portfolio = sample_portfolio();
        let weights = portfolio.weights();
        let btc = weights.get("BTC").copied().unwrap_or(0.0);
        let eth = weights.get("ETH").copied().unwrap_or(0.0);
        assert!(btc > 0.0);
        assert!(eth < 0.0);
        assert!((btc + eth - 20000.0 / 30000.0).abs() < 1e-9);
    }

    #[test]
    fn test_margin_level_infinite_with_no_margin() {
        let portfolio = Portfolio::new("pf-2", dec!(1000));
        assert!(portfolio.margin_level().is_infinite());
    }

    #[test]
    fn test_remove_position() {
        let mut portfolio = sample_portfolio();
        let removed = portfolio.remove_position("ETH");
        assert!(removed.is_some());
        assert!(portfolio.position("ETH").is_none());
        assert!(portfolio.remove_position("XRP").is_none());
    }
}
