//! Leveraged position owned by a single portfolio.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    /// Long exposure, profits when price rises.
    Long,
    /// Short exposure, profits when price falls.
    Short,
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// A single leveraged position.
///
/// Owned exclusively by the [`Portfolio`](super::Portfolio) that lists it;
/// the core never shares a position across portfolios.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Instrument symbol.
    pub symbol: String,
    /// Long or short.
    pub side: PositionSide,
    /// Position size in units (always positive; direction is `side`).
    pub size: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Latest mark price.
    pub current_price: Decimal,
    /// Realized P&L.
    pub realized_pnl: Decimal,
    /// Unrealized P&L at the current mark.
    pub unrealized_pnl: Decimal,
    /// Margin allocated to this position.
    pub margin: Decimal,
    /// Analytically derived liquidation price, if computed.
    pub liquidation_price: Option<Decimal>,
    /// When the position was opened.
    pub opened_at: DateTime<Utc>,
    /// When the position was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Create a new position at its entry price.
    #[must_use]
    pub fn new(symbol: &str, side: PositionSide, size: Decimal, entry_price: Decimal) -> Self {
        let now = Utc::now();
        Self {
            symbol: symbol.to_string(),
            side,
            size,
            entry_price,
            current_price: entry_price,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            margin: Decimal::ZERO,
            liquidation_price: None,
            opened_at: now,
            updated_at: now,
        }
    }

    /// Signed size: positive for long, negative for short.
    #[must_use]
    pub fn signed_size(&self) -> Decimal {
        match self.side {
            PositionSide::Long => self.size,
            PositionSide::Short => -self.size,
        }
    }

    /// Absolute notional exposure at the current mark.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.size * self.current_price
    }

    /// Signed market value contribution to the portfolio total.
    #[must_use]
    pub fn market_value(&self) -> Decimal {
        self.signed_size() * self.current_price
    }

    /// Effective leverage of this position (notional over margin).
    #[must_use]
    pub fn leverage(&self) -> Decimal {
        if self.margin > Decimal::ZERO {
            self.notional() / self.margin
        } else {
            Decimal::ONE
        }
    }

    /// Update the mark price and recompute unrealized P&L.
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        let diff = match self.side {
            PositionSide::Long => price - self.entry_price,
            PositionSide::Short => self.entry_price - price,
        };
        self.unrealized_pnl = diff * self.size;
        self.updated_at = Utc::now();
    }

    /// Whether the position is currently losing money.
    #[must_use]
    pub fn is_losing(&self) -> bool {
        self.unrealized_pnl < Decimal::ZERO
    }

    /// Unrealized loss as a fraction of entry notional (0 when profitable).
    #[must_use]
    pub fn loss_ratio(&self) -> Decimal {
        let entry_notional = self.size * self.entry_price;
        if self.unrealized_pnl < Decimal::ZERO && entry_notional > Decimal::ZERO {
            -self.unrealized_pnl / entry_notional
        } else {
            Decimal::ZERO
        }
    }
}
