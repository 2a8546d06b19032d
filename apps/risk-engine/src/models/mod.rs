//! Core data model shared by all risk engines.
//!
//! Portfolios and positions are accounting state and use [`rust_decimal`]
//! arithmetic; statistical inputs derived from them (returns, weights,
//! volatilities) are `f64` and produced at the analytics boundary.

mod market;
mod portfolio;
mod position;
mod price_series;
mod signal;

pub use market::{MarketConditions, MarketRegime};
pub use portfolio::Portfolio;
pub use position::{Position, PositionSide};
pub use price_series::{Candle, PriceHistory, PriceSeries};
pub use signal::{SignalDirection, TradeOutcome, TradingSignal};
