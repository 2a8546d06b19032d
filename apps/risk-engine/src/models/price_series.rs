//! Historical price data: the sole source of returns for every estimator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// A single OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time.
    pub timestamp: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Traded volume.
    pub volume: Decimal,
}

impl Candle {
    /// Bar with all prices equal, for synthetic series.
    #[must_use]
    pub fn flat(timestamp: DateTime<Utc>, price: Decimal, volume: Decimal) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }
}

/// Ordered per-symbol bar sequence. Immutable once ingested for a
/// calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSeries {
    /// Instrument symbol.
    pub symbol: String,
    /// Bars in ascending time order.
    pub candles: Vec<Candle>,
}

impl PriceSeries {
    /// Build a series from close prices, one synthetic bar per close.
    #[must_use]
    pub fn from_closes(symbol: &str, closes: &[Decimal]) -> Self {
        let start = Utc::now() - chrono::Duration::days(closes.len() as i64);
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                Candle::flat(
                    start + chrono::Duration::days(i as i64),
                    close,
                    Decimal::ZERO,
                )
            })
            .collect();
        Self {
            symbol: symbol.to_string(),
            candles,
        }
    }

    /// Simple close-to-close returns.
    #[must_use]
    pub fn returns(&self) -> Vec<f64> {
        self.candles
            .windows(2)
            .filter_map(|pair| {
                let prev = pair[0].close.to_f64()?;
                let next = pair[1].close.to_f64()?;
                if prev > 0.0 {
                    Some(next / prev - 1.0)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Latest close price, if any bars exist.
    #[must_use]
    pub fn latest_close(&self) -> Option<Decimal> {
        self.candles.last().map(|c| c.close)
    }

    /// Number of bars.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    /// Whether the series is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

/// Per-symbol price history handed to the estimators by the market-data
/// collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceHistory {
    series: HashMap<String, PriceSeries>,
}

impl PriceHistory {
    /// Empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a series, replacing any prior data for the symbol.
    pub fn insert(&mut self, series: PriceSeries) {
        self.series.insert(series.symbol.clone(), series);
    }

    /// Look up the series for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&PriceSeries> {
        self.series.get(symbol)
    }

    /// Returns for a symbol, empty when the symbol is unknown.
    #[must_use]
    pub fn returns_for(&self, symbol: &str) -> Vec<f64> {
        self.get(symbol).map(PriceSeries::returns).unwrap_or_default()
    }

    /// Symbols with ingested history.
    #[must_use]
    pub fn symbols(&self) -> Vec<&str> {
        self.series.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_returns_from_closes() {
        let series =
            PriceSeries::from_closes("BTC", &[dec!(100), dec!(110), dec!(99), dec!(99)]);
        let returns = series.returns();
        assert_eq!(returns.len(), 3);
        assert!((returns[0] - 0.10).abs() < 1e-12);
        assert!((returns[1] + 0.10).abs() < 1e-12);
        assert!(returns[2].abs() < 1e-12);
    }

    #[test]
    fn test_empty_series_has_no_returns() {
        let series = PriceSeries::from_closes("BTC", &[]);
        assert!(series.is_empty());
        assert!(series.returns().is_empty());
        assert!(series.latest_close().is_none());
    }

    #[test]
    fn test_history_lookup() {
        let mut history = PriceHistory::new();
        history.insert(PriceSeries::from_closes("ETH", &[dec!(10), dec!(12)]));
        assert_eq!(history.returns_for("ETH").len(), 1);
        assert!(history.returns_for("DOGE").is_empty());
        assert!(history.get("ETH").is_some());
    }
}
