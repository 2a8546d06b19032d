//! Observed market conditions and the coarse regime derived from them.

use serde::{Deserialize, Serialize};

/// Coarse market state driving limit adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    /// Business as usual.
    #[default]
    Normal,
    /// Elevated volatility or degraded liquidity.
    Stressed,
    /// Extreme conditions, limits cut to the floor.
    Crisis,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Stressed => write!(f, "STRESSED"),
            Self::Crisis => write!(f, "CRISIS"),
        }
    }
}

/// Snapshot of current market conditions.
///
/// Mutated only through the dynamic risk limiter's update path; the position
/// sizer and liquidation monitor read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConditions {
    /// Current short-horizon volatility (daily fraction).
    pub volatility: f64,
    /// Trailing average volatility used as the adjustment baseline.
    pub average_volatility: f64,
    /// Current traded volume (notional).
    pub volume: f64,
    /// Trailing average volume.
    pub average_volume: f64,
    /// Current bid/ask spread (fraction of mid).
    pub spread: f64,
    /// Average pairwise correlation across the tracked book.
    pub correlation: f64,
    /// Detected regime.
    pub regime: MarketRegime,
}

impl Default for MarketConditions {
    fn default() -> Self {
        Self {
            volatility: 0.02,
            average_volatility: 0.02,
            volume: 0.0,
            average_volume: 0.0,
            spread: 0.001,
            correlation: 0.3,
            regime: MarketRegime::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regime_display() {
        assert_eq!(MarketRegime::Normal.to_string(), "NORMAL");
        assert_eq!(MarketRegime::Crisis.to_string(), "CRISIS");
    }

    #[test]
    fn test_default_conditions_are_normal() {
        let conditions = MarketConditions::default();
        assert_eq!(conditions.regime, MarketRegime::Normal);
        assert!(conditions.volatility > 0.0);
    }
}
