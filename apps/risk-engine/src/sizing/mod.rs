//! Position sizing.
//!
//! Turns a trading signal into a bounded size recommendation using one of
//! five methodologies, then clamps it against the currently published risk
//! limits. Clamps only ever shrink the size.

mod sizer;

pub use sizer::PositionSizer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sizing methodology, resolved once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizingMethodology {
    /// Kelly criterion scaled by a safety fraction.
    Kelly,
    /// Volatility targeting against a configured annualized target.
    VolatilityTarget,
    /// Equal risk contribution across existing positions plus the new one.
    RiskParity,
    /// Inversely proportional to historical drawdown.
    MaxDrawdown,
    /// Fixed-weight blend of the four, scaled by signal confidence.
    #[default]
    Optimal,
}

impl std::fmt::Display for SizingMethodology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kelly => write!(f, "KELLY"),
            Self::VolatilityTarget => write!(f, "VOLATILITY_TARGET"),
            Self::RiskParity => write!(f, "RISK_PARITY"),
            Self::MaxDrawdown => write!(f, "MAX_DRAWDOWN"),
            Self::Optimal => write!(f, "OPTIMAL"),
        }
    }
}

/// A sizing recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingResult {
    /// Signal symbol.
    pub symbol: String,
    /// Raw recommended notional before limit enforcement (currency).
    pub recommended_size: f64,
    /// Final notional after every limit clamp (currency).
    pub limit_adjusted_size: f64,
    /// Methodology that produced the recommendation.
    pub methodology: SizingMethodology,
    /// Signal confidence carried through from the input.
    pub confidence: f64,
    /// Estimated daily risk contribution of the final size (currency).
    pub risk_contribution: f64,
    /// Human-readable list of constraints that shrank the size.
    pub applied_constraints: Vec<String>,
    /// When the recommendation was produced.
    pub calculated_at: DateTime<Utc>,
}
