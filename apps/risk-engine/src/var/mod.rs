//! Value-at-Risk estimation.
//!
//! Three methodologies behind one contract: parametric (delta-normal),
//! historical simulation, and Monte Carlo with correlated sampling, plus
//! CVaR and per-asset component/marginal decomposition.

mod cache;
mod engine;

pub use cache::VarCache;
pub use engine::VarEngine;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Estimation methodology, resolved once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VarMethodology {
    /// Delta-normal closed form.
    #[default]
    Parametric,
    /// Historical simulation through current weights.
    Historical,
    /// Monte Carlo with Cholesky-correlated draws.
    MonteCarlo,
}

impl std::fmt::Display for VarMethodology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parametric => write!(f, "PARAMETRIC"),
            Self::Historical => write!(f, "HISTORICAL"),
            Self::MonteCarlo => write!(f, "MONTE_CARLO"),
        }
    }
}

/// Result of a VaR estimation. Created fresh per calculation and cached by
/// (methodology, confidence, position set) with a fixed TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaRResult {
    /// VaR in currency (positive loss magnitude).
    pub value: f64,
    /// VaR as a fraction of portfolio value.
    pub percentage: f64,
    /// Conditional VaR (expected shortfall) in currency.
    pub cvar: f64,
    /// Methodology that produced the estimate.
    pub methodology: VarMethodology,
    /// Confidence level.
    pub confidence: f64,
    /// Time horizon in days.
    pub horizon_days: f64,
    /// Per-asset additive contribution to total VaR (currency).
    ///
    /// Assets whose contribution could not be computed are omitted, not
    /// reported as zero.
    pub component_var: HashMap<String, f64>,
    /// Per-asset VaR sensitivity to a unit exposure increase.
    pub marginal_var: HashMap<String, f64>,
    /// When the estimate was produced.
    pub calculated_at: DateTime<Utc>,
}
