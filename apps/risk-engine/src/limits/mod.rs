//! Dynamic risk limits.
//!
//! The limiter recomputes position/exposure/leverage/drawdown limits from
//! base configuration values as market conditions move, and exposes an
//! atomic pre-trade admission check against the published snapshot.

mod limiter;

pub use limiter::{RiskLimiter, RiskMetrics};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LimitsConfig;
use crate::models::MarketRegime;

/// The published limit record.
///
/// Replaced atomically as a whole; readers hold an `Arc` snapshot and are
/// never exposed to a half-updated record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum single-position notional.
    pub position_limit: f64,
    /// Maximum aggregate exposure.
    pub exposure_limit: f64,
    /// Maximum leverage.
    pub leverage_limit: f64,
    /// Maximum tolerated drawdown (fraction).
    pub drawdown_limit: f64,
    /// Maximum single-order notional.
    pub order_size_limit: f64,
    /// Maximum single-asset share of exposure (fraction).
    pub concentration_limit: f64,
    /// Combined multiplicative adjustment applied to the base values.
    pub adjustment_factor: f64,
    /// Regime in force when the record was published.
    pub regime: MarketRegime,
    /// When the record was published.
    pub updated_at: DateTime<Utc>,
}

impl RiskLimits {
    /// Derive a record from base values and a combined adjustment factor.
    #[must_use]
    pub fn from_config(config: &LimitsConfig, adjustment_factor: f64, regime: MarketRegime) -> Self {
        Self {
            position_limit: config.base_position_limit * adjustment_factor,
            exposure_limit: config.base_exposure_limit * adjustment_factor,
            leverage_limit: config.base_leverage_limit * adjustment_factor,
            drawdown_limit: config.base_drawdown_limit * adjustment_factor,
            order_size_limit: config.base_order_size_limit * adjustment_factor,
            concentration_limit: (config.base_concentration_limit * adjustment_factor).min(1.0),
            adjustment_factor,
            regime,
            updated_at: Utc::now(),
        }
    }

    /// A record that admits everything. Test scaffolding and bootstrap.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            position_limit: f64::MAX,
            exposure_limit: f64::MAX,
            leverage_limit: f64::MAX,
            drawdown_limit: 1.0,
            order_size_limit: f64::MAX,
            concentration_limit: 1.0,
            adjustment_factor: 1.0,
            regime: MarketRegime::Normal,
            updated_at: Utc::now(),
        }
    }
}
