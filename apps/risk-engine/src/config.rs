//! Configuration records for the risk engine.
//!
//! Plain-data configuration supplied by the caller at startup. Each engine
//! accepts its record at construction and exposes `update_config`, which
//! invalidates any dependent caches. File loading and environment
//! interpolation are owned by the embedding process, not by this crate.

use serde::{Deserialize, Serialize};

use crate::error::{RiskError, RiskResult};
use crate::liquidation::DeleverageStrategy;
use crate::sizing::SizingMethodology;
use crate::stress::ShockDistribution;
use crate::var::VarMethodology;

/// Configuration for the VaR engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarConfig {
    /// Default estimation methodology.
    pub methodology: VarMethodology,
    /// Default confidence level (e.g. 0.95).
    pub confidence: f64,
    /// Time horizon in days.
    pub horizon_days: f64,
    /// Minimum number of historical returns required per asset.
    pub lookback: usize,
    /// Monte Carlo draw count.
    pub monte_carlo_iterations: usize,
    /// Result cache time-to-live in seconds.
    pub cache_ttl_secs: u64,
    /// Monte Carlo seed for reproducibility (None = OS entropy).
    pub seed: Option<u64>,
}

impl Default for VarConfig {
    fn default() -> Self {
        Self {
            methodology: VarMethodology::Parametric,
            confidence: 0.95,
            horizon_days: 1.0,
            lookback: 30,
            monte_carlo_iterations: 10_000,
            cache_ttl_secs: 60,
            seed: None,
        }
    }
}

impl VarConfig {
    /// Validate the record.
    pub fn validate(&self) -> RiskResult<()> {
        if !(0.0..1.0).contains(&self.confidence) || self.confidence <= 0.5 {
            return Err(RiskError::configuration(format!(
                "VaR confidence must be in (0.5, 1.0), got {}",
                self.confidence
            )));
        }
        if self.horizon_days <= 0.0 {
            return Err(RiskError::configuration("VaR horizon must be positive"));
        }
        if self.lookback < 2 {
            return Err(RiskError::configuration("VaR lookback must be at least 2"));
        }
        if self.monte_carlo_iterations < 1000 {
            return Err(RiskError::configuration(format!(
                "Monte Carlo iterations must be at least 1000, got {}",
                self.monte_carlo_iterations
            )));
        }
        Ok(())
    }
}

/// Configuration for the stress testing engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressConfig {
    /// Portfolio percentage loss that flags a margin call.
    pub margin_call_loss_threshold: f64,
    /// Portfolio percentage loss that flags liquidation.
    pub liquidation_loss_threshold: f64,
    /// Shock distribution for Monte Carlo scenarios.
    pub shock_distribution: ShockDistribution,
    /// Default shock applied when neither a direct nor a sector shock matches.
    pub default_shock: f64,
    /// Number of worst draws retained from a Monte Carlo run.
    pub worst_draws_retained: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            margin_call_loss_threshold: 0.3,
            liquidation_loss_threshold: 0.5,
            shock_distribution: ShockDistribution::Normal,
            default_shock: -0.25,
            worst_draws_retained: 10,
        }
    }
}

impl StressConfig {
    /// Validate the record.
    pub fn validate(&self) -> RiskResult<()> {
        if self.margin_call_loss_threshold >= self.liquidation_loss_threshold {
            return Err(RiskError::configuration(format!(
                "margin call loss threshold ({}) must be below liquidation loss threshold ({})",
                self.margin_call_loss_threshold, self.liquidation_loss_threshold
            )));
        }
        if self.worst_draws_retained == 0 {
            return Err(RiskError::configuration(
                "worst_draws_retained must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Configuration for the position sizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Sizing methodology, resolved once here rather than per call.
    pub methodology: SizingMethodology,
    /// Kelly safety fraction (applied to raw Kelly output).
    pub kelly_fraction: f64,
    /// Minimum trade-history sample before Kelly is trusted.
    pub min_trade_history: usize,
    /// Annualized volatility target for volatility-targeted sizing.
    pub target_volatility: f64,
    /// Maximum tolerated historical drawdown for drawdown-based sizing.
    pub max_drawdown_tolerance: f64,
    /// Fallback daily volatility when an asset has no usable history.
    pub default_daily_volatility: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            methodology: SizingMethodology::Optimal,
            kelly_fraction: 0.5,
            min_trade_history: 30,
            target_volatility: 0.20,
            max_drawdown_tolerance: 0.25,
            default_daily_volatility: 0.05,
        }
    }
}

impl SizingConfig {
    /// Validate the record.
    pub fn validate(&self) -> RiskResult<()> {
        if !(0.0..=1.0).contains(&self.kelly_fraction) {
            return Err(RiskError::configuration(format!(
                "Kelly fraction must be in [0, 1], got {}",
                self.kelly_fraction
            )));
        }
        if self.target_volatility <= 0.0 {
            return Err(RiskError::configuration(
                "target volatility must be positive",
            ));
        }
        if self.max_drawdown_tolerance <= 0.0 {
            return Err(RiskError::configuration(
                "max drawdown tolerance must be positive",
            ));
        }
        Ok(())
    }
}

/// Configuration for the liquidation monitor.
///
/// Thresholds are on the margin-level scale (available / used margin) and
/// must be strictly ordered: `liquidation < margin_call < warning`. Source
/// systems that invert margin-call and liquidation thresholds make the
/// liquidation condition easier to satisfy than the margin call; that
/// ordering is rejected here rather than silently preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationConfig {
    /// Margin level below which the portfolio is in the warning band.
    pub warning_threshold: f64,
    /// Margin level below which a margin call is raised.
    pub margin_call_threshold: f64,
    /// Margin level below which liquidation begins.
    pub liquidation_threshold: f64,
    /// Maintenance margin ratio used for liquidation-price derivation.
    pub maintenance_margin_ratio: f64,
    /// Grace period granted by a margin call, in seconds.
    pub margin_call_grace_secs: u64,
    /// Deleveraging strategy for choosing positions to close first.
    pub strategy: DeleverageStrategy,
    /// Whether liquidation may stop early once margin recovers.
    pub allow_partial: bool,
    /// Simulated slippage applied to liquidation fills (fraction of price).
    pub slippage: f64,
    /// Simulated fee applied to liquidation fills (fraction of notional).
    pub fee: f64,
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 1.0,
            margin_call_threshold: 0.8,
            liquidation_threshold: 0.5,
            maintenance_margin_ratio: 0.05,
            margin_call_grace_secs: 300,
            strategy: DeleverageStrategy::Optimal,
            allow_partial: true,
            slippage: 0.002,
            fee: 0.001,
        }
    }
}

impl LiquidationConfig {
    /// Validate the record, rejecting inverted threshold ordering.
    pub fn validate(&self) -> RiskResult<()> {
        if self.liquidation_threshold >= self.margin_call_threshold {
            return Err(RiskError::configuration(format!(
                "liquidation threshold ({}) must be below margin call threshold ({}) \
                 on the margin-level scale",
                self.liquidation_threshold, self.margin_call_threshold
            )));
        }
        if self.margin_call_threshold >= self.warning_threshold {
            return Err(RiskError::configuration(format!(
                "margin call threshold ({}) must be below warning threshold ({})",
                self.margin_call_threshold, self.warning_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.maintenance_margin_ratio) {
            return Err(RiskError::configuration(
                "maintenance margin ratio must be in [0, 1)",
            ));
        }
        Ok(())
    }
}

/// Base limits and adjustment bounds for the dynamic risk limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Base maximum single-position notional.
    pub base_position_limit: f64,
    /// Base maximum aggregate exposure.
    pub base_exposure_limit: f64,
    /// Base maximum leverage.
    pub base_leverage_limit: f64,
    /// Base maximum tolerated drawdown (fraction).
    pub base_drawdown_limit: f64,
    /// Base maximum single-order notional.
    pub base_order_size_limit: f64,
    /// Base maximum single-asset concentration (fraction of exposure).
    pub base_concentration_limit: f64,
    /// Lower clamp on the volatility multiplier.
    pub volatility_multiplier_floor: f64,
    /// Upper clamp on the volatility multiplier.
    pub volatility_multiplier_cap: f64,
    /// Relative change required before limits are republished.
    pub republish_threshold: f64,
    /// Debounce window for violation checks, in milliseconds.
    pub violation_debounce_ms: u64,
    /// Periodic limit refresh interval, in milliseconds.
    pub refresh_interval_ms: u64,
    /// Volatility level above which the regime is stressed.
    pub stressed_volatility: f64,
    /// Volatility level above which the regime is crisis.
    pub crisis_volatility: f64,
    /// Spread level above which the regime degrades one notch.
    pub stressed_spread: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            base_position_limit: 100_000.0,
            base_exposure_limit: 500_000.0,
            base_leverage_limit: 5.0,
            base_drawdown_limit: 0.2,
            base_order_size_limit: 50_000.0,
            base_concentration_limit: 0.4,
            volatility_multiplier_floor: 0.3,
            volatility_multiplier_cap: 1.5,
            republish_threshold: 0.05,
            violation_debounce_ms: 1000,
            refresh_interval_ms: 5000,
            stressed_volatility: 0.04,
            crisis_volatility: 0.08,
            stressed_spread: 0.005,
        }
    }
}

impl LimitsConfig {
    /// Validate the record.
    pub fn validate(&self) -> RiskResult<()> {
        if self.volatility_multiplier_floor > self.volatility_multiplier_cap {
            return Err(RiskError::configuration(
                "volatility multiplier floor exceeds cap",
            ));
        }
        if self.stressed_volatility >= self.crisis_volatility {
            return Err(RiskError::configuration(
                "stressed volatility threshold must be below crisis threshold",
            ));
        }
        if !(0.0..=1.0).contains(&self.base_concentration_limit) {
            return Err(RiskError::configuration(
                "concentration limit must be in [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Root configuration for all five engines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskEngineConfig {
    /// VaR engine configuration.
    #[serde(default)]
    pub var: VarConfig,
    /// Stress testing configuration.
    #[serde(default)]
    pub stress: StressConfig,
    /// Position sizing configuration.
    #[serde(default)]
    pub sizing: SizingConfig,
    /// Liquidation monitor configuration.
    #[serde(default)]
    pub liquidation: LiquidationConfig,
    /// Dynamic risk limiter configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl RiskEngineConfig {
    /// Validate every section, failing on the first violation.
    pub fn validate(&self) -> RiskResult<()> {
        self.var.validate()?;
        self.stress.validate()?;
        self.sizing.validate()?;
        self.liquidation.validate()?;
        self.limits.validate()?;
        Ok(())
    }
}
