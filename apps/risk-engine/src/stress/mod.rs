//! Stress testing.
//!
//! Deterministic historical/custom shock scenarios and randomized Monte
//! Carlo shock batteries, applied to the live portfolio independently of
//! the VaR engine's statistical assumptions.

mod catalog;
mod tester;

pub use catalog::{historical_scenarios, worst_case_scenarios};
pub use tester::StressTester;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shock distribution used for Monte Carlo scenario generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShockDistribution {
    /// Gaussian shocks from each asset's historical moments.
    Normal,
    /// Student-t shocks for fat tails, normalized to unit variance.
    StudentT {
        /// Degrees of freedom, must exceed 2 for finite variance.
        degrees_of_freedom: f64,
    },
    /// Resample whole historical days, preserving cross-asset dependence.
    Empirical,
}

/// A named shock applied to the portfolio.
///
/// Either hand-authored (historical event, adversarial template) or
/// generated (Monte Carlo draw).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressScenario {
    /// Scenario name, carried through results and events.
    pub name: String,
    /// One-line description for reports.
    pub description: String,
    /// Per-symbol percentage move (e.g. -0.5 for a 50% drop).
    pub asset_shocks: HashMap<String, f64>,
    /// Per-sector fallback shocks for symbols without a direct entry.
    pub sector_shocks: HashMap<String, f64>,
    /// Additive shift applied to cross-asset correlation under stress.
    pub correlation_shift: f64,
    /// Multiplier amplifying every shock.
    pub volatility_multiplier: f64,
    /// Liquidity reduction factor in [0, 1]; degrades shocks further.
    pub liquidity_reduction: f64,
    /// Scenario duration in hours.
    pub duration_hours: f64,
    /// Estimated occurrence probability.
    pub probability: f64,
}

impl StressScenario {
    /// A plain scenario with unit multipliers and no sector table.
    #[must_use]
    pub fn named(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            asset_shocks: HashMap::new(),
            sector_shocks: HashMap::new(),
            correlation_shift: 0.0,
            volatility_multiplier: 1.0,
            liquidity_reduction: 0.0,
            duration_hours: 24.0,
            probability: 0.01,
        }
    }

    /// Effective shock for one symbol: direct entry, else sector fallback,
    /// else the configured default, all amplified by the scenario's
    /// volatility multiplier, correlation shift, and liquidity reduction.
    #[must_use]
    pub fn shock_for(&self, symbol: &str, default_shock: f64) -> f64 {
        let base = self
            .asset_shocks
            .get(symbol)
            .or_else(|| self.sector_shocks.get(sector_of(symbol)))
            .copied()
            .unwrap_or(default_shock);
        let amplification = self.volatility_multiplier
            * (1.0 + self.correlation_shift.abs() * 0.5)
            * (1.0 + self.liquidity_reduction * 0.5);
        base * amplification
    }
}

/// Coarse sector bucket for the fallback shock table.
#[must_use]
pub fn sector_of(symbol: &str) -> &'static str {
    match symbol {
        "BTC" | "ETH" => "majors",
        "USDT" | "USDC" | "DAI" | "UST" => "stablecoins",
        _ => "altcoins",
    }
}

/// Outcome of applying one scenario to a portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressTestResult {
    /// Scenario name.
    pub scenario: String,
    /// Portfolio loss in currency (positive = loss).
    pub loss: f64,
    /// Loss as a fraction of portfolio value.
    pub percentage_loss: f64,
    /// Per-symbol loss in currency.
    pub position_losses: HashMap<String, f64>,
    /// Whether the loss breaches the margin-call loss threshold.
    pub margin_call_risk: bool,
    /// Whether the loss breaches the liquidation loss threshold.
    pub liquidation_risk: bool,
    /// When the scenario ran.
    pub executed_at: DateTime<Utc>,
}

/// Summary of a Monte Carlo stress run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloStressSummary {
    /// Number of draws.
    pub iterations: usize,
    /// Mean loss across all draws (currency).
    pub mean_loss: f64,
    /// 95th-percentile loss across all draws (currency).
    pub loss_p95: f64,
    /// The worst retained draws, sorted worst-first.
    pub worst_draws: Vec<StressTestResult>,
    /// When the run finished.
    pub executed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shock_lookup_precedence() {
        let mut scenario = StressScenario::named("test", "precedence");
        scenario.asset_shocks.insert("BTC".to_string(), -0.5);
        scenario.sector_shocks.insert("majors".to_string(), -0.3);
        scenario.sector_shocks.insert("altcoins".to_string(), -0.4);

        assert!((scenario.shock_for("BTC", -0.25) - -0.5).abs() < 1e-12);
        assert!((scenario.shock_for("ETH", -0.25) - -0.3).abs() < 1e-12);
        assert!((scenario.shock_for("SOL", -0.25) - -0.4).abs() < 1e-12);
    }

    #[test]
    fn test_default_shock_when_no_table_matches() {
        let scenario = StressScenario::named("bare", "no tables");
        assert!((scenario.shock_for("XYZ", -0.25) - -0.25).abs() < 1e-12);
    }

    #[test]
    fn test_multipliers_amplify_shock() {
        let mut scenario = StressScenario::named("amplified", "vol x2");
        scenario.asset_shocks.insert("BTC".to_string(), -0.1);
        scenario.volatility_multiplier = 2.0;
        assert!((scenario.shock_for("BTC", -0.25) - -0.2).abs() < 1e-12);

        scenario.liquidity_reduction = 1.0;
        assert!((scenario.shock_for("BTC", -0.25) - -0.3).abs() < 1e-12);
    }

    #[test]
    fn test_sector_buckets() {
        assert_eq!(sector_of("BTC"), "majors");
        assert_eq!(sector_of("USDC"), "stablecoins");
        assert_eq!(sector_of("SOL"), "altcoins");
    }

    #[test]
    fn test_shock_distribution_serde() {
        let json = serde_json::to_string(&ShockDistribution::Normal).expect("serialize");
        assert_eq!(json, "\"NORMAL\"");
        let fat: ShockDistribution = serde_json::from_str(
            "{\"STUDENT_T\":{\"degrees_of_freedom\":4.0}}",
        )
        .expect("deserialize");
        assert!(matches!(
            fat,
            ShockDistribution::StudentT { degrees_of_freedom } if degrees_of_freedom == 4.0
        ));
    }
}
