//! The stress testing engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal, StudentT};
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::StressConfig;
use crate::error::{RiskError, RiskResult};
use crate::events::{
    EventPublisher, RiskEvent, TelemetryKind, TelemetryRecord, TelemetrySink,
};
use crate::math::{CorrelationMatrix, mean, std_dev};
use crate::models::{Portfolio, PriceHistory};

use super::{
    MonteCarloStressSummary, ShockDistribution, StressScenario, StressTestResult,
    historical_scenarios, worst_case_scenarios,
};

/// Stress testing engine.
///
/// Applies deterministic shock scenarios and Monte Carlo shock batteries to
/// the portfolio. Never mutates the portfolio; flags margin-call and
/// liquidation conditions against its own configured loss thresholds, not
/// the VaR confidence.
pub struct StressTester {
    config: RwLock<StressConfig>,
    publisher: Arc<dyn EventPublisher>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl StressTester {
    /// Create a tester from a validated configuration.
    pub fn new(
        config: StressConfig,
        publisher: Arc<dyn EventPublisher>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> RiskResult<Self> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
            publisher,
            telemetry,
        })
    }

    /// Replace the configuration.
    pub async fn update_config(&self, config: StressConfig) -> RiskResult<()> {
        config.validate()?;
        *self.config.write().await = config;
        Ok(())
    }

    /// Apply one scenario to the portfolio.
    ///
    /// # Errors
    ///
    /// `RiskError::Calculation` when the portfolio has no positive value.
    pub async fn run_scenario(
        &self,
        portfolio: &Portfolio,
        scenario: &StressScenario,
    ) -> RiskResult<StressTestResult> {
        let started = Instant::now();
        let config = self.config.read().await.clone();
        let result = Self::apply_scenario(portfolio, scenario, &config)?;

        self.publisher
            .publish(RiskEvent::StressTestCompleted {
                portfolio_id: portfolio.id.clone(),
                scenario: scenario.name.clone(),
                loss: result.loss,
                liquidation_risk: result.liquidation_risk,
                occurred_at: Utc::now(),
            })
            .await;
        self.telemetry
            .record(TelemetryRecord::new(
                TelemetryKind::StressTest,
                started.elapsed().as_secs_f64() * 1000.0,
                format!(
                    "{}: loss {:.2} ({:.1}%)",
                    scenario.name,
                    result.loss,
                    result.percentage_loss * 100.0
                ),
            ))
            .await;

        Ok(result)
    }

    /// Run the full historical event catalog.
    pub async fn run_historical(&self, portfolio: &Portfolio) -> RiskResult<Vec<StressTestResult>> {
        let mut results = Vec::new();
        for scenario in historical_scenarios() {
            results.push(self.run_scenario(portfolio, &scenario).await?);
        }
        Ok(results)
    }

    /// Build a custom scenario around a uniform base shock.
    pub async fn build_custom_scenario(
        &self,
        name: &str,
        base_shock: f64,
        volatility_multiplier: f64,
        correlation_shift: f64,
        liquidity_reduction: f64,
    ) -> StressScenario {
        let mut scenario = StressScenario::named(name, "custom scenario");
        for sector in ["majors", "altcoins", "stablecoins"] {
            scenario.sector_shocks.insert(sector.to_string(), base_shock);
        }
        scenario.volatility_multiplier = volatility_multiplier;
        scenario.correlation_shift = correlation_shift;
        scenario.liquidity_reduction = liquidity_reduction.clamp(0.0, 1.0);
        scenario
    }

    /// Monte Carlo shock battery: `iterations` correlated random draws,
    /// retaining the configured number of worst draws.
    ///
    /// Symbols with no usable history degrade to a conservative default
    /// volatility rather than failing; the protective path stays live.
    pub async fn run_monte_carlo(
        &self,
        portfolio: &Portfolio,
        history: &PriceHistory,
        iterations: usize,
        seed: Option<u64>,
    ) -> RiskResult<MonteCarloStressSummary> {
        let started = Instant::now();
        let config = self.config.read().await.clone();
        if iterations == 0 {
            return Err(RiskError::configuration(
                "Monte Carlo stress requires at least one iteration",
            ));
        }
        if portfolio.positions.is_empty() {
            return Ok(MonteCarloStressSummary {
                iterations,
                mean_loss: 0.0,
                loss_p95: 0.0,
                worst_draws: Vec::new(),
                executed_at: Utc::now(),
            });
        }

        let (symbols, means, stds, aligned) = Self::shock_moments(portfolio, history);
        let mut return_map = HashMap::new();
        for (symbol, returns) in symbols.iter().zip(&aligned) {
            return_map.insert(symbol.clone(), returns.clone());
        }
        let matrix = CorrelationMatrix::from_returns(&symbols, &return_map);
        let lower = matrix.cholesky()?;

        let mut rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        let mut losses = Vec::with_capacity(iterations);
        let mut draws: Vec<StressTestResult> = Vec::with_capacity(iterations);

        for i in 0..iterations {
            let shocks = Self::draw_shocks(
                &config.shock_distribution,
                &lower,
                &means,
                &stds,
                &aligned,
                &mut rng,
            )?;
            let mut scenario = StressScenario::named(
                format!("Monte Carlo draw {i}"),
                "randomized shock draw",
            );
            scenario.probability = 1.0 / iterations as f64;
            for (symbol, shock) in symbols.iter().zip(&shocks) {
                scenario.asset_shocks.insert(symbol.clone(), *shock);
            }
            let result = Self::apply_scenario(portfolio, &scenario, &config)?;
            losses.push(result.loss);
            draws.push(result);
        }

        draws.sort_by(|a, b| b.loss.total_cmp(&a.loss));
        draws.truncate(config.worst_draws_retained);

        let mut sorted = losses.clone();
        sorted.sort_by(f64::total_cmp);
        let p95_idx = ((sorted.len() as f64) * 0.95) as usize;
        let loss_p95 = sorted[p95_idx.min(sorted.len() - 1)];

        let summary = MonteCarloStressSummary {
            iterations,
            mean_loss: mean(&losses).unwrap_or(0.0),
            loss_p95,
            worst_draws: draws,
            executed_at: Utc::now(),
        };

        self.telemetry
            .record(TelemetryRecord::new(
                TelemetryKind::StressTest,
                started.elapsed().as_secs_f64() * 1000.0,
                format!(
                    "monte carlo x{iterations}: mean loss {:.2}, p95 {:.2}",
                    summary.mean_loss, summary.loss_p95
                ),
            ))
            .await;

        Ok(summary)
    }

    /// Run the adversarial worst-case template set.
    pub async fn run_worst_cases(
        &self,
        portfolio: &Portfolio,
    ) -> RiskResult<Vec<StressTestResult>> {
        let mut results = Vec::new();
        for scenario in worst_case_scenarios(portfolio) {
            results.push(self.run_scenario(portfolio, &scenario).await?);
        }
        Ok(results)
    }

    /// Maximum-loss estimate: worst of the adversarial template set,
    /// scaled by the square root of the horizon relative to one day.
    pub async fn estimate_maximum_loss(
        &self,
        portfolio: &Portfolio,
        horizon_hours: f64,
    ) -> RiskResult<f64> {
        if horizon_hours <= 0.0 {
            return Err(RiskError::configuration(
                "maximum-loss horizon must be positive",
            ));
        }
        let results = self.run_worst_cases(portfolio).await?;
        let worst = results
            .iter()
            .map(|r| r.loss)
            .fold(0.0_f64, f64::max);
        Ok(worst * (horizon_hours / 24.0).sqrt())
    }

    fn apply_scenario(
        portfolio: &Portfolio,
        scenario: &StressScenario,
        config: &StressConfig,
    ) -> RiskResult<StressTestResult> {
        let total_value = portfolio.total_value.to_f64().unwrap_or(0.0);
        if total_value <= 0.0 && !portfolio.positions.is_empty() {
            return Err(RiskError::calculation(
                &scenario.name,
                "portfolio has no positive value",
            ));
        }

        let mut position_losses = HashMap::new();
        let mut loss = 0.0;
        for position in &portfolio.positions {
            let shock = scenario.shock_for(&position.symbol, config.default_shock);
            let value = position.market_value().to_f64().unwrap_or(0.0);
            // A short position gains when the shock is negative.
            let position_loss = -value * shock;
            position_losses.insert(position.symbol.clone(), position_loss);
            loss += position_loss;
        }

        let percentage_loss = if total_value > 0.0 {
            loss / total_value
        } else {
            0.0
        };

        Ok(StressTestResult {
            scenario: scenario.name.clone(),
            loss,
            percentage_loss,
            position_losses,
            margin_call_risk: percentage_loss >= config.margin_call_loss_threshold,
            liquidation_risk: percentage_loss >= config.liquidation_loss_threshold,
            executed_at: Utc::now(),
        })
    }

    /// Per-asset shock moments from history, with a logged conservative
    /// fallback for symbols that have no usable series.
    fn shock_moments(
        portfolio: &Portfolio,
        history: &PriceHistory,
    ) -> (Vec<String>, Vec<f64>, Vec<f64>, Vec<Vec<f64>>) {
        const FALLBACK_VOLATILITY: f64 = 0.05;

        let mut symbols = Vec::new();
        let mut means = Vec::new();
        let mut stds = Vec::new();
        let mut series = Vec::new();
        for position in &portfolio.positions {
            let returns = history.returns_for(&position.symbol);
            let sigma = std_dev(&returns).unwrap_or(0.0);
            symbols.push(position.symbol.clone());
            if returns.len() < 2 || sigma <= f64::EPSILON {
                warn!(
                    symbol = %position.symbol,
                    fallback = FALLBACK_VOLATILITY,
                    "no usable history for stress moments, using fallback volatility"
                );
                means.push(0.0);
                stds.push(FALLBACK_VOLATILITY);
                series.push(Vec::new());
            } else {
                means.push(mean(&returns).unwrap_or(0.0));
                stds.push(sigma);
                series.push(returns);
            }
        }
        (symbols, means, stds, series)
    }

    fn draw_shocks(
        distribution: &ShockDistribution,
        lower: &[Vec<f64>],
        means: &[f64],
        stds: &[f64],
        aligned: &[Vec<f64>],
        rng: &mut StdRng,
    ) -> RiskResult<Vec<f64>> {
        let n = means.len();
        match distribution {
            ShockDistribution::Normal => {
                let independent: Vec<f64> =
                    (0..n).map(|_| StandardNormal.sample(rng)).collect();
                let correlated = CorrelationMatrix::correlate(lower, &independent);
                Ok(correlated
                    .iter()
                    .enumerate()
                    .map(|(i, z)| means[i] + stds[i] * z)
                    .collect())
            }
            ShockDistribution::StudentT { degrees_of_freedom } => {
                let df = *degrees_of_freedom;
                if df <= 2.0 {
                    return Err(RiskError::configuration(format!(
                        "Student-t shocks need degrees of freedom > 2, got {df}"
                    )));
                }
                let dist = StudentT::new(df).map_err(|e| {
                    RiskError::configuration(format!("Student-t distribution: {e}"))
                })?;
                // Normalize to unit variance so stds scale correctly.
                let scale = ((df - 2.0) / df).sqrt();
                let independent: Vec<f64> =
                    (0..n).map(|_| dist.sample(rng) * scale).collect();
                let correlated = CorrelationMatrix::correlate(lower, &independent);
                Ok(correlated
                    .iter()
                    .enumerate()
                    .map(|(i, t)| means[i] + stds[i] * t)
                    .collect())
            }
            ShockDistribution::Empirical => {
                // One historical day per draw, same index across assets so
                // cross-asset dependence survives the resampling.
                let min_len = aligned
                    .iter()
                    .filter(|r| !r.is_empty())
                    .map(|r| r.len())
                    .min()
                    .unwrap_or(0);
                if min_len == 0 {
                    // Nothing to resample, fall back to normal draws.
                    return Self::draw_shocks(
                        &ShockDistribution::Normal,
                        lower,
                        means,
                        stds,
                        aligned,
                        rng,
                    );
                }
                let day = rng.random_range(0..min_len);
                Ok(aligned
                    .iter()
                    .enumerate()
                    .map(|(i, returns)| {
                        if returns.is_empty() {
                            let z: f64 = StandardNormal.sample(rng);
                            means[i] + stds[i] * z
                        } else {
                            returns[returns.len() - min_len + day]
                        }
                    })
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{NoOpEventPublisher, NoOpTelemetry};
    use crate::models::{Position, PositionSide, PriceSeries};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn tester() -> StressTester {
        StressTester::new(
            StressConfig::default(),
            Arc::new(NoOpEventPublisher),
            Arc::new(NoOpTelemetry),
        )
        .expect("valid config")
    }

    fn btc_only_portfolio() -> Portfolio {
        let mut portfolio = Portfolio::new("pf-stress", Decimal::ZERO);
        portfolio
            .positions
            .push(Position::new("BTC", PositionSide::Long, dec!(1), dec!(50000)));
        portfolio.recompute_totals();
        portfolio
    }

    fn noisy_series(symbol: &str, vol: f64, days: usize) -> PriceSeries {
        let mut closes = vec![Decimal::ONE_HUNDRED];
        let mut price = 100.0;
        for i in 0..days {
            let step = if i % 2 == 0 { vol } else { -vol };
            price *= 1.0 + step;
            closes.push(Decimal::from_f64_retain(price).unwrap_or_default());
        }
        PriceSeries::from_closes(symbol, &closes)
    }

    #[tokio::test]
    async fn test_2008_crisis_on_btc_book() {
        // BTC -50% on a $50,000 book: loss $25,000, liquidation flag set.
        let portfolio = btc_only_portfolio();
        let catalog = historical_scenarios();
        let crisis = catalog
            .iter()
            .find(|s| s.name.contains("2008"))
            .expect("2008 scenario");
        let result = tester()
            .run_scenario(&portfolio, crisis)
            .await
            .expect("scenario runs");
        assert!((result.loss - 25_000.0).abs() < 1e-6);
        assert!((result.percentage_loss - 0.5).abs() < 1e-9);
        assert!(result.liquidation_risk);
        assert!(result.margin_call_risk);
    }

    #[tokio::test]
    async fn test_mild_shock_raises_no_flags() {
        let portfolio = btc_only_portfolio();
        let mut scenario = StressScenario::named("mild", "small dip");
        scenario.asset_shocks.insert("BTC".to_string(), -0.05);
        let result = tester()
            .run_scenario(&portfolio, &scenario)
            .await
            .expect("scenario runs");
        assert!((result.loss - 2500.0).abs() < 1e-6);
        assert!(!result.margin_call_risk);
        assert!(!result.liquidation_risk);
    }

    #[tokio::test]
    async fn test_short_position_gains_on_crash() {
        let mut portfolio = Portfolio::new("pf-short", dec!(100000));
        portfolio
            .positions
            .push(Position::new("BTC", PositionSide::Short, dec!(1), dec!(50000)));
        portfolio.recompute_totals();

        let mut scenario = StressScenario::named("crash", "btc halves");
        scenario.asset_shocks.insert("BTC".to_string(), -0.5);
        let result = tester()
            .run_scenario(&portfolio, &scenario)
            .await
            .expect("scenario runs");
        assert!(result.loss < 0.0, "short book should profit, got {}", result.loss);
    }

    #[tokio::test]
    async fn test_historical_battery_runs_all_events() {
        let portfolio = btc_only_portfolio();
        let results = tester()
            .run_historical(&portfolio)
            .await
            .expect("battery runs");
        assert_eq!(results.len(), 5);
    }

    #[tokio::test]
    async fn test_monte_carlo_summary_is_reproducible() {
        let portfolio = btc_only_portfolio();
        let mut history = PriceHistory::new();
        history.insert(noisy_series("BTC", 0.02, 120));

        let tester = tester();
        let first = tester
            .run_monte_carlo(&portfolio, &history, 2000, Some(7))
            .await
            .expect("run succeeds");
        let second = tester
            .run_monte_carlo(&portfolio, &history, 2000, Some(7))
            .await
            .expect("run succeeds");
        assert_eq!(first.iterations, 2000);
        assert!((first.mean_loss - second.mean_loss).abs() < 1e-9);
        assert_eq!(first.worst_draws.len(), 10);
        // Worst draws are sorted worst-first.
        for pair in first.worst_draws.windows(2) {
            assert!(pair[0].loss >= pair[1].loss);
        }
    }

    #[tokio::test]
    async fn test_monte_carlo_without_history_degrades_not_fails() {
        let portfolio = btc_only_portfolio();
        let history = PriceHistory::new();
        let summary = tester()
            .run_monte_carlo(&portfolio, &history, 1000, Some(7))
            .await
            .expect("fallback volatility keeps the path live");
        assert!(summary.loss_p95 > 0.0);
    }

    #[tokio::test]
    async fn test_student_t_needs_df_above_two() {
        let tester = StressTester::new(
            StressConfig {
                shock_distribution: ShockDistribution::StudentT {
                    degrees_of_freedom: 1.5,
                },
                ..Default::default()
            },
            Arc::new(NoOpEventPublisher),
            Arc::new(NoOpTelemetry),
        )
        .expect("config otherwise valid");
        let portfolio = btc_only_portfolio();
        let mut history = PriceHistory::new();
        history.insert(noisy_series("BTC", 0.02, 120));
        let err = tester
            .run_monte_carlo(&portfolio, &history, 1000, Some(7))
            .await
            .expect_err("df <= 2 must fail");
        assert!(err.to_string().contains("degrees of freedom"));
    }

    #[tokio::test]
    async fn test_maximum_loss_scales_with_horizon() {
        let portfolio = btc_only_portfolio();
        let tester = tester();
        let day = tester
            .estimate_maximum_loss(&portfolio, 24.0)
            .await
            .expect("24h estimate");
        let four_days = tester
            .estimate_maximum_loss(&portfolio, 96.0)
            .await
            .expect("96h estimate");
        assert!(day > 0.0);
        assert!((four_days - day * 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_custom_scenario_applies_uniform_shock() {
        let tester = tester();
        let scenario = tester
            .build_custom_scenario("uniform", -0.2, 1.0, 0.0, 0.0)
            .await;
        assert!((scenario.shock_for("BTC", -0.25) - -0.2).abs() < 1e-12);
        assert!((scenario.shock_for("SOL", -0.25) - -0.2).abs() < 1e-12);
    }
}
