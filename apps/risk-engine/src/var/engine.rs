//! The VaR estimation engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::config::VarConfig;
use crate::error::{RiskError, RiskResult};
use crate::events::{
    EventPublisher, RiskEvent, TelemetryKind, TelemetryRecord, TelemetrySink,
};
use crate::math::{CorrelationMatrix, mean, normal_inv_cdf, normal_pdf, percentile_index, std_dev};
use crate::models::{Portfolio, PriceHistory};

use super::cache::VarCache;
use super::{VaRResult, VarMethodology};

/// Relative exposure bump used for marginal VaR finite differences.
const MARGINAL_BUMP: f64 = 0.01;

/// Per-book statistics gathered once per estimation.
struct BookStats {
    symbols: Vec<String>,
    weights: Vec<f64>,
    means: Vec<f64>,
    stds: Vec<f64>,
    /// Per-asset returns aligned on their trailing overlap.
    aligned: Vec<Vec<f64>>,
    matrix: CorrelationMatrix,
}

/// Value-at-Risk engine.
///
/// Owns its result cache; never mutates the portfolio. Events go to the
/// injected publisher, timing records to the telemetry sink.
pub struct VarEngine {
    config: RwLock<VarConfig>,
    cache: Mutex<VarCache>,
    publisher: Arc<dyn EventPublisher>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl VarEngine {
    /// Create an engine from a validated configuration.
    pub fn new(
        config: VarConfig,
        publisher: Arc<dyn EventPublisher>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> RiskResult<Self> {
        config.validate()?;
        let ttl = Duration::from_secs(config.cache_ttl_secs);
        Ok(Self {
            config: RwLock::new(config),
            cache: Mutex::new(VarCache::new(ttl)),
            publisher,
            telemetry,
        })
    }

    /// Replace the configuration and invalidate the result cache wholesale.
    pub async fn update_config(&self, config: VarConfig) -> RiskResult<()> {
        config.validate()?;
        let ttl = Duration::from_secs(config.cache_ttl_secs);
        *self.config.write().await = config;
        *self.cache.lock().await = VarCache::new(ttl);
        debug!("VaR configuration replaced, result cache cleared");
        Ok(())
    }

    /// Drop all cached results.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// Number of cached results (test and diagnostics hook).
    pub async fn cached_results(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Estimate VaR with the configured default methodology and confidence.
    pub async fn estimate_default(
        &self,
        portfolio: &Portfolio,
        history: &PriceHistory,
    ) -> RiskResult<VaRResult> {
        let (methodology, confidence) = {
            let config = self.config.read().await;
            (config.methodology, config.confidence)
        };
        self.estimate(portfolio, history, methodology, confidence)
            .await
    }

    /// Estimate VaR and CVaR for the portfolio.
    ///
    /// # Errors
    ///
    /// `RiskError::Calculation` when any required return series is shorter
    /// than the configured lookback, an asset shows zero volatility, or the
    /// correlation matrix cannot be factored.
    pub async fn estimate(
        &self,
        portfolio: &Portfolio,
        history: &PriceHistory,
        methodology: VarMethodology,
        confidence: f64,
    ) -> RiskResult<VaRResult> {
        let started = Instant::now();
        let config = self.config.read().await.clone();

        if confidence <= 0.5 || confidence >= 1.0 {
            return Err(RiskError::configuration(format!(
                "confidence must be in (0.5, 1.0), got {confidence}"
            )));
        }

        if portfolio.positions.is_empty() {
            return Ok(Self::empty_result(methodology, confidence, &config));
        }

        let key = VarCache::key(methodology, confidence, portfolio);
        if let Some(hit) = self.cache.lock().await.get(&key) {
            debug!(%methodology, confidence, "VaR cache hit");
            return Ok(hit.clone());
        }

        let result = match self
            .compute(portfolio, history, methodology, confidence, &config)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                self.publisher
                    .publish(RiskEvent::CalculationFailed {
                        context: format!("{methodology} VaR"),
                        message: err.to_string(),
                        occurred_at: Utc::now(),
                    })
                    .await;
                return Err(err);
            }
        };

        self.cache.lock().await.insert(key, result.clone());

        self.publisher
            .publish(RiskEvent::VarCalculated {
                portfolio_id: portfolio.id.clone(),
                methodology: methodology.to_string(),
                confidence,
                value: result.value,
                occurred_at: Utc::now(),
            })
            .await;
        self.telemetry
            .record(TelemetryRecord::new(
                TelemetryKind::VarCalculation,
                started.elapsed().as_secs_f64() * 1000.0,
                format!(
                    "{methodology} VaR at {confidence:.3}: {value:.2}",
                    value = result.value
                ),
            ))
            .await;

        Ok(result)
    }

    async fn compute(
        &self,
        portfolio: &Portfolio,
        history: &PriceHistory,
        methodology: VarMethodology,
        confidence: f64,
        config: &VarConfig,
    ) -> RiskResult<VaRResult> {
        let stats = Self::collect_stats(portfolio, history, config.lookback, methodology)?;
        let total_value = portfolio.total_value.to_f64().unwrap_or(0.0);
        if total_value <= 0.0 {
            return Err(RiskError::calculation(
                format!("{methodology} VaR"),
                "portfolio has no positive value",
            ));
        }

        let horizon_scale = config.horizon_days.sqrt();
        let z = normal_inv_cdf(confidence);

        // Asset-level scenario returns reused for marginal recomputation so
        // the finite difference sees common random numbers.
        let scenarios: Option<Vec<Vec<f64>>> = match methodology {
            VarMethodology::Parametric => None,
            VarMethodology::Historical => Some(Self::historical_scenarios(&stats)),
            VarMethodology::MonteCarlo => {
                Some(self.monte_carlo_scenarios(&stats, config).await?)
            }
        };

        let (var_pct, cvar_pct) = Self::var_for_weights(
            &stats,
            &stats.weights,
            scenarios.as_deref(),
            confidence,
            z,
            horizon_scale,
            methodology,
        )?;

        let component_var =
            Self::component_var(&stats, z, horizon_scale, total_value);
        let marginal_var = Self::marginal_var(
            &stats,
            scenarios.as_deref(),
            confidence,
            z,
            horizon_scale,
            methodology,
            total_value,
            var_pct * total_value,
        );

        Ok(VaRResult {
            value: var_pct * total_value,
            percentage: var_pct,
            cvar: cvar_pct * total_value,
            methodology,
            confidence,
            horizon_days: config.horizon_days,
            component_var,
            marginal_var,
            calculated_at: Utc::now(),
        })
    }

    /// Gather weights, moments, aligned returns, and the correlation matrix.
    fn collect_stats(
        portfolio: &Portfolio,
        history: &PriceHistory,
        lookback: usize,
        methodology: VarMethodology,
    ) -> RiskResult<BookStats> {
        let context = format!("{methodology} VaR");
        let total = portfolio.total_value.to_f64().unwrap_or(0.0);
        let mut symbols = Vec::new();
        let mut weights = Vec::new();
        let mut means = Vec::new();
        let mut stds = Vec::new();
        let mut series = Vec::new();

        for position in &portfolio.positions {
            let returns = history.returns_for(&position.symbol);
            if returns.len() < lookback {
                return Err(RiskError::calculation(
                    &context,
                    format!(
                        "insufficient history for {}: {} returns < lookback {}",
                        position.symbol,
                        returns.len(),
                        lookback
                    ),
                ));
            }
            let mu = mean(&returns).unwrap_or(0.0);
            let sigma = std_dev(&returns).unwrap_or(0.0);
            if sigma <= f64::EPSILON {
                return Err(RiskError::calculation(
                    &context,
                    format!("zero volatility for {}", position.symbol),
                ));
            }
            let value = position.market_value().to_f64().unwrap_or(0.0);
            symbols.push(position.symbol.clone());
            weights.push(if total > 0.0 { value / total } else { 0.0 });
            means.push(mu);
            stds.push(sigma);
            series.push(returns);
        }

        let min_len = series.iter().map(Vec::len).min().unwrap_or(0);
        let aligned: Vec<Vec<f64>> = series
            .into_iter()
            .map(|r| r[r.len() - min_len..].to_vec())
            .collect();

        let mut return_map = HashMap::new();
        for (symbol, returns) in symbols.iter().zip(&aligned) {
            return_map.insert(symbol.clone(), returns.clone());
        }
        let matrix = CorrelationMatrix::from_returns(&symbols, &return_map);

        Ok(BookStats {
            symbols,
            weights,
            means,
            stds,
            aligned,
            matrix,
        })
    }

    /// Historical scenario rows: one vector of asset returns per day.
    fn historical_scenarios(stats: &BookStats) -> Vec<Vec<f64>> {
        let days = stats.aligned.first().map_or(0, Vec::len);
        (0..days)
            .map(|t| stats.aligned.iter().map(|asset| asset[t]).collect())
            .collect()
    }

    /// Monte Carlo scenario rows: correlated draws scaled by asset moments.
    async fn monte_carlo_scenarios(
        &self,
        stats: &BookStats,
        config: &VarConfig,
    ) -> RiskResult<Vec<Vec<f64>>> {
        let lower = stats.matrix.cholesky()?;
        let n = stats.symbols.len();
        let mut rng = config
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

        let mut scenarios = Vec::with_capacity(config.monte_carlo_iterations);
        for _ in 0..config.monte_carlo_iterations {
            let independent: Vec<f64> =
                (0..n).map(|_| StandardNormal.sample(&mut rng)).collect();
            let correlated = CorrelationMatrix::correlate(&lower, &independent);
            let returns: Vec<f64> = correlated
                .iter()
                .enumerate()
                .map(|(i, z)| stats.means[i] + stats.stds[i] * z)
                .collect();
            scenarios.push(returns);
        }
        Ok(scenarios)
    }

    /// Total VaR/CVaR percentages for a weight vector, either closed-form
    /// (parametric) or from scenario rows (historical / Monte Carlo).
    fn var_for_weights(
        stats: &BookStats,
        weights: &[f64],
        scenarios: Option<&[Vec<f64>]>,
        confidence: f64,
        z: f64,
        horizon_scale: f64,
        methodology: VarMethodology,
    ) -> RiskResult<(f64, f64)> {
        match scenarios {
            None => {
                let sigma = stats
                    .matrix
                    .portfolio_variance(weights, &stats.stds)
                    .sqrt();
                let mu: f64 = weights
                    .iter()
                    .zip(&stats.means)
                    .map(|(w, m)| w * m)
                    .sum();
                if sigma <= f64::EPSILON {
                    return Err(RiskError::calculation(
                        format!("{methodology} VaR"),
                        "portfolio volatility is zero",
                    ));
                }
                let var_pct = (z * sigma - mu).max(0.0) * horizon_scale;
                let es_pct =
                    (sigma * normal_pdf(z) / (1.0 - confidence) - mu).max(0.0) * horizon_scale;
                Ok((var_pct, es_pct.max(var_pct)))
            }
            Some(rows) => {
                let mut portfolio_returns: Vec<f64> = rows
                    .iter()
                    .map(|row| {
                        row.iter()
                            .zip(weights)
                            .map(|(r, w)| r * w)
                            .sum::<f64>()
                    })
                    .collect();
                portfolio_returns.sort_by(|a, b| a.total_cmp(b));
                let idx = percentile_index(portfolio_returns.len(), confidence);
                let var_pct = (-portfolio_returns[idx]).max(0.0) * horizon_scale;
                let tail = &portfolio_returns[..=idx];
                let cvar_pct = mean(tail).map_or(var_pct, |m| (-m).max(0.0) * horizon_scale);
                Ok((var_pct, cvar_pct.max(var_pct)))
            }
        }
    }

    /// Closed-form component VaR apportionment:
    /// `w_i · (Σw)_i / σ_p · z`, in currency.
    fn component_var(
        stats: &BookStats,
        z: f64,
        horizon_scale: f64,
        total_value: f64,
    ) -> HashMap<String, f64> {
        let sigma = stats
            .matrix
            .portfolio_variance(&stats.weights, &stats.stds)
            .sqrt();
        if sigma <= f64::EPSILON {
            // Failed contributions are omitted, not reported as zero.
            return HashMap::new();
        }
        let sigma_w = stats
            .matrix
            .covariance_times_weights(&stats.weights, &stats.stds);
        stats
            .symbols
            .iter()
            .enumerate()
            .map(|(i, symbol)| {
                let contribution =
                    stats.weights[i] * sigma_w[i] / sigma * z * horizon_scale * total_value;
                (symbol.clone(), contribution)
            })
            .collect()
    }

    /// Finite-difference marginal VaR: bump one position's exposure by 1%,
    /// recompute total VaR with the same methodology (and the same scenario
    /// rows), report the sensitivity per unit of exposure.
    #[allow(clippy::too_many_arguments)]
    fn marginal_var(
        stats: &BookStats,
        scenarios: Option<&[Vec<f64>]>,
        confidence: f64,
        z: f64,
        horizon_scale: f64,
        methodology: VarMethodology,
        total_value: f64,
        base_var_value: f64,
    ) -> HashMap<String, f64> {
        let mut out = HashMap::new();
        for (i, symbol) in stats.symbols.iter().enumerate() {
            let value_i = stats.weights[i] * total_value;
            let delta = value_i.abs() * MARGINAL_BUMP;
            if delta <= f64::EPSILON {
                continue;
            }
            let bumped_value_i = value_i * (1.0 + MARGINAL_BUMP);
            let bumped_total = total_value + value_i * MARGINAL_BUMP;
            if bumped_total <= 0.0 {
                continue;
            }
            let bumped_weights: Vec<f64> = stats
                .weights
                .iter()
                .enumerate()
                .map(|(j, w)| {
                    if j == i {
                        bumped_value_i / bumped_total
                    } else {
                        w * total_value / bumped_total
                    }
                })
                .collect();
            match Self::var_for_weights(
                stats,
                &bumped_weights,
                scenarios,
                confidence,
                z,
                horizon_scale,
                methodology,
            ) {
                Ok((bumped_pct, _)) => {
                    let bumped_value = bumped_pct * bumped_total;
                    out.insert(symbol.clone(), (bumped_value - base_var_value) / delta);
                }
                // A failed contribution is omitted rather than forced to zero.
                Err(_) => continue,
            }
        }
        out
    }

    fn empty_result(
        methodology: VarMethodology,
        confidence: f64,
        config: &VarConfig,
    ) -> VaRResult {
        VaRResult {
            value: 0.0,
            percentage: 0.0,
            cvar: 0.0,
            methodology,
            confidence,
            horizon_days: config.horizon_days,
            component_var: HashMap::new(),
            marginal_var: HashMap::new(),
            calculated_at: Utc::now(),
        }
    }
}
