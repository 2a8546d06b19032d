//! The position sizer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::SizingConfig;
use crate::error::RiskResult;
use crate::events::{
    EventPublisher, RiskEvent, TelemetryKind, TelemetryRecord, TelemetrySink,
};
use crate::limits::RiskLimits;
use crate::math::{CorrelationMatrix, max_drawdown, std_dev};
use crate::models::{Portfolio, PriceHistory, TradeOutcome, TradingSignal};
use crate::stress::sector_of;

use super::{SizingMethodology, SizingResult};

/// Kelly output bounds, enforced regardless of win-rate/payoff inputs.
const KELLY_FLOOR: f64 = 0.001;
const KELLY_CAP: f64 = 0.25;

/// Default fraction when the trade-history sample is too small for Kelly.
const KELLY_DEFAULT: f64 = 0.02;

/// Smallest meaningful position as a fraction of portfolio value.
const DIVERSIFICATION_FLOOR: f64 = 0.001;

/// Trading days per year for annualized/daily volatility conversion.
const TRADING_DAYS: f64 = 365.0;

/// Position sizer.
///
/// Produces a recommendation from the configured methodology, applies a
/// correlation discount, then enforces the published limits in a fixed
/// order. Every clamp can only shrink the size.
pub struct PositionSizer {
    config: RwLock<SizingConfig>,
    publisher: Arc<dyn EventPublisher>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl PositionSizer {
    /// Create a sizer from a validated configuration.
    pub fn new(
        config: SizingConfig,
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
    pub async fn update_config(&self, config: SizingConfig) -> RiskResult<()> {
        config.validate()?;
        *self.config.write().await = config;
        Ok(())
    }

    /// Recommend a notional size for the signal, bounded by the published
    /// limits. Never negative; missing history degrades to conservative
    /// defaults rather than failing.
    pub async fn size(
        &self,
        signal: &TradingSignal,
        portfolio: &Portfolio,
        history: &PriceHistory,
        outcomes: &[TradeOutcome],
        limits: &RiskLimits,
    ) -> RiskResult<SizingResult> {
        let started = Instant::now();
        let config = self.config.read().await.clone();
        let total_value = portfolio.total_value.to_f64().unwrap_or(0.0).max(0.0);
        let mut constraints = Vec::new();

        let asset_vol = self.asset_volatility(&signal.symbol, history, &config);
        let fraction = match config.methodology {
            SizingMethodology::Kelly => {
                Self::kelly_fraction(outcomes, &config, &mut constraints)
            }
            SizingMethodology::VolatilityTarget => {
                self.volatility_target_fraction(portfolio, history, asset_vol, &config)
            }
            SizingMethodology::RiskParity => {
                self.risk_parity_fraction(portfolio, history, asset_vol, &config)
            }
            SizingMethodology::MaxDrawdown => {
                Self::drawdown_fraction(&signal.symbol, history, outcomes, &config)
            }
            SizingMethodology::Optimal => {
                let kelly = Self::kelly_fraction(outcomes, &config, &mut constraints);
                let vol_target =
                    self.volatility_target_fraction(portfolio, history, asset_vol, &config);
                let parity = self.risk_parity_fraction(portfolio, history, asset_vol, &config);
                let drawdown =
                    Self::drawdown_fraction(&signal.symbol, history, outcomes, &config);
                let blend =
                    0.3 * kelly + 0.3 * vol_target + 0.2 * parity + 0.2 * drawdown;
                // Confidence scales the blend between 0.5x and 1.0x.
                blend * (0.5 + 0.5 * signal.confidence.clamp(0.0, 1.0))
            }
        };

        let correlation_discount =
            self.correlation_discount(&signal.symbol, portfolio, history);
        if correlation_discount < 1.0 {
            constraints.push(format!(
                "correlation with existing holdings reduced size by {:.0}%",
                (1.0 - correlation_discount) * 100.0
            ));
        }

        let recommended = (fraction * correlation_discount).max(0.0) * total_value;
        let adjusted =
            Self::enforce_limits(recommended, signal, portfolio, limits, total_value, &mut constraints);

        let result = SizingResult {
            symbol: signal.symbol.clone(),
            recommended_size: recommended,
            limit_adjusted_size: adjusted,
            methodology: config.methodology,
            confidence: signal.confidence,
            risk_contribution: adjusted * asset_vol,
            applied_constraints: constraints,
            calculated_at: Utc::now(),
        };

        self.publisher
            .publish(RiskEvent::PositionSized {
                symbol: signal.symbol.clone(),
                methodology: config.methodology.to_string(),
                recommended: result.limit_adjusted_size,
                occurred_at: Utc::now(),
            })
            .await;
        self.telemetry
            .record(TelemetryRecord::new(
                TelemetryKind::PositionSizing,
                started.elapsed().as_secs_f64() * 1000.0,
                format!(
                    "{} {}: {:.2} ({} constraints)",
                    config.methodology,
                    signal.symbol,
                    result.limit_adjusted_size,
                    result.applied_constraints.len()
                ),
            ))
            .await;

        Ok(result)
    }

    /// Kelly criterion `f* = (p·b − q)/b`, scaled by the safety fraction
    /// and hard-clamped into `[0.001, 0.25]`.
    fn kelly_fraction(
        outcomes: &[TradeOutcome],
        config: &SizingConfig,
        constraints: &mut Vec<String>,
    ) -> f64 {
        if outcomes.len() < config.min_trade_history {
            constraints.push(format!(
                "trade history too small for Kelly ({} < {}), using default fraction",
                outcomes.len(),
                config.min_trade_history
            ));
            return KELLY_DEFAULT;
        }

        let wins: Vec<f64> = outcomes
            .iter()
            .filter(|o| o.is_win())
            .map(|o| o.return_pct)
            .collect();
        let losses: Vec<f64> = outcomes
            .iter()
            .filter(|o| !o.is_win())
            .map(|o| o.return_pct.abs())
            .collect();

        let p = wins.len() as f64 / outcomes.len() as f64;
        let q = 1.0 - p;
        let avg_win = crate::math::mean(&wins).unwrap_or(0.0);
        let avg_loss = crate::math::mean(&losses).unwrap_or(0.0);
        if avg_loss <= f64::EPSILON || avg_win <= f64::EPSILON {
            // Degenerate payoff profile, fall back to the cap edge.
            return if avg_win > 0.0 { KELLY_CAP } else { KELLY_FLOOR };
        }
        let b = avg_win / avg_loss;
        let raw = (p * b - q) / b;
        (raw * config.kelly_fraction).clamp(KELLY_FLOOR, KELLY_CAP)
    }

    /// Volatility targeting: `targetVol/assetVol`, scaled by how far the
    /// book currently sits below its volatility target.
    fn volatility_target_fraction(
        &self,
        portfolio: &Portfolio,
        history: &PriceHistory,
        asset_vol: f64,
        config: &SizingConfig,
    ) -> f64 {
        let daily_target = config.target_volatility / TRADING_DAYS.sqrt();
        let raw = (daily_target / asset_vol).min(1.0);

        let portfolio_vol = self.portfolio_volatility(portfolio, history, config);
        let deficit = if portfolio_vol >= daily_target {
            // Already at or above target, admit only a sliver.
            0.25
        } else {
            1.0 - portfolio_vol / daily_target
        };
        raw * deficit
    }

    /// Equal risk contribution across `positions + 1` slots.
    fn risk_parity_fraction(
        &self,
        portfolio: &Portfolio,
        history: &PriceHistory,
        asset_vol: f64,
        config: &SizingConfig,
    ) -> f64 {
        let slots = portfolio.positions.len() as f64 + 1.0;
        let mut vols: Vec<f64> = portfolio
            .positions
            .iter()
            .map(|p| self.asset_volatility(&p.symbol, history, config))
            .collect();
        vols.push(asset_vol);
        let avg_vol = crate::math::mean(&vols).unwrap_or(asset_vol);
        ((avg_vol / asset_vol) / slots).min(1.0)
    }

    /// Inversely proportional to the asset's historical drawdown, further
    /// discounted by the book's own realized drawdown.
    fn drawdown_fraction(
        symbol: &str,
        history: &PriceHistory,
        outcomes: &[TradeOutcome],
        config: &SizingConfig,
    ) -> f64 {
        let asset_dd = history
            .get(symbol)
            .map(|series| {
                let closes: Vec<f64> = series
                    .candles
                    .iter()
                    .map(|c| c.close.to_f64().unwrap_or(0.0))
                    .collect();
                max_drawdown(&closes)
            })
            .filter(|dd| *dd > f64::EPSILON)
            .unwrap_or(0.5);

        let mut equity = vec![1.0];
        for outcome in outcomes {
            let last = *equity.last().unwrap_or(&1.0);
            equity.push(last * (1.0 + outcome.return_pct));
        }
        let book_dd = max_drawdown(&equity);
        let discount =
            (1.0 - book_dd / config.max_drawdown_tolerance).clamp(0.0, 1.0);

        (config.max_drawdown_tolerance / asset_dd).min(1.0) * discount
    }

    /// Multiplier in [0.5, 1.0]: shrinks toward 0.5 as the candidate's
    /// average correlation with existing holdings approaches 1.
    fn correlation_discount(
        &self,
        symbol: &str,
        portfolio: &Portfolio,
        history: &PriceHistory,
    ) -> f64 {
        let mut symbols: Vec<String> = portfolio
            .positions
            .iter()
            .map(|p| p.symbol.clone())
            .filter(|s| s != symbol)
            .collect();
        if symbols.is_empty() {
            return 1.0;
        }
        symbols.push(symbol.to_string());

        let mut returns = HashMap::new();
        for s in &symbols {
            let series = history.returns_for(s);
            if series.len() < 2 {
                return 1.0;
            }
            returns.insert(s.clone(), series);
        }
        let matrix = CorrelationMatrix::from_returns(&symbols, &returns);
        let candidate = symbols.len() - 1;
        let avg: f64 = (0..candidate)
            .filter_map(|i| matrix.data.get(candidate).and_then(|row| row.get(i)))
            .sum::<f64>()
            / candidate as f64;
        1.0 - 0.5 * avg.max(0.0)
    }

    /// Limit enforcement in significance order: position limit, remaining
    /// exposure budget, sector budget, then the diversification floor.
    fn enforce_limits(
        recommended: f64,
        signal: &TradingSignal,
        portfolio: &Portfolio,
        limits: &RiskLimits,
        total_value: f64,
        constraints: &mut Vec<String>,
    ) -> f64 {
        let mut size = recommended.max(0.0);

        if size > limits.position_limit {
            size = limits.position_limit;
            constraints.push(format!(
                "clamped to max position size {:.2}",
                limits.position_limit
            ));
        }

        let current_exposure = portfolio.total_exposure().to_f64().unwrap_or(0.0);
        let exposure_budget = (limits.exposure_limit - current_exposure).max(0.0);
        if size > exposure_budget {
            size = exposure_budget;
            constraints.push(format!(
                "clamped to remaining exposure budget {exposure_budget:.2}"
            ));
        }

        let sector = sector_of(&signal.symbol);
        let sector_exposure: f64 = portfolio
            .positions
            .iter()
            .filter(|p| sector_of(&p.symbol) == sector)
            .map(|p| p.notional().to_f64().unwrap_or(0.0))
            .sum();
        let sector_budget = (limits.exposure_limit * 0.5 - sector_exposure).max(0.0);
        if size > sector_budget {
            size = sector_budget;
            constraints.push(format!(
                "clamped to {sector} sector budget {sector_budget:.2}"
            ));
        }

        let floor = DIVERSIFICATION_FLOOR * total_value;
        if size > 0.0 && size < floor {
            size = 0.0;
            constraints.push(format!(
                "below diversification floor {floor:.2}, size zeroed"
            ));
        }

        size
    }

    /// Daily volatility for one symbol, with a logged conservative default
    /// when the series is missing or degenerate.
    fn asset_volatility(
        &self,
        symbol: &str,
        history: &PriceHistory,
        config: &SizingConfig,
    ) -> f64 {
        let returns = history.returns_for(symbol);
        match std_dev(&returns) {
            Some(sigma) if sigma > f64::EPSILON => sigma,
            _ => {
                warn!(
                    symbol,
                    fallback = config.default_daily_volatility,
                    "no usable history for sizing volatility, using fallback"
                );
                config.default_daily_volatility
            }
        }
    }

    /// Book-level daily volatility approximated as the gross-weight
    /// average of per-asset volatilities.
    fn portfolio_volatility(
        &self,
        portfolio: &Portfolio,
        history: &PriceHistory,
        config: &SizingConfig,
    ) -> f64 {
        let total = portfolio.total_value.to_f64().unwrap_or(0.0);
        if total <= 0.0 || portfolio.positions.is_empty() {
            return 0.0;
        }
        portfolio
            .positions
            .iter()
            .map(|p| {
                let weight =
                    p.notional().to_f64().unwrap_or(0.0) / total;
                weight * self.asset_volatility(&p.symbol, history, config)
            })
            .sum()
    }
}
