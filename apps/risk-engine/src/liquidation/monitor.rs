//! The liquidation monitor.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::LiquidationConfig;
use crate::error::{RiskError, RiskResult};
use crate::events::{
    EventPublisher, RiskEvent, TelemetryKind, TelemetryRecord, TelemetrySink,
};
use crate::math::std_dev;
use crate::models::{Portfolio, Position, PriceHistory};
use crate::stress::sector_of;

use super::{
    DeleverageStrategy, ExecutionPort, LiquidationFill, LiquidationOrder,
    LiquidationOrderType, LiquidationOutcome, MarginStatus, MarginStatusLevel,
    RemediationAction,
};

/// Half-spread offset for passive exits on still-profitable positions.
const LIMIT_INSIDE_SPREAD: f64 = 0.0005;

/// Volatility fallback for risk-weighted ordering without history.
const FALLBACK_VOLATILITY: f64 = 0.05;

/// Liquidation monitor.
///
/// Evaluates margin health on every portfolio update and, once the
/// liquidation threshold is breached, executes ordered exits through the
/// injected execution port. One liquidation attempt runs at a time; a
/// concurrent attempt fails fast instead of queueing.
pub struct LiquidationMonitor {
    config: RwLock<LiquidationConfig>,
    execution: Arc<dyn ExecutionPort>,
    publisher: Arc<dyn EventPublisher>,
    telemetry: Arc<dyn TelemetrySink>,
    in_flight: Mutex<()>,
    margin_call_deadline: Mutex<Option<DateTime<Utc>>>,
}

impl LiquidationMonitor {
    /// Create a monitor from a validated configuration.
    pub fn new(
        config: LiquidationConfig,
        execution: Arc<dyn ExecutionPort>,
        publisher: Arc<dyn EventPublisher>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> RiskResult<Self> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
            execution,
            publisher,
            telemetry,
            in_flight: Mutex::new(()),
            margin_call_deadline: Mutex::new(None),
        })
    }

    /// Replace the configuration.
    pub async fn update_config(&self, config: LiquidationConfig) -> RiskResult<()> {
        config.validate()?;
        *self.config.write().await = config;
        Ok(())
    }

    /// Evaluate margin health.
    ///
    /// Raises a margin call (with remediation actions and a grace deadline)
    /// on first entry into the margin-call band. An active margin call
    /// suppresses the liquidation status until its deadline elapses.
    pub async fn check(&self, portfolio: &Portfolio) -> MarginStatus {
        let started = Instant::now();
        let config = self.config.read().await.clone();
        let level = portfolio.margin_level();
        let now = Utc::now();

        let mut deadline_guard = self.margin_call_deadline.lock().await;
        let status = if level >= config.warning_threshold {
            *deadline_guard = None;
            MarginStatusLevel::Safe
        } else if level >= config.margin_call_threshold {
            *deadline_guard = None;
            MarginStatusLevel::Warning
        } else if level >= config.liquidation_threshold {
            if deadline_guard.is_none() {
                let deadline =
                    now + ChronoDuration::seconds(config.margin_call_grace_secs as i64);
                *deadline_guard = Some(deadline);
                drop(deadline_guard);
                self.raise_margin_call(portfolio, &config, level, deadline).await;
                deadline_guard = self.margin_call_deadline.lock().await;
            }
            MarginStatusLevel::MarginCall
        } else {
            match *deadline_guard {
                Some(deadline) if now < deadline => MarginStatusLevel::MarginCall,
                _ => MarginStatusLevel::Liquidation,
            }
        };
        drop(deadline_guard);

        let (to_call, to_liquidation) = Self::burn_estimates(portfolio, &config);

        self.telemetry
            .record(TelemetryRecord::new(
                TelemetryKind::LiquidationCheck,
                started.elapsed().as_secs_f64() * 1000.0,
                format!("{}: margin level {level:.4}", portfolio.id),
            ))
            .await;

        MarginStatus {
            margin_used: portfolio.margin_used,
            margin_available: portfolio.margin_available,
            margin_level: level,
            status,
            time_to_margin_call_secs: to_call,
            time_to_liquidation_secs: to_liquidation,
            checked_at: now,
        }
    }

    /// Execute a liquidation attempt.
    ///
    /// Closes positions in strategy order, updating the portfolio after
    /// each fill, and stops early once the margin level recovers (when
    /// partial liquidation is allowed). Completed closures survive a later
    /// order failure.
    ///
    /// # Errors
    ///
    /// `RiskError::LiquidationFailed` when another attempt is in flight,
    /// when the margin level is still above the liquidation threshold, or
    /// when the execution layer rejects an order mid-sequence.
    pub async fn liquidate(
        &self,
        portfolio: &mut Portfolio,
        history: &PriceHistory,
    ) -> RiskResult<LiquidationOutcome> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            return Err(RiskError::liquidation_failed(
                &portfolio.id,
                "another liquidation attempt is in progress",
            ));
        };

        let config = self.config.read().await.clone();
        let level = portfolio.margin_level();
        if level >= config.liquidation_threshold {
            return Err(RiskError::liquidation_failed(
                &portfolio.id,
                format!(
                    "margin level {level:.4} is above the liquidation threshold {}",
                    config.liquidation_threshold
                ),
            ));
        }

        warn!(portfolio = %portfolio.id, level, "liquidation started");
        let ordered = Self::ordered_symbols(portfolio, config.strategy, Some(history));
        let mut closed_symbols = Vec::new();
        let mut proceeds = Decimal::ZERO;
        let mut stopped_early = false;

        for symbol in ordered {
            let Some(position) = portfolio.position(&symbol).cloned() else {
                continue;
            };
            let order = Self::build_order(&position);
            let fill = match self.execution.execute(&order).await {
                Ok(fill) => fill,
                Err(err) => {
                    // Completed closures stay closed; the failure surfaces
                    // with the partial state intact.
                    warn!(
                        portfolio = %portfolio.id,
                        symbol = %symbol,
                        error = %err,
                        "liquidation order rejected"
                    );
                    return Err(RiskError::liquidation_failed(
                        &portfolio.id,
                        format!("order for {symbol} rejected: {err}"),
                    ));
                }
            };

            let cash_delta = Self::apply_fill(portfolio, &position, &fill, &config);
            proceeds += cash_delta;
            closed_symbols.push(symbol.clone());

            self.publisher
                .publish(RiskEvent::PositionLiquidated {
                    portfolio_id: portfolio.id.clone(),
                    symbol,
                    proceeds: cash_delta,
                    occurred_at: Utc::now(),
                })
                .await;

            if config.allow_partial
                && portfolio.margin_level() >= config.liquidation_threshold
            {
                stopped_early = true;
                break;
            }
        }

        *self.margin_call_deadline.lock().await = None;
        let final_margin_level = portfolio.margin_level();
        info!(
            portfolio = %portfolio.id,
            closed = closed_symbols.len(),
            final_margin_level,
            "liquidation finished"
        );
        self.publisher
            .publish(RiskEvent::LiquidationCompleted {
                portfolio_id: portfolio.id.clone(),
                positions_closed: closed_symbols.len(),
                final_margin_level,
                occurred_at: Utc::now(),
            })
            .await;

        Ok(LiquidationOutcome {
            portfolio_id: portfolio.id.clone(),
            closed_symbols,
            proceeds,
            final_margin_level,
            stopped_early,
            completed_at: Utc::now(),
        })
    }

    /// Derive and store the analytic liquidation price for every position.
    pub async fn refresh_liquidation_prices(&self, portfolio: &mut Portfolio) {
        let maintenance = self.config.read().await.maintenance_margin_ratio;
        for position in &mut portfolio.positions {
            position.liquidation_price = Self::liquidation_price(position, maintenance);
        }
    }

    /// Analytic liquidation price from entry price, margin ratio, and the
    /// maintenance margin ratio, directionally adjusted for side.
    #[must_use]
    pub fn liquidation_price(position: &Position, maintenance_ratio: f64) -> Option<Decimal> {
        let entry_notional = position.size * position.entry_price;
        if entry_notional <= Decimal::ZERO || position.margin <= Decimal::ZERO {
            return None;
        }
        let margin_ratio = (position.margin / entry_notional).to_f64().unwrap_or(0.0);
        let offset = margin_ratio - maintenance_ratio;
        if offset <= 0.0 {
            return None;
        }
        let offset = Decimal::from_f64_retain(offset)?;
        let price = match position.side {
            crate::models::PositionSide::Long => {
                position.entry_price * (Decimal::ONE - offset)
            }
            crate::models::PositionSide::Short => {
                position.entry_price * (Decimal::ONE + offset)
            }
        };
        Some(price)
    }

    async fn raise_margin_call(
        &self,
        portfolio: &Portfolio,
        config: &LiquidationConfig,
        level: f64,
        deadline: DateTime<Utc>,
    ) {
        let threshold = Decimal::from_f64_retain(config.margin_call_threshold)
            .unwrap_or(Decimal::ONE);
        let deficit =
            (portfolio.margin_used * threshold - portfolio.margin_available).max(Decimal::ZERO);
        let actions = Self::remediation_actions(portfolio, config, deficit, deadline);
        warn!(
            portfolio = %portfolio.id,
            level,
            %deficit,
            "margin call raised"
        );
        self.publisher
            .publish(RiskEvent::MarginCall {
                portfolio_id: portfolio.id.clone(),
                margin_level: level,
                deficit,
                actions: actions.iter().map(|a| a.description.clone()).collect(),
                deadline,
                occurred_at: Utc::now(),
            })
            .await;
    }

    /// Three remediations, each carrying the grace deadline: add funds,
    /// close the top candidates, or halve the worst one.
    fn remediation_actions(
        portfolio: &Portfolio,
        config: &LiquidationConfig,
        deficit: Decimal,
        deadline: DateTime<Utc>,
    ) -> Vec<RemediationAction> {
        let candidates = Self::ordered_symbols(portfolio, config.strategy, None);
        let close_list = candidates
            .iter()
            .take(2)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let reduce_target = candidates.first().cloned().unwrap_or_default();
        vec![
            RemediationAction {
                description: format!("deposit {deficit:.2} additional margin"),
                deadline,
            },
            RemediationAction {
                description: format!("close positions: {close_list}"),
                deadline,
            },
            RemediationAction {
                description: format!("reduce {reduce_target} by 50%"),
                deadline,
            },
        ]
    }

    /// Symbols in deleveraging order for the configured strategy.
    fn ordered_symbols(
        portfolio: &Portfolio,
        strategy: DeleverageStrategy,
        history: Option<&PriceHistory>,
    ) -> Vec<String> {
        let mut indexed: Vec<(usize, &Position)> =
            portfolio.positions.iter().enumerate().collect();
        match strategy {
            DeleverageStrategy::Proportional => {
                // Book order, a fair rotation with no scoring.
            }
            DeleverageStrategy::WorstFirst => {
                indexed.sort_by(|a, b| a.1.unrealized_pnl.cmp(&b.1.unrealized_pnl));
            }
            DeleverageStrategy::RiskWeighted => {
                indexed.sort_by(|a, b| {
                    let score = |p: &Position| {
                        p.leverage().to_f64().unwrap_or(1.0) * Self::volatility_of(p, history)
                    };
                    score(b.1).total_cmp(&score(a.1))
                });
            }
            DeleverageStrategy::Optimal => {
                let total_exposure = portfolio.total_exposure().to_f64().unwrap_or(0.0);
                indexed.sort_by(|a, b| {
                    let score = |p: &Position| {
                        Self::optimal_score(p, total_exposure, history)
                    };
                    score(b.1).total_cmp(&score(a.1))
                });
            }
        }
        indexed
            .into_iter()
            .map(|(_, p)| p.symbol.clone())
            .collect()
    }

    /// Weighted closure score: unrealized-loss ratio, leverage, asset
    /// liquidity, and concentration.
    fn optimal_score(
        position: &Position,
        total_exposure: f64,
        history: Option<&PriceHistory>,
    ) -> f64 {
        let loss_ratio = position.loss_ratio().to_f64().unwrap_or(0.0);
        let leverage = (position.leverage().to_f64().unwrap_or(1.0) / 10.0).min(1.0);
        let illiquidity = 1.0 - Self::liquidity_of(&position.symbol);
        let concentration = if total_exposure > 0.0 {
            position.notional().to_f64().unwrap_or(0.0) / total_exposure
        } else {
            0.0
        };
        let volatility = Self::volatility_of(position, history) / FALLBACK_VOLATILITY;
        0.4 * loss_ratio + 0.3 * leverage * volatility.min(2.0)
            + 0.2 * illiquidity
            + 0.1 * concentration
    }

    fn volatility_of(position: &Position, history: Option<&PriceHistory>) -> f64 {
        history
            .map(|h| h.returns_for(&position.symbol))
            .and_then(|returns| std_dev(&returns))
            .filter(|sigma| *sigma > f64::EPSILON)
            .unwrap_or(FALLBACK_VOLATILITY)
    }

    /// Rough exit-liquidity score per sector bucket.
    fn liquidity_of(symbol: &str) -> f64 {
        match sector_of(symbol) {
            "majors" => 0.9,
            "stablecoins" => 0.95,
            _ => 0.6,
        }
    }

    /// Market order for losers, passive limit just inside the spread for
    /// positions still in profit.
    fn build_order(position: &Position) -> LiquidationOrder {
        let closing_long = position.side == crate::models::PositionSide::Long;
        let order_type = if position.is_losing() {
            LiquidationOrderType::Market
        } else {
            let offset = Decimal::from_f64_retain(LIMIT_INSIDE_SPREAD)
                .unwrap_or(Decimal::ZERO);
            let price = if closing_long {
                position.current_price * (Decimal::ONE - offset)
            } else {
                position.current_price * (Decimal::ONE + offset)
            };
            LiquidationOrderType::Limit { price }
        };
        LiquidationOrder {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: position.symbol.clone(),
            size: position.size,
            closing_long,
            reference_price: position.current_price,
            order_type,
        }
    }

    /// Apply one fill atomically: slippage and fee model, cash and margin
    /// adjustment, position removal, invariant restoration. Returns the
    /// net cash delta.
    fn apply_fill(
        portfolio: &mut Portfolio,
        position: &Position,
        fill: &LiquidationFill,
        config: &LiquidationConfig,
    ) -> Decimal {
        let slippage = Decimal::from_f64_retain(config.slippage).unwrap_or(Decimal::ZERO);
        let fee_rate = Decimal::from_f64_retain(config.fee).unwrap_or(Decimal::ZERO);

        // Closing a long sells into the bid, closing a short lifts the ask.
        let effective_price = match position.side {
            crate::models::PositionSide::Long => fill.price * (Decimal::ONE - slippage),
            crate::models::PositionSide::Short => fill.price * (Decimal::ONE + slippage),
        };
        let fee = fill.size * effective_price * fee_rate;
        let cash_delta = position.signed_size() * effective_price - fee;

        portfolio.remove_position(&position.symbol);
        portfolio.cash += cash_delta;
        portfolio.margin_available += position.margin;
        portfolio.recompute_totals();
        cash_delta
    }

    /// Time-to-threshold estimates from the margin burn rate: the hourly
    /// unrealized-loss drain across losing positions.
    fn burn_estimates(
        portfolio: &Portfolio,
        config: &LiquidationConfig,
    ) -> (Option<f64>, Option<f64>) {
        let now = Utc::now();
        let mut burn_per_sec = 0.0;
        for position in &portfolio.positions {
            if !position.is_losing() {
                continue;
            }
            let age_secs = (now - position.opened_at).num_seconds().max(1) as f64;
            let loss = -position.unrealized_pnl.to_f64().unwrap_or(0.0);
            burn_per_sec += loss / age_secs;
        }
        if burn_per_sec <= f64::EPSILON {
            return (None, None);
        }

        let available = portfolio.margin_available.to_f64().unwrap_or(0.0);
        let used = portfolio.margin_used.to_f64().unwrap_or(0.0);
        let until = |threshold: f64| {
            let surplus = available - threshold * used;
            if surplus <= 0.0 {
                None
            } else {
                Some(surplus / burn_per_sec)
            }
        };
        (
            until(config.margin_call_threshold),
            until(config.liquidation_threshold),
        )
    }
}
