//! The dynamic risk limiter.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::LimitsConfig;
use crate::error::RiskResult;
use crate::events::{
    EventPublisher, RiskEvent, TelemetryKind, TelemetryRecord, TelemetrySink,
};
use crate::models::{MarketConditions, MarketRegime, Portfolio};

use super::RiskLimits;

/// Portfolio-level metrics checked against the published limits.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// Aggregate notional exposure.
    pub exposure: f64,
    /// Current leverage.
    pub leverage: f64,
    /// Current drawdown (fraction).
    pub drawdown: f64,
    /// Largest single-position notional.
    pub largest_position: f64,
}

/// State guarded by the single update lock: metric updates are drained in
/// strict arrival order, so transitions are linearizable even when updates
/// arrive from several concurrent sources.
#[derive(Debug, Default)]
struct LimiterState {
    conditions: MarketConditions,
    metrics: RiskMetrics,
}

/// Regime multipliers applied to base limits.
const fn regime_multiplier(regime: MarketRegime) -> f64 {
    match regime {
        MarketRegime::Normal => 1.0,
        MarketRegime::Stressed => 0.7,
        MarketRegime::Crisis => 0.3,
    }
}

/// Dynamic risk limiter.
///
/// Publishes a whole [`RiskLimits`] record atomically; the admission check
/// and the engines read one `Arc` snapshot that cannot change mid-check.
pub struct RiskLimiter {
    config: RwLock<LimitsConfig>,
    limits: RwLock<Arc<RiskLimits>>,
    state: Mutex<LimiterState>,
    publisher: Arc<dyn EventPublisher>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl RiskLimiter {
    /// Create a limiter publishing the base limits.
    pub fn new(
        config: LimitsConfig,
        publisher: Arc<dyn EventPublisher>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> RiskResult<Self> {
        config.validate()?;
        let limits = Arc::new(RiskLimits::from_config(&config, 1.0, MarketRegime::Normal));
        Ok(Self {
            config: RwLock::new(config),
            limits: RwLock::new(limits),
            state: Mutex::new(LimiterState::default()),
            publisher,
            telemetry,
        })
    }

    /// Replace the configuration and republish base-derived limits.
    pub async fn update_config(&self, config: LimitsConfig) -> RiskResult<()> {
        config.validate()?;
        *self.config.write().await = config;
        self.refresh_limits().await;
        Ok(())
    }

    /// The currently published limits snapshot.
    pub async fn current_limits(&self) -> Arc<RiskLimits> {
        self.limits.read().await.clone()
    }

    /// Ingest fresh market conditions and republish limits when the
    /// combined adjustment moves by more than the republish threshold.
    pub async fn update_market_conditions(&self, mut conditions: MarketConditions) {
        let config = self.config.read().await.clone();
        // Single update lock: concurrent updates apply strictly in order.
        let mut state = self.state.lock().await;

        let regime = Self::detect_regime(&conditions, &config);
        conditions.regime = regime;
        let previous_regime = state.conditions.regime;
        state.conditions = conditions.clone();
        drop(state);

        if regime != previous_regime {
            info!(from = %previous_regime, to = %regime, "market regime changed");
            self.publisher
                .publish(RiskEvent::RegimeChanged {
                    from: previous_regime,
                    to: regime,
                    occurred_at: chrono::Utc::now(),
                })
                .await;
        }

        let factor = Self::adjustment_factor(&conditions, regime, &config);
        self.publish_if_changed(&config, factor, regime).await;
    }

    /// Recompute limits from the stored conditions. Runs on the periodic
    /// refresh timer and after configuration changes.
    pub async fn refresh_limits(&self) {
        let config = self.config.read().await.clone();
        let conditions = self.state.lock().await.conditions.clone();
        let regime = Self::detect_regime(&conditions, &config);
        let factor = Self::adjustment_factor(&conditions, regime, &config);
        self.publish_if_changed(&config, factor, regime).await;
    }

    /// Pre-trade admission gate.
    ///
    /// Evaluates the order against one published snapshot: order size,
    /// resulting aggregate position, aggregate exposure, and concentration.
    pub async fn can_take_position(
        &self,
        symbol: &str,
        size: f64,
        portfolio: &Portfolio,
    ) -> bool {
        if size <= 0.0 {
            return false;
        }
        let limits = self.current_limits().await;

        if size > limits.order_size_limit {
            debug!(symbol, size, limit = limits.order_size_limit, "order size rejected");
            return false;
        }

        let existing = portfolio
            .position(symbol)
            .map(|p| p.notional().to_f64().unwrap_or(0.0))
            .unwrap_or(0.0);
        if existing + size > limits.position_limit {
            debug!(symbol, "aggregate position limit rejected");
            return false;
        }

        let exposure = portfolio.total_exposure().to_f64().unwrap_or(0.0);
        if exposure + size > limits.exposure_limit {
            debug!(symbol, "aggregate exposure limit rejected");
            return false;
        }

        let new_exposure = exposure + size;
        if new_exposure > 0.0 && (existing + size) / new_exposure > limits.concentration_limit {
            debug!(symbol, "concentration limit rejected");
            return false;
        }

        true
    }

    /// Scale the published limits down by `factor` immediately.
    pub async fn emergency_reduce_limits(&self, factor: f64) {
        let factor = factor.clamp(0.01, 1.0);
        let reduced = {
            let mut guard = self.limits.write().await;
            let current = guard.as_ref();
            let reduced = Arc::new(RiskLimits {
                position_limit: current.position_limit * factor,
                exposure_limit: current.exposure_limit * factor,
                leverage_limit: current.leverage_limit * factor,
                drawdown_limit: current.drawdown_limit * factor,
                order_size_limit: current.order_size_limit * factor,
                concentration_limit: current.concentration_limit * factor,
                adjustment_factor: current.adjustment_factor * factor,
                regime: current.regime,
                updated_at: chrono::Utc::now(),
            });
            *guard = reduced.clone();
            reduced
        };
        warn!(factor, "emergency limit reduction applied");
        self.publisher
            .publish(RiskEvent::EmergencyReduction {
                factor,
                occurred_at: chrono::Utc::now(),
            })
            .await;
        self.publisher
            .publish(RiskEvent::LimitsUpdated {
                adjustment_factor: reduced.adjustment_factor,
                regime: reduced.regime,
                occurred_at: chrono::Utc::now(),
            })
            .await;
    }

    /// Restore the configured base limits exactly. Idempotent while market
    /// conditions do not change.
    pub async fn reset_to_base_limits(&self) {
        let config = self.config.read().await.clone();
        let base = Arc::new(RiskLimits::from_config(&config, 1.0, MarketRegime::Normal));
        *self.limits.write().await = base.clone();
        self.publisher
            .publish(RiskEvent::LimitsUpdated {
                adjustment_factor: 1.0,
                regime: base.regime,
                occurred_at: chrono::Utc::now(),
            })
            .await;
    }

    /// Drive the limiter: drains metric updates in FIFO order, debounces
    /// violation checks, refreshes limits on a timer, and shuts down
    /// deterministically, cancelling any pending debounce window.
    pub async fn run(
        &self,
        mut metrics_rx: mpsc::Receiver<RiskMetrics>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let (debounce_window, refresh_interval) = {
            let config = self.config.read().await;
            (
                Duration::from_millis(config.violation_debounce_ms),
                Duration::from_millis(config.refresh_interval_ms),
            )
        };
        let mut refresh = tokio::time::interval(refresh_interval);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        refresh.reset();

        let debounce = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(debounce);
        let mut check_pending = false;

        loop {
            tokio::select! {
                update = metrics_rx.recv() => {
                    match update {
                        Some(metrics) => {
                            self.state.lock().await.metrics = metrics;
                            // A burst collapses into one check; the window
                            // restarts on every new update.
                            debounce
                                .as_mut()
                                .reset(tokio::time::Instant::now() + debounce_window);
                            check_pending = true;
                        }
                        None => break,
                    }
                }
                () = &mut debounce, if check_pending => {
                    check_pending = false;
                    self.check_violations().await;
                }
                _ = refresh.tick() => {
                    self.refresh_limits().await;
                }
                _ = shutdown.recv() => {
                    // Pending debounce windows are cancelled, not flushed:
                    // scheduled-but-unstarted work does not run at shutdown.
                    break;
                }
            }
        }
        self.telemetry.flush().await;
    }

    /// Compare the latest metrics against the published limits, emitting
    /// one violation event per breached limit.
    pub async fn check_violations(&self) {
        let metrics = self.state.lock().await.metrics;
        let limits = self.current_limits().await;
        let checks = [
            ("exposure", metrics.exposure, limits.exposure_limit),
            ("leverage", metrics.leverage, limits.leverage_limit),
            ("drawdown", metrics.drawdown, limits.drawdown_limit),
            ("position", metrics.largest_position, limits.position_limit),
        ];
        for (name, observed, allowed) in checks {
            if observed > allowed {
                warn!(limit = name, observed, allowed, "risk limit violation");
                self.publisher
                    .publish(RiskEvent::LimitViolation {
                        limit: name.to_string(),
                        observed,
                        allowed,
                        occurred_at: chrono::Utc::now(),
                    })
                    .await;
                self.telemetry
                    .record(TelemetryRecord::new(
                        TelemetryKind::RiskAlert,
                        0.0,
                        format!("{name} limit violated: {observed:.4} > {allowed:.4}"),
                    ))
                    .await;
            }
        }
    }

    /// Regime from volatility, spread, and volume thresholds.
    fn detect_regime(conditions: &MarketConditions, config: &LimitsConfig) -> MarketRegime {
        let mut regime = if conditions.volatility >= config.crisis_volatility {
            MarketRegime::Crisis
        } else if conditions.volatility >= config.stressed_volatility {
            MarketRegime::Stressed
        } else {
            MarketRegime::Normal
        };

        // Wide spreads or a volume collapse degrade the regime one notch.
        let volume_collapsed = conditions.average_volume > 0.0
            && conditions.volume < conditions.average_volume * 0.5;
        if (conditions.spread >= config.stressed_spread || volume_collapsed)
            && regime == MarketRegime::Normal
        {
            regime = MarketRegime::Stressed;
        }
        regime
    }

    /// Combined adjustment: volatility multiplier (inverse, clamped) times
    /// the regime multiplier times a correlation shrink of up to 30%.
    fn adjustment_factor(
        conditions: &MarketConditions,
        regime: MarketRegime,
        config: &LimitsConfig,
    ) -> f64 {
        let vol_multiplier = if conditions.volatility > 0.0 && conditions.average_volatility > 0.0
        {
            (conditions.average_volatility / conditions.volatility)
                .clamp(config.volatility_multiplier_floor, config.volatility_multiplier_cap)
        } else {
            1.0
        };
        let correlation_adjustment = 1.0 - 0.3 * conditions.correlation.clamp(0.0, 1.0);
        vol_multiplier * regime_multiplier(regime) * correlation_adjustment
    }

    async fn publish_if_changed(
        &self,
        config: &LimitsConfig,
        factor: f64,
        regime: MarketRegime,
    ) {
        let changed = {
            let current = self.limits.read().await;
            let reference = current.adjustment_factor.abs().max(f64::EPSILON);
            (factor - current.adjustment_factor).abs() / reference > config.republish_threshold
                || regime != current.regime
        };
        if !changed {
            return;
        }

        let next = Arc::new(RiskLimits::from_config(config, factor, regime));
        *self.limits.write().await = next;
        debug!(factor, %regime, "risk limits republished");
        self.publisher
            .publish(RiskEvent::LimitsUpdated {
                adjustment_factor: factor,
                regime,
                occurred_at: chrono::Utc::now(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{NoOpTelemetry, RiskEvent};
    use crate::models::{Position, PositionSide};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    #[derive(Debug, Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<RiskEvent>>,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, event: RiskEvent) {
            self.events.lock().await.push(event);
        }
    }

    impl RecordingPublisher {
        async fn tags(&self) -> Vec<&'static str> {
            self.events
                .lock()
                .await
                .iter()
                .map(RiskEvent::event_type)
                .collect()
        }
    }

    fn limiter_with(publisher: Arc<RecordingPublisher>) -> RiskLimiter {
        RiskLimiter::new(LimitsConfig::default(), publisher, Arc::new(NoOpTelemetry))
            .expect("valid config")
    }

    fn stressed_conditions() -> MarketConditions {
        MarketConditions {
            volatility: 0.05,
            average_volatility: 0.02,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_base_limits_published_at_start() {
        let limiter = limiter_with(Arc::new(RecordingPublisher::default()));
        let limits = limiter.current_limits().await;
        assert!((limits.position_limit - 100_000.0).abs() < 1e-9);
        assert!((limits.adjustment_factor - 1.0).abs() < 1e-12);
        assert_eq!(limits.regime, MarketRegime::Normal);
    }

    #[tokio::test]
    async fn test_stressed_conditions_shrink_limits() {
        let publisher = Arc::new(RecordingPublisher::default());
        let limiter = limiter_with(publisher.clone());
        limiter.update_market_conditions(stressed_conditions()).await;

        let limits = limiter.current_limits().await;
        assert_eq!(limits.regime, MarketRegime::Stressed);
        // vol multiplier 0.02/0.05 = 0.4, regime 0.7, correlation 0.3 -> 0.91.
        let expected = 0.4 * 0.7 * (1.0 - 0.3 * 0.3);
        assert!((limits.adjustment_factor - expected).abs() < 1e-9);
        assert!(limits.position_limit < 100_000.0);

        let tags = publisher.tags().await;
        assert!(tags.contains(&"REGIME_CHANGED"));
        assert!(tags.contains(&"LIMITS_UPDATED"));
    }

    #[tokio::test]
    async fn test_crisis_regime_from_volatility() {
        let conditions = MarketConditions {
            volatility: 0.1,
            ..Default::default()
        };
        let regime = RiskLimiter::detect_regime(&conditions, &LimitsConfig::default());
        assert_eq!(regime, MarketRegime::Crisis);
    }

    #[tokio::test]
    async fn test_wide_spread_degrades_normal_to_stressed() {
        let conditions = MarketConditions {
            volatility: 0.01,
            spread: 0.01,
            ..Default::default()
        };
        let regime = RiskLimiter::detect_regime(&conditions, &LimitsConfig::default());
        assert_eq!(regime, MarketRegime::Stressed);
    }

    #[tokio::test]
    async fn test_small_change_does_not_republish() {
        let publisher = Arc::new(RecordingPublisher::default());
        let limiter = limiter_with(publisher.clone());
        // 2% shift in the factor, below the 5% republish threshold.
        let conditions = MarketConditions {
            volatility: 0.0204,
            average_volatility: 0.02,
            correlation: 0.0,
            ..Default::default()
        };
        limiter.update_market_conditions(conditions).await;
        let tags = publisher.tags().await;
        assert!(!tags.contains(&"LIMITS_UPDATED"));
        let limits = limiter.current_limits().await;
        assert!((limits.adjustment_factor - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_can_take_position_enforces_every_gate() {
        let limiter = limiter_with(Arc::new(RecordingPublisher::default()));
        let mut portfolio = Portfolio::new("pf-gate", dec!(500000));
        portfolio
            .positions
            .push(Position::new("BTC", PositionSide::Long, dec!(1), dec!(90000)));
        portfolio.recompute_totals();

        // Order size above the 50k order limit.
        assert!(!limiter.can_take_position("ETH", 60_000.0, &portfolio).await);
        // Aggregate BTC position would exceed the 100k position limit.
        assert!(!limiter.can_take_position("BTC", 20_000.0, &portfolio).await);
        // Concentration: 40k ETH against 90k BTC stays under 40%.
        assert!(limiter.can_take_position("ETH", 40_000.0, &portfolio).await);
        // Non-positive sizes are never admitted.
        assert!(!limiter.can_take_position("ETH", 0.0, &portfolio).await);
    }

    #[tokio::test]
    async fn test_concentration_gate() {
        let limiter = limiter_with(Arc::new(RecordingPublisher::default()));
        let portfolio = Portfolio::new("pf-conc", dec!(100000));
        // First position would be 100% of exposure, above the 40% cap.
        assert!(!limiter.can_take_position("BTC", 10_000.0, &portfolio).await);
    }

    #[tokio::test]
    async fn test_emergency_reduce_then_reset_restores_base() {
        let publisher = Arc::new(RecordingPublisher::default());
        let limiter = limiter_with(publisher.clone());

        limiter.emergency_reduce_limits(0.5).await;
        let reduced = limiter.current_limits().await;
        assert!((reduced.position_limit - 50_000.0).abs() < 1e-9);

        limiter.reset_to_base_limits().await;
        let restored = limiter.current_limits().await;
        assert!((restored.position_limit - 100_000.0).abs() < 1e-9);
        assert!((restored.adjustment_factor - 1.0).abs() < 1e-12);

        // Reset is idempotent while conditions are unchanged.
        limiter.reset_to_base_limits().await;
        let again = limiter.current_limits().await;
        assert!((again.position_limit - restored.position_limit).abs() < 1e-12);

        let tags = publisher.tags().await;
        assert!(tags.contains(&"EMERGENCY_REDUCTION"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_violation_checks_are_debounced() {
        let publisher = Arc::new(RecordingPublisher::default());
        let limiter = Arc::new(limiter_with(publisher.clone()));
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let runner = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.run(rx, shutdown_rx).await })
        };

        // A burst of violating updates inside the window collapses into a
        // single check.
        let violating = RiskMetrics {
            exposure: 600_000.0,
            ..Default::default()
        };
        for _ in 0..5 {
            tx.send(violating).await.expect("send metrics");
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        tokio::time::advance(Duration::from_millis(1500)).await;
        tokio::task::yield_now().await;

        let violations = publisher
            .tags()
            .await
            .iter()
            .filter(|t| **t == "LIMIT_VIOLATION")
            .count();
        assert_eq!(violations, 1);

        shutdown_tx.send(()).expect("shutdown");
        runner.await.expect("runner exits");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_debounce() {
        let publisher = Arc::new(RecordingPublisher::default());
        let limiter = Arc::new(limiter_with(publisher.clone()));
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let runner = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.run(rx, shutdown_rx).await })
        };

        tx.send(RiskMetrics {
            leverage: 50.0,
            ..Default::default()
        })
        .await
        .expect("send metrics");
        tokio::task::yield_now().await;

        // Shut down before the debounce window elapses.
        shutdown_tx.send(()).expect("shutdown");
        runner.await.expect("runner exits");

        let tags = publisher.tags().await;
        assert!(!tags.contains(&"LIMIT_VIOLATION"));
    }
}
