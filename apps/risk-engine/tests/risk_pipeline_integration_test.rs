//! Risk Pipeline Integration Tests
//!
//! End-to-end tests that wire the five engines together the way the
//! orchestration layer would: the limiter publishes limits, the sizer
//! consults them, the VaR and stress engines characterize the book, the
//! liquidation monitor protects it, and everything lands in one report.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::unreadable_literal)]

use std::sync::Arc;

use risk_engine::events::{BroadcastPublisher, NoOpTelemetry};
use risk_engine::models::SignalDirection;
use risk_engine::{
    LiquidationMonitor, MarginStatusLevel, MarketConditions, MarketRegime, PerformanceMetrics,
    Portfolio, Position, PositionSide, PositionSizer, PriceHistory, PriceSeries, RiskEngineConfig,
    RiskLimiter, RiskReportBuilder, SimulatedExecution, StressTester, TradingSignal, VarEngine,
    VarMethodology,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Alternating up/down series with roughly the requested daily volatility.
fn synthetic_series(symbol: &str, vol: f64, days: usize) -> PriceSeries {
    let mut closes = vec![Decimal::ONE_HUNDRED];
    let mut price = 100.0;
    for i in 0..days {
        let step = if i % 2 == 0 { vol } else { -vol };
        price *= 1.0 + step;
        closes.push(Decimal::from_f64_retain(price).expect("finite price"));
    }
    PriceSeries::from_closes(symbol, &closes)
}

fn sample_history() -> PriceHistory {
    let mut history = PriceHistory::new();
    history.insert(synthetic_series("BTC", 0.02, 120));
    history.insert(synthetic_series("ETH", 0.03, 120));
    history
}

fn sample_portfolio() -> Portfolio {
    let mut portfolio = Portfolio::new("pf-integration", dec!(20000));
    let mut btc = Position::new("BTC", PositionSide::Long, dec!(1), dec!(50000));
    btc.margin = dec!(10000);
    let mut eth = Position::new("ETH", PositionSide::Long, dec!(10), dec!(3000));
    eth.margin = dec!(6000);
    portfolio.positions.push(btc);
    portfolio.positions.push(eth);
    portfolio.recompute_totals();
    portfolio.margin_available = dec!(24000);
    portfolio
}

struct Engines {
    var: VarEngine,
    stress: StressTester,
    sizer: PositionSizer,
    monitor: LiquidationMonitor,
    limiter: RiskLimiter,
    publisher: Arc<BroadcastPublisher>,
}

fn make_engines() -> Engines {
    init_tracing();
    let config = RiskEngineConfig::default();
    config.validate().expect("default config is valid");
    let publisher = Arc::new(BroadcastPublisher::new(64));
    let telemetry = Arc::new(NoOpTelemetry);

    Engines {
        var: VarEngine::new(config.var, publisher.clone(), telemetry.clone())
            .expect("var engine"),
        stress: StressTester::new(config.stress, publisher.clone(), telemetry.clone())
            .expect("stress tester"),
        sizer: PositionSizer::new(config.sizing, publisher.clone(), telemetry.clone())
            .expect("position sizer"),
        monitor: LiquidationMonitor::new(
            config.liquidation,
            Arc::new(SimulatedExecution),
            publisher.clone(),
            telemetry.clone(),
        )
        .expect("liquidation monitor"),
        limiter: RiskLimiter::new(config.limits, publisher.clone(), telemetry)
            .expect("risk limiter"),
        publisher,
    }
}

#[tokio::test]
async fn test_var_feeds_the_report_with_events_observable() {
    let engines = make_engines();
    let mut events = engines.publisher.subscribe();
    let portfolio = sample_portfolio();
    let history = sample_history();

    let var = engines
        .var
        .estimate(&portfolio, &history, VarMethodology::Parametric, 0.95)
        .await
        .expect("var estimates");
    assert!(var.value > 0.0);
    assert!(var.cvar >= var.value);
    assert_eq!(var.component_var.len(), 2);
    // Every asset with ingested history gets a component contribution.
    for symbol in history.symbols() {
        assert!(var.component_var.contains_key(symbol));
    }

    let event = events.recv().await.expect("event delivered");
    assert_eq!(event.event_type(), "VAR_CALCULATED");

    let stress_results = engines
        .stress
        .run_historical(&portfolio)
        .await
        .expect("stress battery runs");
    assert_eq!(stress_results.len(), 5);

    let status = engines.monitor.check(&portfolio).await;
    let limits = engines.limiter.current_limits().await;
    let performance =
        PerformanceMetrics::from_daily_returns(&history.returns_for("BTC"));

    let report = RiskReportBuilder::new(portfolio.id.clone())
        .var(var)
        .performance(performance)
        .stress_results(stress_results)
        .margin_status(status)
        .limits((*limits).clone())
        .build();

    assert_eq!(report.portfolio_id, "pf-integration");
    assert!(report.var.is_some());
    assert!(!report.stress_results.is_empty());
    // The 2008-style scenarios breach the loss thresholds on this book.
    assert!(!report.alerts.is_empty());
}

#[tokio::test]
async fn test_sizer_respects_limits_published_by_the_limiter() {
    let engines = make_engines();
    let portfolio = sample_portfolio();
    let history = sample_history();

    // Crisis conditions shrink the published limits hard.
    engines
        .limiter
        .update_market_conditions(MarketConditions {
            volatility: 0.1,
            average_volatility: 0.02,
            correlation: 0.8,
            ..Default::default()
        })
        .await;
    let limits = engines.limiter.current_limits().await;
    assert_eq!(limits.regime, MarketRegime::Crisis);
    assert!(limits.position_limit < 100_000.0);

    let signal = TradingSignal {
        symbol: "SOL".to_string(),
        direction: SignalDirection::Long,
        confidence: 0.9,
        expected_return: 0.08,
        stop_loss: None,
        time_horizon_hours: 24.0,
    };
    let sizing = engines
        .sizer
        .size(&signal, &portfolio, &history, &[], &limits)
        .await
        .expect("sizing succeeds");

    assert!(sizing.limit_adjusted_size >= 0.0);
    assert!(sizing.limit_adjusted_size <= limits.position_limit);
    assert!(sizing.limit_adjusted_size <= sizing.recommended_size + 1e-9);

    // Whatever the sizer recommends, the admission gate must also accept
    // at most the published limits.
    if sizing.limit_adjusted_size > 0.0 {
        let admitted = engines
            .limiter
            .can_take_position(&signal.symbol, sizing.limit_adjusted_size, &portfolio)
            .await;
        let oversized = engines
            .limiter
            .can_take_position(&signal.symbol, limits.order_size_limit * 2.0, &portfolio)
            .await;
        assert!(!oversized);
        // The gate may still reject on concentration; it must never admit
        // a size the sizer already clamped above.
        let _ = admitted;
    }
}

#[tokio::test]
async fn test_margin_breach_flows_into_liquidation() {
    let engines = make_engines();
    let history = sample_history();

    // Collapse prices so the book is deep underwater.
    let mut portfolio = sample_portfolio();
    if let Some(p) = portfolio.position_mut("BTC") {
        p.update_price(dec!(30000));
    }
    if let Some(p) = portfolio.position_mut("ETH") {
        p.update_price(dec!(1800));
    }
    portfolio.recompute_totals();
    portfolio.margin_available = dec!(3000); // level ~0.19

    let status = engines.monitor.check(&portfolio).await;
    assert_eq!(status.status, MarginStatusLevel::Liquidation);

    let outcome = engines
        .monitor
        .liquidate(&mut portfolio, &history)
        .await
        .expect("liquidation runs");
    assert!(!outcome.closed_symbols.is_empty());
    assert!(outcome.final_margin_level >= 0.5 || portfolio.positions.is_empty());

    // Value invariant holds after forced exits.
    let expected: Decimal = portfolio.cash
        + portfolio
            .positions
            .iter()
            .map(Position::market_value)
            .sum::<Decimal>();
    assert_eq!(portfolio.total_value, expected);
}

#[tokio::test]
async fn test_update_config_forces_fresh_var() {
    let engines = make_engines();
    let portfolio = sample_portfolio();
    let history = sample_history();

    let first = engines
        .var
        .estimate(&portfolio, &history, VarMethodology::Parametric, 0.95)
        .await
        .expect("first estimate");
    let cached = engines
        .var
        .estimate(&portfolio, &history, VarMethodology::Parametric, 0.95)
        .await
        .expect("cached estimate");
    assert_eq!(first.calculated_at, cached.calculated_at);

    engines
        .var
        .update_config(RiskEngineConfig::default().var)
        .await
        .expect("config update");
    let fresh = engines
        .var
        .estimate(&portfolio, &history, VarMethodology::Parametric, 0.95)
        .await
        .expect("fresh estimate");
    assert_ne!(first.calculated_at, fresh.calculated_at);
}

#[tokio::test]
async fn test_emergency_controls_round_trip() {
    let engines = make_engines();
    let portfolio = Portfolio::new("pf-empty", dec!(100000));

    assert!(
        !engines
            .limiter
            .can_take_position("BTC", 30_000.0, &portfolio)
            .await,
        "first position is fully concentrated and must be rejected"
    );

    engines.limiter.emergency_reduce_limits(0.1).await;
    let reduced = engines.limiter.current_limits().await;
    assert!(reduced.order_size_limit <= 5_000.0);

    engines.limiter.reset_to_base_limits().await;
    let restored = engines.limiter.current_limits().await;
    assert!((restored.position_limit - 100_000.0).abs() < 1e-9);
    assert!((restored.adjustment_factor - 1.0).abs() < 1e-12);
}
