// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Real-time portfolio risk engine.
//!
//! Five cooperating engines for leveraged, multi-asset trading:
//!
//! - **VaR engine** ([`var`]): Value-at-Risk and CVaR via parametric,
//!   historical-simulation, and Monte Carlo methodologies, with per-asset
//!   component and marginal decomposition.
//! - **Stress tester** ([`stress`]): historical, custom, adversarial, and
//!   Monte Carlo shock scenarios applied to the live book.
//! - **Position sizer** ([`sizing`]): Kelly, volatility-targeting, risk
//!   parity, drawdown-based, and blended sizing bounded by published limits.
//! - **Liquidation monitor** ([`liquidation`]): margin-health state machine
//!   with margin calls, grace periods, and ordered forced exits.
//! - **Dynamic risk limiter** ([`limits`]): regime- and volatility-driven
//!   limit recomputation with an atomic pre-trade admission gate.
//!
//! The crate owns no transport or persistence: portfolios, price history,
//! and trading signals come from collaborators; events and telemetry go out
//! through injected ports ([`events`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Configuration records for every engine.
pub mod config;

/// Error taxonomy shared across the engines.
pub mod error;

/// Domain events, publisher port, and telemetry sink.
pub mod events;

/// Dynamic risk limits and the pre-trade admission gate.
pub mod limits;

/// Margin monitoring and liquidation.
pub mod liquidation;

/// Statistics and correlation-matrix utilities.
pub mod math;

/// Plain-data domain model: portfolios, positions, price series, signals.
pub mod models;

/// The aggregate risk report.
pub mod report;

/// Position sizing.
pub mod sizing;

/// Stress testing.
pub mod stress;

/// Value-at-Risk estimation.
pub mod var;

pub use config::{
    LimitsConfig, LiquidationConfig, RiskEngineConfig, SizingConfig, StressConfig, VarConfig,
};
pub use error::{RiskError, RiskResult};
pub use events::{
    BroadcastPublisher, EventPublisher, NoOpEventPublisher, NoOpTelemetry, RiskEvent,
    TelemetryKind, TelemetryRecord, TelemetrySink,
};
pub use limits::{RiskLimiter, RiskLimits, RiskMetrics};
pub use liquidation::{
    DeleverageStrategy, ExecutionPort, LiquidationMonitor, LiquidationOutcome, MarginStatus,
    MarginStatusLevel, SimulatedExecution,
};
pub use models::{
    Candle, MarketConditions, MarketRegime, Portfolio, Position, PositionSide, PriceHistory,
    PriceSeries, SignalDirection, TradeOutcome, TradingSignal,
};
pub use report::{PerformanceMetrics, RiskReport, RiskReportBuilder};
pub use sizing::{PositionSizer, SizingMethodology, SizingResult};
pub use stress::{ShockDistribution, StressScenario, StressTestResult, StressTester};
pub use var::{VaRResult, VarEngine, VarMethodology};
