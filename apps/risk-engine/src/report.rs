//! On-demand risk report, the primary read surface for dashboards and the
//! execution layer's risk gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::limits::RiskLimits;
use crate::liquidation::{MarginStatus, MarginStatusLevel};
use crate::math::{max_drawdown, mean, std_dev};
use crate::stress::StressTestResult;
use crate::var::VaRResult;

/// Trading days per year used for annualization.
const TRADING_DAYS: f64 = 365.0;

/// Realized performance summary derived from a daily return series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Annualized Sharpe ratio (zero risk-free rate).
    pub sharpe: f64,
    /// Annualized Sortino ratio (downside deviation denominator).
    pub sortino: f64,
    /// Maximum peak-to-trough drawdown of the equity curve.
    pub max_drawdown: f64,
    /// Annualized volatility.
    pub annualized_volatility: f64,
}

impl PerformanceMetrics {
    /// Compute metrics from daily returns. Degenerate series produce zeros
    /// rather than NaNs.
    #[must_use]
    pub fn from_daily_returns(returns: &[f64]) -> Self {
        let mu = mean(returns).unwrap_or(0.0);
        let sigma = std_dev(returns).unwrap_or(0.0);
        let sharpe = if sigma > f64::EPSILON {
            mu / sigma * TRADING_DAYS.sqrt()
        } else {
            0.0
        };

        let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        let downside_dev = if downside.is_empty() {
            0.0
        } else {
            (downside.iter().map(|r| r * r).sum::<f64>() / downside.len() as f64).sqrt()
        };
        let sortino = if downside_dev > f64::EPSILON {
            mu / downside_dev * TRADING_DAYS.sqrt()
        } else {
            0.0
        };

        let mut equity = vec![1.0];
        for r in returns {
            let last = *equity.last().unwrap_or(&1.0);
            equity.push(last * (1.0 + r));
        }

        Self {
            sharpe,
            sortino,
            max_drawdown: max_drawdown(&equity),
            annualized_volatility: sigma * TRADING_DAYS.sqrt(),
        }
    }
}

/// Alert severity, ordered least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    /// Informational.
    Info,
    /// Needs attention.
    Warning,
    /// Needs action now.
    Critical,
}

/// One ranked alert in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAlert {
    /// Severity used for ranking.
    pub severity: AlertSeverity,
    /// What happened.
    pub message: String,
}

/// Aggregate risk report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    /// Portfolio the report covers.
    pub portfolio_id: String,
    /// Latest VaR estimate, if one was computed.
    pub var: Option<VaRResult>,
    /// Realized performance metrics, if return history was supplied.
    pub performance: Option<PerformanceMetrics>,
    /// Stress-test battery results.
    pub stress_results: Vec<StressTestResult>,
    /// Current margin status.
    pub margin_status: Option<MarginStatus>,
    /// Currently published limits.
    pub limits: Option<RiskLimits>,
    /// Alerts, most severe first.
    pub alerts: Vec<RiskAlert>,
    /// Operator recommendations, matching the alert ranking.
    pub recommendations: Vec<String>,
    /// When the report was assembled.
    pub generated_at: DateTime<Utc>,
}

/// Assembles a [`RiskReport`] from whatever engine outputs are available.
#[derive(Debug, Default)]
pub struct RiskReportBuilder {
    portfolio_id: String,
    var: Option<VaRResult>,
    performance: Option<PerformanceMetrics>,
    stress_results: Vec<StressTestResult>,
    margin_status: Option<MarginStatus>,
    limits: Option<RiskLimits>,
}

impl RiskReportBuilder {
    /// Start a report for one portfolio.
    #[must_use]
    pub fn new(portfolio_id: impl Into<String>) -> Self {
        Self {
            portfolio_id: portfolio_id.into(),
            ..Default::default()
        }
    }

    /// Attach a VaR estimate.
    #[must_use]
    pub fn var(mut self, var: VaRResult) -> Self {
        self.var = Some(var);
        self
    }

    /// Attach performance metrics.
    #[must_use]
    pub fn performance(mut self, performance: PerformanceMetrics) -> Self {
        self.performance = Some(performance);
        self
    }

    /// Attach stress battery results.
    #[must_use]
    pub fn stress_results(mut self, results: Vec<StressTestResult>) -> Self {
        self.stress_results = results;
        self
    }

    /// Attach the margin status.
    #[must_use]
    pub fn margin_status(mut self, status: MarginStatus) -> Self {
        self.margin_status = Some(status);
        self
    }

    /// Attach the published limits.
    #[must_use]
    pub fn limits(mut self, limits: RiskLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Derive ranked alerts and recommendations, then assemble the report.
    #[must_use]
    pub fn build(self) -> RiskReport {
        let mut alerts = Vec::new();
        let mut recommendations = Vec::new();

        if let Some(status) = &self.margin_status {
            match status.status {
                MarginStatusLevel::Liquidation => {
                    alerts.push(RiskAlert {
                        severity: AlertSeverity::Critical,
                        message: format!(
                            "margin level {:.4} below liquidation threshold",
                            status.margin_level
                        ),
                    });
                    recommendations
                        .push("liquidation imminent: deposit margin or close positions now".into());
                }
                MarginStatusLevel::MarginCall => {
                    alerts.push(RiskAlert {
                        severity: AlertSeverity::Critical,
                        message: format!(
                            "margin call active at margin level {:.4}",
                            status.margin_level
                        ),
                    });
                    recommendations
                        .push("resolve the margin call before its deadline".into());
                }
                MarginStatusLevel::Warning => {
                    alerts.push(RiskAlert {
                        severity: AlertSeverity::Warning,
                        message: format!(
                            "margin level {:.4} inside the warning band",
                            status.margin_level
                        ),
                    });
                    recommendations.push("reduce leverage before margin deteriorates".into());
                }
                MarginStatusLevel::Safe => {}
            }
        }

        for result in &self.stress_results {
            if result.liquidation_risk {
                alerts.push(RiskAlert {
                    severity: AlertSeverity::Critical,
                    message: format!(
                        "scenario '{}' would lose {:.1}% of the portfolio",
                        result.scenario,
                        result.percentage_loss * 100.0
                    ),
                });
                recommendations.push(format!(
                    "hedge or trim exposure vulnerable to '{}'",
                    result.scenario
                ));
            } else if result.margin_call_risk {
                alerts.push(RiskAlert {
                    severity: AlertSeverity::Warning,
                    message: format!(
                        "scenario '{}' would trigger a margin call",
                        result.scenario
                    ),
                });
            }
        }

        if let Some(var) = &self.var {
            if var.percentage > 0.1 {
                alerts.push(RiskAlert {
                    severity: AlertSeverity::Warning,
                    message: format!(
                        "{} VaR at {:.1}% of portfolio value",
                        var.methodology,
                        var.percentage * 100.0
                    ),
                });
                recommendations.push("tail risk elevated, consider reducing position sizes".into());
            } else {
                alerts.push(RiskAlert {
                    severity: AlertSeverity::Info,
                    message: format!(
                        "{} VaR at {:.1}% of portfolio value",
                        var.methodology,
                        var.percentage * 100.0
                    ),
                });
            }
        }

        alerts.sort_by(|a, b| b.severity.cmp(&a.severity));

        RiskReport {
            portfolio_id: self.portfolio_id,
            var: self.var,
            performance: self.performance,
            stress_results: self.stress_results,
            margin_status: self.margin_status,
            limits: self.limits,
            alerts,
            recommendations,
            generated_at: Utc::now(),
        }
    }
}
