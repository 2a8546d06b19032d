//! Error taxonomy for the risk engine.
//!
//! Three failure classes cross the public API:
//!
//! - [`RiskError::Configuration`]: an unknown methodology/strategy name or an
//!   invalid config record. Fatal to the specific call, never to the process.
//! - [`RiskError::Calculation`]: degenerate inputs (zero volatility,
//!   non-decomposable correlation matrix, missing history or position). The
//!   triggering calculation fails; callers treat failed component or marginal
//!   contributions as omitted, not zero.
//! - [`RiskError::LiquidationFailed`]: a concurrent liquidation attempt or an
//!   execution-layer rejection mid-sequence. Portfolio state reflects whatever
//!   positions were closed before the failure.
//!
//! Every variant carries enough context to name the methodology, scenario, or
//! position that triggered it.

use thiserror::Error;

/// Errors surfaced by the risk engine.
#[derive(Debug, Clone, Error)]
pub enum RiskError {
    /// Invalid or unknown configuration (methodology name, threshold ordering).
    #[error("configuration error: {message}")]
    Configuration {
        /// What was wrong with the configuration.
        message: String,
    },

    /// A calculation failed on degenerate inputs.
    #[error("calculation error in {context}: {message}")]
    Calculation {
        /// The methodology, scenario, or position that triggered the failure.
        context: String,
        /// What went wrong.
        message: String,
    },

    /// A liquidation attempt failed; partial progress is preserved.
    #[error("liquidation failed for portfolio {portfolio_id}: {reason}")]
    LiquidationFailed {
        /// Portfolio the attempt targeted.
        portfolio_id: String,
        /// Why the attempt failed.
        reason: String,
    },
}

impl RiskError {
    /// Configuration error from a message.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Calculation error with the triggering context.
    #[must_use]
    pub fn calculation(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Calculation {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Liquidation failure for a portfolio.
    #[must_use]
    pub fn liquidation_failed(portfolio_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LiquidationFailed {
            portfolio_id: portfolio_id.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type RiskResult<T> = Result<T, RiskError>;
