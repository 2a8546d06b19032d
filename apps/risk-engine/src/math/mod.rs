//! Shared numerical utilities: summary statistics, the inverse normal CDF,
//! and the correlation/covariance matrix used for correlated sampling.

mod matrix;
mod stats;

pub use matrix::CorrelationMatrix;
pub use stats::{
    max_drawdown, mean, normal_inv_cdf, normal_pdf, percentile_index, std_dev,
};
