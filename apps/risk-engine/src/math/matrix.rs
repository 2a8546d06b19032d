//! Correlation/covariance matrices and Cholesky factorization for correlated
//! sampling.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RiskError, RiskResult};

use super::stats::{mean, std_dev};

/// Tolerance below which a Cholesky pivot is treated as numerically zero.
const PSD_TOL: f64 = 1e-10;

/// Square, symmetric correlation matrix over an ordered asset list.
///
/// Unit diagonal, off-diagonal entries clamped into [−1, 1]. Must be positive
/// semi-definite for [`CorrelationMatrix::cholesky`] to succeed; violated
/// inputs fail fast with a calculation error rather than producing NaNs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    /// Asset order defining row/column indices.
    pub symbols: Vec<String>,
    /// Row-major matrix entries.
    pub data: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    /// Identity correlation over the given symbols.
    #[must_use]
    pub fn identity(symbols: Vec<String>) -> Self {
        let n = symbols.len();
        let data = (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect();
        Self { symbols, data }
    }

    /// Build a pairwise Pearson correlation matrix from per-symbol return
    /// series.
    ///
    /// Series are aligned on their trailing overlap. A degenerate pair
    /// (fewer than two overlapping points, or zero variance) degrades to
    /// zero correlation with a logged warning so the protective path stays
    /// live.
    #[must_use]
    pub fn from_returns(symbols: &[String], returns: &HashMap<String, Vec<f64>>) -> Self {
        let n = symbols.len();
        let mut data = vec![vec![0.0; n]; n];
        for i in 0..n {
            data[i][i] = 1.0;
            for j in (i + 1)..n {
                let a = returns.get(&symbols[i]).map(Vec::as_slice).unwrap_or(&[]);
                let b = returns.get(&symbols[j]).map(Vec::as_slice).unwrap_or(&[]);
                let rho = match pearson(a, b) {
                    Some(rho) => rho.clamp(-1.0, 1.0),
                    None => {
                        warn!(
                            a = %symbols[i],
                            b = %symbols[j],
                            "degenerate return series, defaulting correlation to 0"
                        );
                        0.0
                    }
                };
                data[i][j] = rho;
                data[j][i] = rho;
            }
        }
        Self {
            symbols: symbols.to_vec(),
            data,
        }
    }

    /// Matrix dimension.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the matrix is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Average off-diagonal correlation, 0 for a single asset.
    #[must_use]
    pub fn average_correlation(&self) -> f64 {
        let n = self.len();
        if n < 2 {
            return 0.0;
        }
        let mut sum = 0.0;
        let mut count = 0usize;
        for i in 0..n {
            for j in (i + 1)..n {
                sum += self.data[i][j];
                count += 1;
            }
        }
        sum / count as f64
    }

    /// Covariance matrix from this correlation and per-asset volatilities:
    /// `Σ_ij = ρ_ij · σ_i · σ_j`.
    #[must_use]
    pub fn covariance(&self, vols: &[f64]) -> Vec<Vec<f64>> {
        let n = self.len().min(vols.len());
        (0..n)
            .map(|i| (0..n).map(|j| self.data[i][j] * vols[i] * vols[j]).collect())
            .collect()
    }

    /// Lower-triangular Cholesky factor.
    ///
    /// # Errors
    ///
    /// `RiskError::Calculation` when the matrix is not positive
    /// semi-definite, naming the offending pivot.
    pub fn cholesky(&self) -> RiskResult<Vec<Vec<f64>>> {
        let n = self.len();
        let mut lower = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..=i {
                let mut sum = self.data[i][j];
                for k in 0..j {
                    sum -= lower[i][k] * lower[j][k];
                }
                if i == j {
                    if sum < -PSD_TOL {
                        return Err(RiskError::calculation(
                            "cholesky",
                            format!(
                                "correlation matrix is not positive semi-definite \
                                 (pivot {sum:.6} at {symbol})",
                                symbol = self.symbols[i]
                            ),
                        ));
                    }
                    lower[i][j] = sum.max(0.0).sqrt();
                } else if lower[j][j] > PSD_TOL {
                    lower[i][j] = sum / lower[j][j];
                } else {
                    lower[i][j] = 0.0;
                }
            }
        }
        Ok(lower)
    }

    /// Transform independent standard normals into correlated ones using a
    /// factor from [`CorrelationMatrix::cholesky`].
    #[must_use]
    pub fn correlate(lower: &[Vec<f64>], independent: &[f64]) -> Vec<f64> {
        lower
            .iter()
            .map(|row| {
                row.iter()
                    .zip(independent)
                    .map(|(l, z)| l * z)
                    .sum::<f64>()
            })
            .collect()
    }

    /// Portfolio variance `wᵀΣw` for the given weights and volatilities.
    #[must_use]
    pub fn portfolio_variance(&self, weights: &[f64], vols: &[f64]) -> f64 {
        let cov = self.covariance(vols);
        let n = cov.len().min(weights.len());
        let mut variance = 0.0;
        for i in 0..n {
            for j in 0..n {
                variance += weights[i] * cov[i][j] * weights[j];
            }
        }
        variance.max(0.0)
    }

    /// `Σw`: covariance-times-weights vector, used by component VaR.
    #[must_use]
    pub fn covariance_times_weights(&self, weights: &[f64], vols: &[f64]) -> Vec<f64> {
        let cov = self.covariance(vols);
        let n = cov.len().min(weights.len());
        (0..n)
            .map(|i| (0..n).map(|j| cov[i][j] * weights[j]).sum())
            .collect()
    }
}

/// Pearson correlation on the trailing overlap of two samples.
fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];
    let (mean_a, mean_b) = (mean(a)?, mean(b)?);
    let (std_a, std_b) = (std_dev(a)?, std_dev(b)?);
    if std_a <= f64::EPSILON || std_b <= f64::EPSILON {
        return None;
    }
    let cov = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - mean_a) * (y - mean_b))
        .sum::<f64>()
        / (n - 1) as f64;
    Some(cov / (std_a * std_b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_identity_has_unit_diagonal() {
        let m = CorrelationMatrix::identity(symbols(&["BTC", "ETH", "SOL"]));
        for i in 0..3 {
            assert_relative_eq!(m.data[i][i], 1.0);
            for j in 0..3 {
                if i != j {
                    assert_relative_eq!(m.data[i][j], 0.0);
                }
            }
        }
    }

    #[test]
    fn test_perfectly_correlated_series() {
        let mut returns = HashMap::new();
        returns.insert("A".to_string(), vec![0.01, -0.02, 0.03, 0.01]);
        returns.insert("B".to_string(), vec![0.02, -0.04, 0.06, 0.02]);
        let m = CorrelationMatrix::from_returns(&symbols(&["A", "B"]), &returns);
        assert_relative_eq!(m.data[0][1], 1.0, epsilon = 1e-9);
        assert_relative_eq!(m.data[1][0], m.data[0][1]);
    }

    #[test]
    fn test_anticorrelated_series() {
        let mut returns = HashMap::new();
        returns.insert("A".to_string(), vec![0.01, -0.02, 0.03]);
        returns.insert("B".to_string(), vec![-0.01, 0.02, -0.03]);
        let m = CorrelationMatrix::from_returns(&symbols(&["A", "B"]), &returns);
        assert_relative_eq!(m.data[0][1], -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_series_defaults_to_zero() {
        let mut returns = HashMap::new();
        returns.insert("A".to_string(), vec![0.01, -0.02, 0.03]);
        returns.insert("B".to_string(), vec![0.0, 0.0, 0.0]);
        let m = CorrelationMatrix::from_returns(&symbols(&["A", "B"]), &returns);
        assert_relative_eq!(m.data[0][1], 0.0);
    }

    #[test]
    fn test_off_diagonals_stay_in_band() {
        let mut returns = HashMap::new();
        returns.insert("A".to_string(), vec![0.05, -0.03, 0.02, 0.04, -0.01]);
        returns.insert("B".to_string(), vec![0.01, 0.02, -0.02, 0.03, 0.00]);
        returns.insert("C".to_string(), vec![-0.02, 0.01, 0.04, -0.03, 0.02]);
        let m = CorrelationMatrix::from_returns(&symbols(&["A", "B", "C"]), &returns);
        for i in 0..3 {
            assert_relative_eq!(m.data[i][i], 1.0);
            for j in 0..3 {
                assert!(m.data[i][j] >= -1.0 && m.data[i][j] <= 1.0);
            }
        }
    }

    #[test]
    fn test_cholesky_reconstructs_matrix() {
        let mut m = CorrelationMatrix::identity(symbols(&["A", "B"]));
        m.data[0][1] = 0.6;
        m.data[1][0] = 0.6;
        let lower = m.cholesky().expect("PSD matrix factors");
        // L·Lᵀ == original.
        for i in 0..2 {
            for j in 0..2 {
                let rebuilt: f64 = (0..2).map(|k| lower[i][k] * lower[j][k]).sum();
                assert_relative_eq!(rebuilt, m.data[i][j], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_cholesky_rejects_non_psd() {
        let mut m = CorrelationMatrix::identity(symbols(&["A", "B", "C"]));
        // rho(A,B)=rho(A,C)=0.9 with rho(B,C)=-0.9 cannot be PSD.
        for (i, j) in [(0, 1), (0, 2)] {
            m.data[i][j] = 0.9;
            m.data[j][i] = 0.9;
        }
        m.data[1][2] = -0.9;
        m.data[2][1] = -0.9;
        let err = m.cholesky().expect_err("non-PSD must fail");
        assert!(matches!(err, RiskError::Calculation { .. }));
        assert!(err.to_string().contains("positive semi-definite"));
    }

    #[test]
    fn test_correlated_sampling_preserves_unit_case() {
        let m = CorrelationMatrix::identity(symbols(&["A", "B"]));
        let lower = m.cholesky().expect("identity factors");
        let z = [1.5, -0.5];
        let correlated = CorrelationMatrix::correlate(&lower, &z);
        assert_relative_eq!(correlated[0], 1.5);
        assert_relative_eq!(correlated[1], -0.5);
    }

    #[test]
    fn test_portfolio_variance_single_asset() {
        let m = CorrelationMatrix::identity(symbols(&["A"]));
        let variance = m.portfolio_variance(&[1.0], &[0.02]);
        assert_relative_eq!(variance, 0.0004, epsilon = 1e-12);
    }

    #[test]
    fn test_average_correlation() {
        let mut m = CorrelationMatrix::identity(symbols(&["A", "B", "C"]));
        m.data[0][1] = 0.5;
        m.data[1][0] = 0.5;
        m.data[0][2] = 0.1;
        m.data[2][0] = 0.1;
        m.data[1][2] = 0.3;
        m.data[2][1] = 0.3;
        assert_relative_eq!(m.average_correlation(), 0.3, epsilon = 1e-12);
    }
}
