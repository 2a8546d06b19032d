//! Summary statistics and normal-distribution helpers.

/// Arithmetic mean. `None` for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n−1 denominator). `None` below two samples.
#[must_use]
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let avg = mean(values)?;
    let variance = values.iter().map(|v| (v - avg) * (v - avg)).sum::<f64>()
        / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Maximum peak-to-trough drawdown of an equity curve, as a positive
/// fraction. Zero for monotonically rising or empty curves.
#[must_use]
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0f64;
    for &value in equity {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let dd = (peak - value) / peak;
            if dd > worst {
                worst = dd;
            }
        }
    }
    worst
}

/// Index of the `(1 - confidence)` percentile in an ascending sample of
/// length `n`. Clamped into bounds.
#[must_use]
pub fn percentile_index(n: usize, confidence: f64) -> usize {
    if n == 0 {
        return 0;
    }
    let idx = ((1.0 - confidence) * n as f64).floor() as usize;
    idx.min(n - 1)
}

/// Standard normal probability density.
#[must_use]
pub fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Inverse standard normal CDF via Acklam's rational approximation.
///
/// Accurate to roughly 1e-9 over (0, 1); a true quantile function, not a
/// lookup table. Returns infinities at the boundaries and NaN outside (0, 1).
#[must_use]
pub fn normal_inv_cdf(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_690e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];

    const P_LOW: f64 = 0.02425;
    const P_HIGH: f64 = 1.0 - P_LOW;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= P_HIGH {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_case::test_case;

    #[test]
    fn test_mean_and_std_dev() {
        let values = [10.0, 20.0, 30.0, 40.0];
        assert_relative_eq!(mean(&values).unwrap(), 25.0);
        let std = std_dev(&values).unwrap();
        assert!(std > 12.0 && std < 14.0);
        assert!(mean(&[]).is_none());
        assert!(std_dev(&[1.0]).is_none());
    }

    #[test_case(0.90, 1.2816 ; "ninety")]
    #[test_case(0.95, 1.6449 ; "ninety five")]
    #[test_case(0.99, 2.3263 ; "ninety nine")]
    #[test_case(0.995, 2.5758 ; "ninety nine point five")]
    fn test_inverse_normal_at_standard_confidences(p: f64, expected: f64) {
        assert_relative_eq!(normal_inv_cdf(p), expected, epsilon = 1e-3);
    }

    #[test]
    fn test_inverse_normal_symmetry_and_tails() {
        assert_relative_eq!(normal_inv_cdf(0.5), 0.0, epsilon = 1e-9);
        assert_relative_eq!(
            normal_inv_cdf(0.025),
            -normal_inv_cdf(0.975),
            epsilon = 1e-6
        );
        // Deep tail, outside any hard-coded table.
        assert_relative_eq!(normal_inv_cdf(0.999), 3.0902, epsilon = 1e-3);
        assert!(normal_inv_cdf(0.0).is_infinite());
        assert!(normal_inv_cdf(1.0).is_infinite());
    }

    #[test]
    fn test_normal_pdf_peak() {
        assert_relative_eq!(normal_pdf(0.0), 0.398_942, epsilon = 1e-5);
        assert!(normal_pdf(3.0) < normal_pdf(0.0));
    }

    #[test]
    fn test_max_drawdown() {
        let curve = [100.0, 120.0, 90.0, 110.0, 80.0];
        // Worst: 120 -> 80.
        assert_relative_eq!(max_drawdown(&curve), 40.0 / 120.0, epsilon = 1e-12);
        assert_relative_eq!(max_drawdown(&[1.0, 2.0, 3.0]), 0.0);
        assert_relative_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn test_percentile_index_bounds() {
        assert_eq!(percentile_index(100, 0.95), 5);
        assert_eq!(percentile_index(100, 0.99), 1);
        assert_eq!(percentile_index(0, 0.95), 0);
        assert_eq!(percentile_index(3, 0.0), 2);
    }
}
