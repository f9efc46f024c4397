//! Logarithmic-series calibration
//!
//! The initial firm-size distribution is a logarithmic series over the number
//! of varieties a firm holds. Its shape parameter θ is recovered from a target
//! mean (the average number of varieties per firm) or from a target
//! concentration (the technological diversification index) by bisection.

use crate::error::{ModelError, Result};

/// Lower end of the θ search bracket
pub const THETA_MIN: f64 = 0.01;
/// Upper end of the bracket when matching a mean
pub const THETA_MAX_MEAN: f64 = 0.99999;
/// Upper end of the bracket when matching a concentration
pub const THETA_MAX_CONCENTRATION: f64 = 0.9999;

const BISECT_TOLERANCE: f64 = 1e-12;
const BISECT_MAX_ITER: usize = 200;

/// P(K = k) for a logarithmic series with parameter θ, k ≥ 1
pub fn logseries_pmf(k: usize, theta: f64) -> f64 {
    if k == 0 {
        return 0.0;
    }
    let k = k as f64;
    -(k * theta.ln()).exp() / (k * (-theta).ln_1p())
}

/// E[K] = -θ / ((1 - θ) ln(1 - θ))
pub fn logseries_mean(theta: f64) -> f64 {
    -theta / ((1.0 - theta) * (-theta).ln_1p())
}

/// Diversification index of a firm-size distribution following logser(θ)
pub fn logseries_concentration(theta: f64) -> f64 {
    2.0 * (1.0 - 1.0 / theta) * (-theta).ln_1p()
        - (1.0 - 1.0 / (theta * theta)) * (-theta * theta).ln_1p()
}

/// Find a root of `f` in `[lo, hi]` by interval halving
///
/// The endpoints must bracket a sign change; otherwise the target handed to
/// the caller is unreachable and a `Numerical` error is returned.
pub fn bisect<F>(f: F, lo: f64, hi: f64) -> Result<f64>
where
    F: Fn(f64) -> f64,
{
    let (mut a, mut b) = (lo, hi);
    let mut fa = f(a);
    let fb = f(b);
    if !fa.is_finite() || !fb.is_finite() {
        return Err(ModelError::numerical(format!(
            "bisection endpoints are not finite: f({a}) = {fa}, f({b}) = {fb}"
        )));
    }
    if fa == 0.0 {
        return Ok(a);
    }
    if fb == 0.0 {
        return Ok(b);
    }
    if fa.signum() == fb.signum() {
        return Err(ModelError::numerical(format!(
            "no sign change on [{lo}, {hi}]: f({lo}) = {fa}, f({hi}) = {fb}"
        )));
    }

    for _ in 0..BISECT_MAX_ITER {
        let mid = 0.5 * (a + b);
        let fm = f(mid);
        if fm == 0.0 || (b - a) < BISECT_TOLERANCE {
            return Ok(mid);
        }
        if fm.signum() == fa.signum() {
            a = mid;
            fa = fm;
        } else {
            b = mid;
        }
    }
    Ok(0.5 * (a + b))
}

/// θ whose logarithmic series has the given mean
///
/// Targets outside the achievable range saturate at the bracket endpoints.
pub fn theta_from_mean(target_mean: f64) -> Result<f64> {
    if target_mean.is_nan() {
        return Err(ModelError::numerical("target mean is NaN"));
    }
    if target_mean < logseries_mean(THETA_MIN) {
        return Ok(THETA_MIN);
    }
    if target_mean > logseries_mean(THETA_MAX_MEAN) {
        return Ok(THETA_MAX_MEAN);
    }
    bisect(
        |theta| logseries_mean(theta) - target_mean,
        THETA_MIN,
        THETA_MAX_MEAN,
    )
}

/// θ whose logarithmic series has the given concentration; no clamping
pub fn theta_from_concentration(target_concentration: f64) -> Result<f64> {
    bisect(
        |theta| logseries_concentration(theta) - target_concentration,
        THETA_MIN,
        THETA_MAX_CONCENTRATION,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn pmf_sums_to_one() {
        let theta = 0.6;
        let total: f64 = (1..400).map(|k| logseries_pmf(k, theta)).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn pmf_mean_matches_closed_form() {
        let theta = 0.8;
        let mean: f64 = (1..2000).map(|k| k as f64 * logseries_pmf(k, theta)).sum();
        assert_relative_eq!(mean, logseries_mean(theta), epsilon = 1e-9);
    }

    #[test]
    fn mean_at_half() {
        // -0.5 / (0.5 * ln 0.5) = 1 / ln 2
        assert_relative_eq!(
            logseries_mean(0.5),
            1.0 / std::f64::consts::LN_2,
            epsilon = 1e-12
        );
    }

    #[test]
    fn concentration_is_decreasing() {
        let values: Vec<f64> = [0.01, 0.1, 0.5, 0.9, 0.99, 0.9999]
            .iter()
            .map(|&t| logseries_concentration(t))
            .collect();
        assert!(values.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn saturates_below_range() {
        assert_eq!(theta_from_mean(1.0).unwrap(), THETA_MIN);
    }

    #[test]
    fn saturates_above_range() {
        assert_eq!(theta_from_mean(1e6).unwrap(), THETA_MAX_MEAN);
    }

    #[test]
    fn concentration_out_of_bracket_is_an_error() {
        let result = theta_from_concentration(2.0);
        assert!(matches!(result, Err(ModelError::Numerical(_))));
    }

    #[test]
    fn reference_calibration() {
        // USA variance 0.001534 with gamma = 0.1 gives roughly 19.4 varieties per firm
        let theta = theta_from_concentration(0.001534 / 0.1).unwrap();
        assert_relative_eq!(theta, 0.98861, epsilon = 1e-4);
        assert_relative_eq!(logseries_mean(theta), 19.393, epsilon = 1e-2);
    }

    #[test]
    fn bisect_requires_sign_change() {
        let result = bisect(|x| x * x + 1.0, -1.0, 1.0);
        assert!(matches!(result, Err(ModelError::Numerical(_))));
    }

    #[test]
    fn bisect_finds_square_root() {
        let root = bisect(|x| x * x - 2.0, 0.0, 2.0).unwrap();
        assert_relative_eq!(root, std::f64::consts::SQRT_2, epsilon = 1e-10);
    }

    proptest! {
        #[test]
        fn mean_round_trip(theta in 0.011f64..0.9999) {
            let recovered = theta_from_mean(logseries_mean(theta)).unwrap();
            prop_assert!((recovered - theta).abs() < 1e-8);
        }

        #[test]
        fn concentration_round_trip(theta in 0.02f64..0.999) {
            let recovered = theta_from_concentration(logseries_concentration(theta)).unwrap();
            prop_assert!((recovered - theta).abs() < 1e-6);
        }
    }
}
