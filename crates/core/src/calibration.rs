//! Analytic calibration of the Gaussian mechanism.

use statrs::function::erf::erfc;

use crate::error::{DpError, Result};

const MAX_BRACKET_DOUBLINGS: usize = 200;
const MAX_BISECTION_STEPS: usize = 200;
const RELATIVE_TOLERANCE: f64 = 1e-12;

fn standard_normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Exact delta of the Gaussian mechanism with noise `sigma` at `epsilon`.
///
/// `Phi(D/2s - eps*s/D) - e^eps * Phi(-D/2s - eps*s/D)`; the second term is
/// evaluated in log space so large epsilons do not overflow.
pub fn gaussian_mechanism_delta(sigma: f64, epsilon: f64, sensitivity: f64) -> f64 {
    if sigma <= 0.0 {
        return 1.0;
    }
    let ratio = sensitivity / sigma;
    let shift = epsilon / ratio;
    let upper = standard_normal_cdf(0.5 * ratio - shift);
    let lower_cdf = standard_normal_cdf(-0.5 * ratio - shift);
    let lower = if lower_cdf > 0.0 {
        (epsilon + lower_cdf.ln()).exp()
    } else {
        0.0
    };
    (upper - lower).clamp(0.0, 1.0)
}

/// Smallest Gaussian standard deviation that is `(epsilon, delta)`-DP for the
/// given L2 sensitivity.
pub fn analytic_gaussian_sigma(epsilon: f64, delta: f64, sensitivity: f64) -> Result<f64> {
    if !epsilon.is_finite() || epsilon <= 0.0 {
        return Err(DpError::invalid(format!(
            "epsilon must be positive and finite, got {epsilon}"
        )));
    }
    if !(delta > 0.0 && delta < 1.0) {
        return Err(DpError::invalid(format!(
            "delta must lie in (0, 1), got {delta}"
        )));
    }
    if !sensitivity.is_finite() || sensitivity < 0.0 {
        return Err(DpError::invalid(format!(
            "sensitivity must be finite and non-negative, got {sensitivity}"
        )));
    }
    if sensitivity == 0.0 {
        return Ok(0.0);
    }

    let mut lo = 0.0;
    let mut hi = sensitivity;
    let mut doublings = 0;
    while gaussian_mechanism_delta(hi, epsilon, sensitivity) > delta {
        lo = hi;
        hi *= 2.0;
        doublings += 1;
        if doublings > MAX_BRACKET_DOUBLINGS {
            return Err(DpError::numerical(
                "failed to bracket the analytic Gaussian noise scale",
            ));
        }
    }

    for _ in 0..MAX_BISECTION_STEPS {
        if hi - lo <= RELATIVE_TOLERANCE * hi {
            break;
        }
        let mid = 0.5 * (lo + hi);
        if gaussian_mechanism_delta(mid, epsilon, sensitivity) > delta {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok(hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_reference_scale() {
        let sigma = analytic_gaussian_sigma(7.0, 1e-2, 4.3).expect("sigma");
        assert!((sigma - 1.927768).abs() < 1e-4, "sigma = {sigma}");
    }

    #[test]
    fn unit_gaussian_delta_at_one() {
        // Composition of three sqrt(3) Gaussians equals one unit Gaussian.
        let delta = gaussian_mechanism_delta(1.0, 1.0, 1.0);
        assert!((delta - 0.126936).abs() < 1e-5);
    }

    #[test]
    fn achieved_delta_is_within_target() {
        for &(eps, delta) in &[(0.5, 1e-5), (1.0, 1e-6), (3.0, 1e-3)] {
            let sigma = analytic_gaussian_sigma(eps, delta, 1.0).expect("sigma");
            assert!(gaussian_mechanism_delta(sigma, eps, 1.0) <= delta);
        }
    }

    #[test]
    fn rejects_degenerate_budgets() {
        assert!(analytic_gaussian_sigma(0.0, 1e-5, 1.0).is_err());
        assert!(analytic_gaussian_sigma(1.0, 0.0, 1.0).is_err());
        assert!(analytic_gaussian_sigma(f64::INFINITY, 1e-5, 1.0).is_err());
    }
}
