//! Privacy budget parameters and their split across mechanisms.

use serde::{Deserialize, Serialize};

use crate::calibration::analytic_gaussian_sigma;
use crate::error::{DpError, Result};

fn validate_epsilon(epsilon: f64) -> Result<()> {
    if epsilon.is_nan() || epsilon < 0.0 {
        return Err(DpError::invalid(format!(
            "epsilon must lie in [0, inf], got {epsilon}"
        )));
    }
    Ok(())
}

fn validate_delta(delta: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&delta) {
        return Err(DpError::invalid(format!(
            "delta must lie in [0, 1], got {delta}"
        )));
    }
    Ok(())
}

fn validate_fraction(name: &str, frac: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&frac) {
        return Err(DpError::invalid(format!(
            "{name} must lie in [0, 1], got {frac}"
        )));
    }
    Ok(())
}

/// Global `(epsilon, delta)` budget.
///
/// An infinite epsilon means no privacy constraint: mechanisms release
/// exact statistics.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DifferentialPrivacyParam {
    /// Multiplicative leakage bound.
    pub epsilon: f64,
    /// Additive leakage bound.
    pub delta: f64,
}

impl Default for DifferentialPrivacyParam {
    fn default() -> Self {
        Self {
            epsilon: 1.0,
            delta: 1e-6,
        }
    }
}

impl DifferentialPrivacyParam {
    /// Create a validated budget.
    pub fn new(epsilon: f64, delta: f64) -> Result<Self> {
        validate_epsilon(epsilon)?;
        validate_delta(delta)?;
        Ok(Self { epsilon, delta })
    }
}

/// How epsilon is divided between averaging and group counting.
///
/// Deserialized splits go through [`PrivacyBudgetSplit::new`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBudgetSplit")]
pub struct PrivacyBudgetSplit {
    /// Fraction of epsilon spent on the noisy sum of points.
    pub frac_sum: f64,
    /// Fraction of epsilon spent on counting points per group.
    pub frac_group_count: f64,
}

impl Default for PrivacyBudgetSplit {
    fn default() -> Self {
        Self {
            frac_sum: 0.8,
            frac_group_count: 0.2,
        }
    }
}

impl PrivacyBudgetSplit {
    /// Create a split, rejecting fractions that sum above one.
    pub fn new(frac_sum: f64, frac_group_count: f64) -> Result<Self> {
        let split = Self {
            frac_sum,
            frac_group_count,
        };
        split.validate()?;
        Ok(split)
    }

    /// Check both fractions and their sum.
    pub fn validate(&self) -> Result<()> {
        validate_fraction("frac_sum", self.frac_sum)?;
        validate_fraction("frac_group_count", self.frac_group_count)?;
        let total = self.frac_sum + self.frac_group_count;
        if total > 1.0 {
            return Err(DpError::BudgetOverflow { total });
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RawBudgetSplit {
    frac_sum: f64,
    frac_group_count: f64,
}

impl TryFrom<RawBudgetSplit> for PrivacyBudgetSplit {
    type Error = DpError;

    fn try_from(raw: RawBudgetSplit) -> Result<Self> {
        Self::new(raw.frac_sum, raw.frac_group_count)
    }
}

/// How the Gaussian noise scale is derived from `(epsilon, delta)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GaussianCalibration {
    /// `sensitivity * sqrt(2 ln(1.25 / delta)) / epsilon`.
    #[default]
    Classical,
    /// Smallest sigma meeting the exact Gaussian mechanism delta.
    Analytic,
}

/// Budget slice for the noisy average of a set of points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AveragePrivacyParam {
    /// Epsilon allotted to the noisy sum.
    pub epsilon: f64,
    /// Delta allotted to the noisy sum.
    pub delta: f64,
    /// L2 sensitivity of the sum (the radius bounding each point).
    pub sensitivity: f64,
    /// Noise calibration rule.
    #[serde(default)]
    pub calibration: GaussianCalibration,
}

impl AveragePrivacyParam {
    /// Create a parameter record directly.
    pub fn new(epsilon: f64, delta: f64, sensitivity: f64) -> Self {
        Self {
            epsilon,
            delta,
            sensitivity,
            calibration: GaussianCalibration::Classical,
        }
    }

    /// Derive the averaging slice of a global budget.
    pub fn from_budget(
        privacy_param: &DifferentialPrivacyParam,
        split: &PrivacyBudgetSplit,
        sensitivity: f64,
    ) -> Result<Self> {
        validate_epsilon(privacy_param.epsilon)?;
        validate_delta(privacy_param.delta)?;
        split.validate()?;
        if !sensitivity.is_finite() || sensitivity < 0.0 {
            return Err(DpError::invalid(format!(
                "sensitivity must be finite and non-negative, got {sensitivity}"
            )));
        }
        Ok(Self::new(
            privacy_param.epsilon * split.frac_sum,
            privacy_param.delta,
            sensitivity,
        ))
    }

    /// Use a different noise calibration rule.
    pub fn with_calibration(mut self, calibration: GaussianCalibration) -> Self {
        self.calibration = calibration;
        self
    }

    /// Standard deviation of the Gaussian noise added to the sum.
    ///
    /// Zero when epsilon is infinite.
    pub fn gaussian_standard_deviation(&self) -> Result<f64> {
        validate_epsilon(self.epsilon)?;
        if self.epsilon.is_infinite() || self.sensitivity == 0.0 {
            return Ok(0.0);
        }
        if self.epsilon == 0.0 {
            return Err(DpError::invalid(
                "epsilon must be positive to calibrate Gaussian noise",
            ));
        }
        if !(self.delta > 0.0 && self.delta < 1.0) {
            return Err(DpError::invalid(format!(
                "delta must lie in (0, 1) for Gaussian noise, got {}",
                self.delta
            )));
        }
        match self.calibration {
            GaussianCalibration::Classical => Ok(self.sensitivity
                * (2.0 * (1.25 / self.delta).ln()).sqrt()
                / self.epsilon),
            GaussianCalibration::Analytic => {
                analytic_gaussian_sigma(self.epsilon, self.delta, self.sensitivity)
            }
        }
    }
}

/// Budget slice for one level of noisy group counts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountPrivacyParam {
    /// Epsilon allotted to a single count.
    pub epsilon: f64,
    /// Delta carried alongside (unused by the discrete Laplace noise).
    pub delta: f64,
}

impl CountPrivacyParam {
    /// Create a parameter record directly.
    pub fn new(epsilon: f64, delta: f64) -> Self {
        Self { epsilon, delta }
    }

    /// Derive the per-level counting slice of a global budget.
    ///
    /// Every level of the tree, root included, is counted once, so the
    /// group-count share is divided over `max_tree_depth + 1` levels.
    pub fn from_budget(
        privacy_param: &DifferentialPrivacyParam,
        split: &PrivacyBudgetSplit,
        max_tree_depth: usize,
    ) -> Result<Self> {
        validate_epsilon(privacy_param.epsilon)?;
        validate_delta(privacy_param.delta)?;
        split.validate()?;
        let levels = max_tree_depth as f64 + 1.0;
        Ok(Self::new(
            privacy_param.epsilon * split.frac_group_count / levels,
            privacy_param.delta,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn average_param_takes_sum_fraction() {
        let budget = DifferentialPrivacyParam::new(10.0, 1e-2).expect("budget");
        let split = PrivacyBudgetSplit::new(0.7, 0.3).expect("split");
        let param = AveragePrivacyParam::from_budget(&budget, &split, 4.3).expect("param");
        assert!((param.epsilon - 7.0).abs() < 1e-12);
        assert_eq!(param.delta, 1e-2);
        assert_eq!(param.sensitivity, 4.3);
        assert_eq!(param.calibration, GaussianCalibration::Classical);
    }

    #[test]
    fn count_param_divides_over_levels() {
        let budget = DifferentialPrivacyParam::new(10.0, 1e-2).expect("budget");
        let split = PrivacyBudgetSplit::new(0.2, 0.8).expect("split");
        let param = CountPrivacyParam::from_budget(&budget, &split, 3).expect("param");
        assert!((param.epsilon - 2.0).abs() < 1e-12);
        assert_eq!(param.delta, 1e-2);
    }

    #[test]
    fn split_above_one_overflows() {
        let err = PrivacyBudgetSplit::new(0.8, 0.3).unwrap_err();
        assert!(matches!(err, DpError::BudgetOverflow { .. }));
    }

    #[test]
    fn deserialized_split_above_one_overflows() {
        let err = serde_json::from_str::<PrivacyBudgetSplit>(
            r#"{"frac_sum":0.9,"frac_group_count":0.9}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("budget"), "{err}");

        let split: PrivacyBudgetSplit =
            serde_json::from_str(r#"{"frac_sum":0.7,"frac_group_count":0.3}"#).expect("json");
        assert_eq!(split, PrivacyBudgetSplit::new(0.7, 0.3).expect("split"));
    }

    #[test]
    fn from_budget_rechecks_the_split() {
        let budget = DifferentialPrivacyParam::new(10.0, 1e-2).expect("budget");
        let split = PrivacyBudgetSplit {
            frac_sum: 0.9,
            frac_group_count: 0.9,
        };
        let err = AveragePrivacyParam::from_budget(&budget, &split, 4.3).unwrap_err();
        assert!(matches!(err, DpError::BudgetOverflow { .. }));
        let err = CountPrivacyParam::from_budget(&budget, &split, 3).unwrap_err();
        assert!(matches!(err, DpError::BudgetOverflow { .. }));
    }

    #[test]
    fn budget_rejects_out_of_range_values() {
        assert!(DifferentialPrivacyParam::new(-1.0, 1e-6).is_err());
        assert!(DifferentialPrivacyParam::new(1.0, 1.5).is_err());
        assert!(DifferentialPrivacyParam::new(f64::NAN, 1e-6).is_err());
        assert!(DifferentialPrivacyParam::new(f64::INFINITY, 0.0).is_ok());
    }

    #[test]
    fn classical_sigma_matches_closed_form() {
        let param = AveragePrivacyParam::new(7.0, 1e-2, 4.3);
        let sigma = param.gaussian_standard_deviation().expect("sigma");
        let expected = 4.3 * (2.0 * (125.0f64).ln()).sqrt() / 7.0;
        assert!((sigma - expected).abs() < 1e-12);
    }

    #[test]
    fn infinite_epsilon_has_no_noise() {
        let param = AveragePrivacyParam::new(f64::INFINITY, 1e-2, 4.3);
        assert_eq!(param.gaussian_standard_deviation().expect("sigma"), 0.0);
    }

    #[test]
    fn zero_epsilon_cannot_be_calibrated() {
        let param = AveragePrivacyParam::new(0.0, 1e-2, 4.3);
        assert!(param.gaussian_standard_deviation().is_err());
    }

    #[test]
    fn average_param_json_defaults_to_classical() {
        let param: AveragePrivacyParam =
            serde_json::from_str(r#"{"epsilon":7.0,"delta":0.01,"sensitivity":4.3}"#)
                .expect("json");
        assert_eq!(param.calibration, GaussianCalibration::Classical);
    }

    proptest! {
        #[test]
        fn split_accepts_iff_sum_at_most_one(a in 0.0f64..1.0, b in 0.0f64..1.0) {
            let res = PrivacyBudgetSplit::new(a, b);
            if a + b > 1.0 {
                let is_overflow = matches!(res, Err(DpError::BudgetOverflow { .. }));
                prop_assert!(is_overflow);
            } else {
                prop_assert!(res.is_ok());
            }
        }
    }
}
