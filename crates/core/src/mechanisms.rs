//! Calibrated noise mechanisms for averages and counts.
//!
//! Both mechanisms consume a budget slice computed ahead of time and a
//! caller-provided [`NoiseSource`]; they do no accounting of their own.

use ndarray::{Array1, ArrayView2, Axis};

use crate::error::{DpError, Result};
use crate::noise::NoiseSource;
use crate::params::{AveragePrivacyParam, CountPrivacyParam};

/// Noisy average of `points` (one point per row), normalised by a private
/// count.
///
/// Gaussian noise calibrated by `param` is added to each coordinate of the
/// sum, which is then divided by `private_count`. With an infinite epsilon
/// the exact mean of the points is returned.
pub fn get_private_average<N: NoiseSource + ?Sized>(
    points: ArrayView2<'_, f64>,
    private_count: i64,
    param: &AveragePrivacyParam,
    dim: usize,
    noise: &mut N,
) -> Result<Array1<f64>> {
    if private_count <= 0 {
        return Err(DpError::invalid(format!(
            "private count must be positive, got {private_count}"
        )));
    }
    if points.nrows() > 0 && points.ncols() != dim {
        return Err(DpError::invalid(format!(
            "points have dimension {}, expected {dim}",
            points.ncols()
        )));
    }

    if param.epsilon.is_infinite() && param.epsilon > 0.0 {
        return Ok(points
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(dim)));
    }

    let sigma = param.gaussian_standard_deviation()?;
    let mut sum = if points.nrows() == 0 {
        Array1::zeros(dim)
    } else {
        points.sum_axis(Axis(0))
    };
    let draws = noise.gaussian(sigma, dim);
    if draws.len() != dim {
        return Err(DpError::numerical(format!(
            "noise source returned {} draws, expected {dim}",
            draws.len()
        )));
    }
    sum += &Array1::from(draws);
    Ok(sum / private_count as f64)
}

/// Noisy count perturbed with discrete Laplace noise of parameter epsilon.
///
/// With an infinite epsilon the count is returned unchanged.
pub fn get_private_count<N: NoiseSource + ?Sized>(
    nonprivate_count: i64,
    param: &CountPrivacyParam,
    noise: &mut N,
) -> Result<i64> {
    if param.epsilon.is_nan() || param.epsilon <= 0.0 {
        return Err(DpError::invalid(format!(
            "count epsilon must be positive, got {}",
            param.epsilon
        )));
    }
    if param.epsilon.is_infinite() {
        return Ok(nonprivate_count);
    }
    Ok(nonprivate_count.saturating_add(noise.discrete_laplace(param.epsilon)))
}
