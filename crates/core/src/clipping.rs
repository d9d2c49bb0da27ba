//! Radius clipping that bounds the sensitivity of point sums.

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{DpError, Result};

/// Result of a clipping operation.
#[derive(Clone, Debug)]
pub struct ClipReport {
    /// Clipped points, one per row.
    pub points: Array2<f64>,
    /// Number of rows that were rescaled.
    pub num_clipped: usize,
}

/// Rescale every row whose L2 norm exceeds `radius` to norm exactly
/// `radius`. Rows already inside the ball are left unchanged.
pub fn clip_by_radius(points: ArrayView2<'_, f64>, radius: f64) -> Result<ClipReport> {
    if !radius.is_finite() || radius <= 0.0 {
        return Err(DpError::invalid(format!(
            "radius must be positive and finite, got {radius}"
        )));
    }

    let mut clipped = points.to_owned();
    let mut num_clipped = 0usize;
    for mut row in clipped.axis_iter_mut(Axis(0)) {
        let norm = row.dot(&row).sqrt();
        if norm > radius {
            let scale = radius / norm;
            row.mapv_inplace(|x| x * scale);
            num_clipped += 1;
        }
    }

    if num_clipped > 0 {
        tracing::debug!(
            num_clipped,
            radius,
            "rescaled points outside the radius to norm exactly equal to it"
        );
    }
    Ok(ClipReport {
        points: clipped,
        num_clipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn clips_only_points_outside_radius() {
        let points = array![[3.0, 4.0], [0.3, 0.4], [0.0, 0.0]];
        let report = clip_by_radius(points.view(), 1.0).expect("clip");
        assert_eq!(report.num_clipped, 1);
        assert!((report.points[[0, 0]] - 0.6).abs() < 1e-12);
        assert!((report.points[[0, 1]] - 0.8).abs() < 1e-12);
        assert_eq!(report.points.row(1), points.row(1));
        assert_eq!(report.points.row(2), points.row(2));
    }

    #[test]
    fn rejects_non_positive_radius() {
        let points = array![[1.0]];
        assert!(clip_by_radius(points.view(), 0.0).is_err());
        assert!(clip_by_radius(points.view(), -1.0).is_err());
    }
}
