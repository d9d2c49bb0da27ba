//! Core differential privacy building blocks.
//!
//! This crate provides the shared error type, privacy budget parameters,
//! injectable noise sources, and the calibrated noise mechanisms that turn a
//! budget slice into a private average or count.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod calibration;
pub mod clipping;
pub mod error;
pub mod mechanisms;
pub mod noise;
pub mod params;

pub use calibration::{analytic_gaussian_sigma, gaussian_mechanism_delta};
pub use clipping::{clip_by_radius, ClipReport};
pub use error::{DpError, Result};
pub use mechanisms::{get_private_average, get_private_count};
pub use noise::{NoiseSource, RngNoise};
pub use params::{
    AveragePrivacyParam, CountPrivacyParam, DifferentialPrivacyParam, GaussianCalibration,
    PrivacyBudgetSplit,
};

/// Common imports for downstream users.
pub mod prelude {
    pub use crate::{
        analytic_gaussian_sigma, clip_by_radius, gaussian_mechanism_delta, get_private_average,
        get_private_count, AveragePrivacyParam, ClipReport, CountPrivacyParam,
        DifferentialPrivacyParam, DpError, GaussianCalibration, NoiseSource, PrivacyBudgetSplit,
        Result, RngNoise,
    };
}
