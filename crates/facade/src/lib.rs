//! Facade crate re-exporting stable APIs.
//!
//! Accounting lives in [`accounting`], the budget parameters and noise
//! mechanisms in [`core`]; the most common items are re-exported at the
//! root and through [`prelude`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use dp_ledger_accounting as accounting;
pub use dp_ledger_core as core;

pub use dp_ledger_accounting::{
    calibrate_dp_mechanism, dpsgd_event, AccountantConfig, BracketInterval, DiscretizationParams,
    DpAccountantConfig, DpEvent, DpEventBuilder, NeighboringRelation, PldAccountant,
    PldAccountantConfig, PrivacyAccountant, PrivacyLossDistribution, RdpAccountant,
    RdpAccountantConfig,
};
pub use dp_ledger_core::{
    analytic_gaussian_sigma, clip_by_radius, get_private_average, get_private_count,
    AveragePrivacyParam, ClipReport, CountPrivacyParam, DifferentialPrivacyParam, DpError,
    GaussianCalibration, NoiseSource, PrivacyBudgetSplit, Result, RngNoise,
};

/// Convenience prelude covering accounting and the noise mechanisms.
pub mod prelude {
    pub use dp_ledger_accounting::prelude::*;
    pub use dp_ledger_core::prelude::*;
}
