//! Privacy accounting over composable DP events.
//!
//! Events describe mechanisms as data; accountants turn a sequence of
//! composed events into `(epsilon, delta)` guarantees. Two families are
//! provided: privacy loss distributions ([`PldAccountant`]) and Rényi DP
//! ([`RdpAccountant`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod accountant;
pub mod accountants;
pub mod calibrate;
pub mod event;
pub mod pld;
pub mod pld_accountant;
pub mod rdp;

pub use accountant::{NeighboringRelation, PrivacyAccountant};
pub use accountants::{
    AccountantConfig, DpAccountantConfig, PldAccountantConfig, RdpAccountantConfig,
};
pub use calibrate::{calibrate_dp_mechanism, BracketInterval};
pub use event::{dpsgd_event, positive_count, DpEvent, DpEventBuilder};
pub use pld::{DiscretizationParams, PrivacyLossDistribution};
pub use pld_accountant::PldAccountant;
pub use rdp::{default_orders, RdpAccountant};

/// Common imports for privacy accounting.
pub mod prelude {
    pub use crate::{
        calibrate_dp_mechanism, dpsgd_event, AccountantConfig, BracketInterval,
        DiscretizationParams, DpAccountantConfig, DpEvent, DpEventBuilder, NeighboringRelation,
        PldAccountant, PldAccountantConfig, PrivacyAccountant, PrivacyLossDistribution,
        RdpAccountant, RdpAccountantConfig,
    };
}
