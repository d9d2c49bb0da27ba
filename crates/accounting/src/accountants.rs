//! Accountant configurations.
//!
//! A configuration is plain data; every call to `create_accountant` yields a
//! fresh ledger in the empty state.

use serde::{Deserialize, Serialize};

use crate::accountant::{NeighboringRelation, PrivacyAccountant};
use crate::pld::DiscretizationParams;
use crate::pld_accountant::PldAccountant;
use crate::rdp::{default_orders, RdpAccountant};

/// Configuration for constructing a privacy accountant with a fresh state.
pub trait DpAccountantConfig {
    /// Accountant type created by this config.
    type Accountant: PrivacyAccountant;

    /// Create a new accountant instance.
    fn create_accountant(&self) -> Self::Accountant;
}

/// Configuration for the RDP accountant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RdpAccountantConfig {
    /// Rényi orders to evaluate.
    pub orders: Vec<f64>,
    /// Neighboring relation to analyze.
    pub neighboring_relation: NeighboringRelation,
}

impl Default for RdpAccountantConfig {
    fn default() -> Self {
        Self {
            orders: default_orders(),
            neighboring_relation: NeighboringRelation::AddOrRemoveOne,
        }
    }
}

impl RdpAccountantConfig {
    /// Create a config with explicit orders.
    pub fn new(orders: Vec<f64>) -> Self {
        Self {
            orders,
            neighboring_relation: NeighboringRelation::AddOrRemoveOne,
        }
    }

    /// Set the neighboring relation for the RDP accountant.
    pub fn with_neighboring_relation(mut self, neighboring_relation: NeighboringRelation) -> Self {
        self.neighboring_relation = neighboring_relation;
        self
    }
}

impl DpAccountantConfig for RdpAccountantConfig {
    type Accountant = RdpAccountant;

    fn create_accountant(&self) -> Self::Accountant {
        RdpAccountant::with_config(self)
    }
}

/// Configuration for the PLD accountant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PldAccountantConfig {
    /// Grid and truncation settings.
    pub discretization: DiscretizationParams,
    /// Neighboring relation to analyze.
    pub neighboring_relation: NeighboringRelation,
}

impl PldAccountantConfig {
    /// Create a config with an explicit discretization interval.
    pub fn new(value_discretization_interval: f64) -> Self {
        Self {
            discretization: DiscretizationParams::default()
                .with_value_discretization_interval(value_discretization_interval),
            neighboring_relation: NeighboringRelation::AddOrRemoveOne,
        }
    }

    /// Replace the discretization settings.
    pub fn with_discretization(mut self, discretization: DiscretizationParams) -> Self {
        self.discretization = discretization;
        self
    }

    /// Set the neighboring relation for the PLD accountant.
    pub fn with_neighboring_relation(mut self, neighboring_relation: NeighboringRelation) -> Self {
        self.neighboring_relation = neighboring_relation;
        self
    }
}

impl DpAccountantConfig for PldAccountantConfig {
    type Accountant = PldAccountant;

    fn create_accountant(&self) -> Self::Accountant {
        PldAccountant::with_config(*self)
    }
}

/// Either accounting family, selected by the `family` tag when
/// deserialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum AccountantConfig {
    /// Privacy loss distribution accounting.
    Pld(PldAccountantConfig),
    /// Rényi DP accounting.
    Rdp(RdpAccountantConfig),
}

impl Default for AccountantConfig {
    fn default() -> Self {
        Self::Pld(PldAccountantConfig::default())
    }
}

impl DpAccountantConfig for AccountantConfig {
    type Accountant = Box<dyn PrivacyAccountant>;

    fn create_accountant(&self) -> Self::Accountant {
        match self {
            AccountantConfig::Pld(config) => Box::new(config.create_accountant()),
            AccountantConfig::Rdp(config) => Box::new(config.create_accountant()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DpEvent;

    #[test]
    fn rdp_config_creates_finite_accountant() {
        let cfg = RdpAccountantConfig::default();
        let mut acc = cfg.create_accountant();
        let event = DpEvent::poisson_sampled(0.01, DpEvent::gaussian(1.0)).expect("event");
        acc.compose(&event, 1).expect("compose");
        assert!(acc.get_epsilon(1e-5).expect("epsilon").is_finite());
    }

    #[test]
    fn pld_config_creates_finite_accountant() {
        let cfg = PldAccountantConfig::new(1e-3);
        let mut acc = cfg.create_accountant();
        let event = DpEvent::poisson_sampled(0.01, DpEvent::gaussian(1.0)).expect("event");
        acc.compose(&event, 1).expect("compose");
        assert!(acc.get_epsilon(1e-5).expect("epsilon").is_finite());
    }

    #[test]
    fn family_tag_selects_accountant() {
        let json = r#"{"family":"rdp","orders":[2.0,4.0],"neighboring_relation":"replace_one"}"#;
        let config: AccountantConfig = serde_json::from_str(json).expect("parse");
        let acc = config.create_accountant();
        assert_eq!(acc.neighboring_relation(), NeighboringRelation::ReplaceOne);
        assert!(!acc.supports(&DpEvent::laplace(1.0)));

        let pld: AccountantConfig = serde_json::from_str(r#"{"family":"pld"}"#).expect("parse");
        assert_eq!(pld, AccountantConfig::default());
        assert!(pld.create_accountant().supports(&DpEvent::laplace(1.0)));
    }

    #[test]
    fn pld_config_fills_defaults() {
        let json = r#"{"discretization":{"value_discretization_interval":0.01}}"#;
        let config: PldAccountantConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(config.discretization.value_discretization_interval, 0.01);
        assert_eq!(config.discretization.log_mass_truncation_bound, -50.0);
        assert!(config.discretization.pessimistic_estimate);
    }
}
