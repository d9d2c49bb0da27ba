//! Ledger backed by a cumulative privacy loss distribution.

use dp_ledger_core::{DpError, Result};

use crate::accountant::{
    check_composable, check_delta, check_epsilon, NeighboringRelation, PrivacyAccountant,
};
use crate::accountants::PldAccountantConfig;
use crate::event::{DpEvent, DpEventBuilder};
use crate::pld::PrivacyLossDistribution;

#[derive(Clone, Copy, Debug)]
enum AdditiveNoise {
    Gaussian,
    Laplace,
}

/// PLD-based privacy accountant.
#[derive(Clone, Debug)]
pub struct PldAccountant {
    config: PldAccountantConfig,
    ledger: DpEventBuilder,
    pld: Option<PrivacyLossDistribution>,
    contains_non_dp_event: bool,
}

impl Default for PldAccountant {
    fn default() -> Self {
        Self::new()
    }
}

impl PldAccountant {
    /// Create an accountant with the default configuration.
    pub fn new() -> Self {
        Self::with_config(PldAccountantConfig::default())
    }

    /// Create an accountant with an explicit configuration.
    pub fn with_config(config: PldAccountantConfig) -> Self {
        Self {
            config,
            ledger: DpEventBuilder::new(),
            pld: None,
            contains_non_dp_event: false,
        }
    }

    /// Configuration the accountant was built with.
    pub fn config(&self) -> &PldAccountantConfig {
        &self.config
    }

    /// Cumulative distribution, once something has been composed.
    pub fn pld(&self) -> Option<&PrivacyLossDistribution> {
        self.pld.as_ref()
    }

    /// Distribution of `event` composed `count` times.
    fn event_pld(
        &self,
        event: &DpEvent,
        count: u64,
        non_private: &mut bool,
    ) -> Result<PrivacyLossDistribution> {
        let params = &self.config.discretization;
        match event {
            DpEvent::NoOp => Ok(PrivacyLossDistribution::identity(params)),
            DpEvent::NonPrivate => {
                *non_private = true;
                Ok(PrivacyLossDistribution::identity(params))
            }
            DpEvent::Gaussian { noise_multiplier } => self.mechanism_pld(
                AdditiveNoise::Gaussian,
                *noise_multiplier,
                1.0,
                count,
                non_private,
            ),
            DpEvent::Laplace { noise_multiplier } => self.mechanism_pld(
                AdditiveNoise::Laplace,
                *noise_multiplier,
                1.0,
                count,
                non_private,
            ),
            DpEvent::PoissonSampled {
                sampling_probability,
                event,
            } => {
                let noise = match **event {
                    DpEvent::Gaussian { noise_multiplier } => {
                        (AdditiveNoise::Gaussian, noise_multiplier)
                    }
                    DpEvent::Laplace { noise_multiplier } => {
                        (AdditiveNoise::Laplace, noise_multiplier)
                    }
                    _ => {
                        return Err(DpError::unsupported(format!(
                            "poisson sampling of a {} event",
                            event.kind()
                        )))
                    }
                };
                self.mechanism_pld(noise.0, noise.1, *sampling_probability, count, non_private)
            }
            DpEvent::Composed { events } => {
                let mut composed = PrivacyLossDistribution::identity(params);
                for inner in events {
                    let next = self.event_pld(inner, 1, non_private)?;
                    composed = composed.compose(&next)?;
                }
                if count == 1 {
                    Ok(composed)
                } else {
                    composed.self_compose(count)
                }
            }
            DpEvent::SelfComposed {
                event,
                count: inner,
            } => {
                let total = count
                    .checked_mul(inner.get())
                    .ok_or_else(|| DpError::invalid("composition count overflows u64"))?;
                self.event_pld(event, total, non_private)
            }
        }
    }

    fn mechanism_pld(
        &self,
        noise: AdditiveNoise,
        noise_multiplier: f64,
        sampling_probability: f64,
        count: u64,
        non_private: &mut bool,
    ) -> Result<PrivacyLossDistribution> {
        let params = &self.config.discretization;
        if sampling_probability == 0.0 {
            return Ok(PrivacyLossDistribution::identity(params));
        }
        if noise_multiplier == 0.0 {
            *non_private = true;
            return Ok(PrivacyLossDistribution::identity(params));
        }
        let sensitivity = self.config.neighboring_relation.sensitivity();
        let pld = match noise {
            AdditiveNoise::Gaussian => PrivacyLossDistribution::from_gaussian_mechanism(
                noise_multiplier,
                sensitivity,
                sampling_probability,
                params,
            )?,
            AdditiveNoise::Laplace => PrivacyLossDistribution::from_laplace_mechanism(
                noise_multiplier,
                sensitivity,
                sampling_probability,
                params,
            )?,
        };
        if count == 1 {
            Ok(pld)
        } else {
            pld.self_compose(count)
        }
    }

    fn accounted_pld(&self) -> Result<&PrivacyLossDistribution> {
        self.pld.as_ref().ok_or(DpError::NotAccountedYet)
    }
}

impl PrivacyAccountant for PldAccountant {
    fn supports(&self, event: &DpEvent) -> bool {
        match event {
            DpEvent::NoOp
            | DpEvent::NonPrivate
            | DpEvent::Gaussian { .. }
            | DpEvent::Laplace { .. } => true,
            DpEvent::PoissonSampled { event, .. } => {
                self.config.neighboring_relation == NeighboringRelation::AddOrRemoveOne
                    && matches!(**event, DpEvent::Gaussian { .. } | DpEvent::Laplace { .. })
            }
            DpEvent::Composed { events } => events.iter().all(|e| self.supports(e)),
            DpEvent::SelfComposed { event, .. } => self.supports(event),
        }
    }

    fn compose(&mut self, event: &DpEvent, count: i64) -> Result<()> {
        let count = check_composable(self, "PLD", event, count)?;

        let mut non_private = self.contains_non_dp_event;
        let event_pld = self.event_pld(event, count.get(), &mut non_private)?;
        let cumulative = match &self.pld {
            Some(current) => current.compose(&event_pld)?,
            None => event_pld,
        };
        let mut ledger = self.ledger.clone();
        ledger.compose(event, count)?;

        self.ledger = ledger;
        self.pld = Some(cumulative);
        self.contains_non_dp_event = non_private;
        tracing::debug!(
            family = "pld",
            event = event.kind(),
            count = count.get(),
            non_private,
            "composed event"
        );
        Ok(())
    }

    fn get_delta(&self, target_epsilon: f64) -> Result<f64> {
        check_epsilon(target_epsilon)?;
        let pld = self.accounted_pld()?;
        if self.contains_non_dp_event {
            return Ok(1.0);
        }
        Ok(pld.get_delta_for_epsilon(target_epsilon))
    }

    fn get_epsilon(&self, target_delta: f64) -> Result<f64> {
        check_delta(target_delta)?;
        let pld = self.accounted_pld()?;
        if self.contains_non_dp_event {
            return Ok(f64::INFINITY);
        }
        Ok(pld.get_epsilon_for_delta(target_delta))
    }

    fn ledger(&self) -> DpEvent {
        self.ledger.build()
    }

    fn is_accounted(&self) -> bool {
        self.pld.is_some()
    }

    fn neighboring_relation(&self) -> NeighboringRelation {
        self.config.neighboring_relation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pld::DiscretizationParams;

    fn coarse() -> PldAccountant {
        PldAccountant::with_config(PldAccountantConfig {
            discretization: DiscretizationParams::default()
                .with_value_discretization_interval(1e-3),
            ..PldAccountantConfig::default()
        })
    }

    #[test]
    fn queries_before_compose_fail() {
        let acct = PldAccountant::new();
        assert!(!acct.is_accounted());
        assert_eq!(acct.get_delta(1.0), Err(DpError::NotAccountedYet));
        assert_eq!(acct.get_epsilon(1e-5), Err(DpError::NotAccountedYet));
        assert_eq!(acct.ledger(), DpEvent::NoOp);
    }

    #[test]
    fn non_positive_count_is_rejected_without_side_effects() {
        let mut acct = coarse();
        for count in [0, -1] {
            let err = acct.compose(&DpEvent::gaussian(1.0), count).unwrap_err();
            assert!(matches!(err, DpError::InvalidArgument { .. }));
        }
        assert!(!acct.is_accounted());
    }

    #[test]
    fn replace_one_rejects_poisson_sampling() {
        let mut acct = PldAccountant::with_config(
            PldAccountantConfig::default()
                .with_neighboring_relation(NeighboringRelation::ReplaceOne),
        );
        let event = DpEvent::poisson_sampled(0.1, DpEvent::gaussian(1.0)).expect("event");
        assert!(!acct.supports(&event));
        let err = acct.compose(&event, 1).unwrap_err();
        assert!(matches!(err, DpError::UnsupportedEvent { .. }));
        assert!(acct.supports(&DpEvent::gaussian(1.0)));
    }

    #[test]
    fn sampled_composition_is_unsupported() {
        let acct = coarse();
        let nested = DpEvent::PoissonSampled {
            sampling_probability: 0.5,
            event: Box::new(DpEvent::composed(vec![DpEvent::gaussian(1.0)])),
        };
        assert!(!acct.supports(&nested));
    }

    #[test]
    fn zero_noise_makes_ledger_non_private() {
        let mut acct = coarse();
        acct.compose(&DpEvent::gaussian(0.0), 1).expect("compose");
        assert_eq!(acct.get_delta(10.0), Ok(1.0));
        assert_eq!(acct.get_epsilon(0.5), Ok(f64::INFINITY));
    }

    #[test]
    fn zero_sampling_is_free() {
        let mut acct = coarse();
        let event = DpEvent::poisson_sampled(0.0, DpEvent::gaussian(0.1)).expect("event");
        acct.compose(&event, 5).expect("compose");
        assert_eq!(acct.get_delta(0.0), Ok(0.0));
    }

    #[test]
    fn ledger_records_composed_events() {
        let mut acct = coarse();
        let g = DpEvent::gaussian(2.0);
        acct.compose(&g, 1).expect("compose");
        acct.compose(&g, 2).expect("compose");
        assert_eq!(acct.ledger(), DpEvent::self_composed(g, 3).expect("event"));
    }

    #[test]
    fn heterogeneous_composition_order_does_not_matter() {
        let sampled = DpEvent::poisson_sampled(0.3, DpEvent::gaussian(1.0)).expect("event");
        let plain = DpEvent::laplace(3.0);

        let mut ab = coarse();
        ab.compose(&sampled, 1).expect("compose");
        ab.compose(&plain, 1).expect("compose");
        let mut ba = coarse();
        ba.compose(&plain, 1).expect("compose");
        ba.compose(&sampled, 1).expect("compose");

        for eps in [0.1, 0.5, 1.0] {
            let d_ab = ab.get_delta(eps).expect("delta");
            let d_ba = ba.get_delta(eps).expect("delta");
            assert!((d_ab - d_ba).abs() < 1e-9);
        }
    }

    #[test]
    fn invalid_queries_are_rejected() {
        let mut acct = coarse();
        acct.compose(&DpEvent::gaussian(1.0), 1).expect("compose");
        assert!(acct.get_delta(-1.0).is_err());
        assert!(acct.get_epsilon(1.5).is_err());
    }
}
