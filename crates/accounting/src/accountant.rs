//! Ledger interface shared by the accounting families.

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use dp_ledger_core::{DpError, Result};

use crate::event::{positive_count, DpEvent};

/// Which pairs of datasets count as neighbors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighboringRelation {
    /// One record added or removed.
    #[default]
    AddOrRemoveOne,
    /// One record replaced by another.
    ReplaceOne,
}

impl NeighboringRelation {
    /// L2 sensitivity of a sum of records clipped to unit norm.
    pub fn sensitivity(self) -> f64 {
        match self {
            NeighboringRelation::AddOrRemoveOne => 1.0,
            NeighboringRelation::ReplaceOne => 2.0,
        }
    }
}

/// An append-only privacy ledger.
///
/// A ledger starts empty; queries before the first successful
/// [`compose`](PrivacyAccountant::compose) fail with
/// [`DpError::NotAccountedYet`].
pub trait PrivacyAccountant {
    /// Whether every leaf of `event` can be accounted by this family.
    fn supports(&self, event: &DpEvent) -> bool;

    /// Record `event` composed `count` times.
    ///
    /// Fails without changing the ledger if `count <= 0`, if the event has
    /// invalid parameters, or if it is not supported.
    fn compose(&mut self, event: &DpEvent, count: i64) -> Result<()>;

    /// Smallest delta certified at `target_epsilon`.
    fn get_delta(&self, target_epsilon: f64) -> Result<f64>;

    /// Smallest epsilon certified at `target_delta`.
    fn get_epsilon(&self, target_delta: f64) -> Result<f64>;

    /// Event equivalent to everything composed so far.
    fn ledger(&self) -> DpEvent;

    /// Whether at least one event has been composed.
    fn is_accounted(&self) -> bool;

    /// Neighboring relation the ledger accounts under.
    fn neighboring_relation(&self) -> NeighboringRelation;
}

impl<A: PrivacyAccountant + ?Sized> PrivacyAccountant for Box<A> {
    fn supports(&self, event: &DpEvent) -> bool {
        (**self).supports(event)
    }

    fn compose(&mut self, event: &DpEvent, count: i64) -> Result<()> {
        (**self).compose(event, count)
    }

    fn get_delta(&self, target_epsilon: f64) -> Result<f64> {
        (**self).get_delta(target_epsilon)
    }

    fn get_epsilon(&self, target_delta: f64) -> Result<f64> {
        (**self).get_epsilon(target_delta)
    }

    fn ledger(&self) -> DpEvent {
        (**self).ledger()
    }

    fn is_accounted(&self) -> bool {
        (**self).is_accounted()
    }

    fn neighboring_relation(&self) -> NeighboringRelation {
        (**self).neighboring_relation()
    }
}

/// Boundary checks run by every `compose` before any accounting work.
pub(crate) fn check_composable<A: PrivacyAccountant + ?Sized>(
    accountant: &A,
    family: &str,
    event: &DpEvent,
    count: i64,
) -> Result<NonZeroU64> {
    let count = positive_count(count)?;
    event.validate()?;
    if !accountant.supports(event) {
        return Err(DpError::unsupported(format!(
            "{family} accountant cannot account for {} event under {:?}",
            event.kind(),
            accountant.neighboring_relation()
        )));
    }
    Ok(count)
}

pub(crate) fn check_epsilon(epsilon: f64) -> Result<()> {
    if epsilon.is_nan() || epsilon < 0.0 {
        return Err(DpError::invalid(format!(
            "epsilon must be non-negative, got {epsilon}"
        )));
    }
    Ok(())
}

pub(crate) fn check_delta(delta: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&delta) {
        return Err(DpError::invalid(format!(
            "delta must lie in [0, 1], got {delta}"
        )));
    }
    Ok(())
}
