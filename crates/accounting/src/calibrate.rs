//! Calibration of mechanism parameters against a privacy target.

use serde::{Deserialize, Serialize};

use dp_ledger_core::{DpError, Result};

use crate::accountant::PrivacyAccountant;
use crate::accountants::DpAccountantConfig;
use crate::DpEvent;

const DEFAULT_TOLERANCE: f64 = 1e-4;
const MAX_BRACKET_EXPANSIONS: usize = 60;
const MAX_SEARCH_STEPS: usize = 200;

/// Search interval for [`calibrate_dp_mechanism`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BracketInterval {
    /// Both endpoints are known; `upper` must meet the target.
    Explicit {
        /// Smallest parameter considered.
        lower: f64,
        /// A parameter known to meet the target.
        upper: f64,
    },
    /// Only the lower endpoint is known; the distance to `initial_guess`
    /// doubles until the target is met.
    LowerEndpointAndGuess {
        /// Smallest parameter considered.
        lower: f64,
        /// First candidate for the upper endpoint.
        initial_guess: f64,
    },
}

impl BracketInterval {
    fn validate(&self) -> Result<()> {
        let (lower, upper) = match *self {
            BracketInterval::Explicit { lower, upper } => (lower, upper),
            BracketInterval::LowerEndpointAndGuess {
                lower,
                initial_guess,
            } => (lower, initial_guess),
        };
        if !lower.is_finite() || !upper.is_finite() || upper <= lower {
            return Err(DpError::invalid(format!(
                "bracket [{lower}, {upper}] must be finite and non-empty"
            )));
        }
        Ok(())
    }
}

/// Smallest parameter whose event meets `(target_epsilon, target_delta)`.
///
/// `make_event(p)` is composed once on a fresh accountant from `config`,
/// and epsilon is assumed non-increasing in `p` (a noise multiplier, say).
/// With `discrete` the search runs over integers. `tol` bounds the width of
/// the final interval for continuous searches.
pub fn calibrate_dp_mechanism<C, F>(
    config: &C,
    make_event: F,
    target_epsilon: f64,
    target_delta: f64,
    bracket: BracketInterval,
    discrete: bool,
    tol: Option<f64>,
) -> Result<f64>
where
    C: DpAccountantConfig,
    F: Fn(f64) -> DpEvent,
{
    if !target_epsilon.is_finite() || target_epsilon < 0.0 {
        return Err(DpError::invalid(format!(
            "target epsilon must be finite and >= 0, got {target_epsilon}"
        )));
    }
    if !(0.0..=1.0).contains(&target_delta) {
        return Err(DpError::invalid(format!(
            "target delta must lie in [0, 1], got {target_delta}"
        )));
    }
    bracket.validate()?;
    let tol = match tol {
        Some(t) if t.is_finite() && t > 0.0 => t,
        Some(t) => {
            return Err(DpError::invalid(format!(
                "tolerance must be positive, got {t}"
            )))
        }
        None => DEFAULT_TOLERANCE,
    };

    let meets_target = |param: f64| -> Result<bool> {
        let mut accountant = config.create_accountant();
        accountant.compose(&make_event(param), 1)?;
        Ok(accountant.get_epsilon(target_delta)? <= target_epsilon)
    };
    let snap = |x: f64| if discrete { x.ceil() } else { x };

    let (mut lo, mut hi) = match bracket {
        BracketInterval::Explicit { lower, upper } => {
            let (lo, hi) = (snap(lower), snap(upper));
            if !meets_target(hi)? {
                return Err(DpError::invalid(format!(
                    "upper end of bracket {hi} does not reach the target"
                )));
            }
            (lo, hi)
        }
        BracketInterval::LowerEndpointAndGuess {
            lower,
            initial_guess,
        } => {
            let lo = snap(lower);
            let mut width = (initial_guess - lower).max(if discrete { 1.0 } else { 0.0 });
            let mut hi = snap(lower + width);
            let mut expansions = 0usize;
            while !meets_target(hi)? {
                expansions += 1;
                if expansions > MAX_BRACKET_EXPANSIONS || !hi.is_finite() {
                    return Err(DpError::invalid(
                        "failed to bracket a parameter achieving the target epsilon",
                    ));
                }
                width *= 2.0;
                hi = snap(lower + width);
            }
            (lo, hi)
        }
    };

    if meets_target(lo)? {
        return Ok(lo);
    }

    // Invariant: lo misses the target and hi meets it.
    let mut steps = 0usize;
    loop {
        let done = if discrete {
            hi - lo <= 1.0
        } else {
            hi - lo <= tol
        };
        if done || steps >= MAX_SEARCH_STEPS {
            break;
        }
        let mid = if discrete {
            (0.5 * (lo + hi)).floor()
        } else {
            0.5 * (lo + hi)
        };
        if meets_target(mid)? {
            hi = mid;
        } else {
            lo = mid;
        }
        steps += 1;
    }

    tracing::debug!(
        parameter = hi,
        steps,
        target_epsilon,
        target_delta,
        "calibrated mechanism parameter"
    );
    Ok(hi)
}
