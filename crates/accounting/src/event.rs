//! DP event descriptions.
//!
//! A [`DpEvent`] is pure data describing one privacy-relevant randomized
//! step. Events nest: sampling wraps a sub-event, and composition variants
//! collect events of any kind.

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use dp_ledger_core::{DpError, Result};

/// A composable description of a DP mechanism.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DpEvent {
    /// A step with no privacy cost.
    NoOp,
    /// A step with unbounded privacy loss.
    NonPrivate,
    /// A Gaussian mechanism with the given noise multiplier.
    Gaussian {
        /// Noise multiplier (standard deviation divided by sensitivity).
        noise_multiplier: f64,
    },
    /// A Laplace mechanism with the given noise multiplier.
    Laplace {
        /// Noise multiplier (scale divided by L1 sensitivity).
        noise_multiplier: f64,
    },
    /// Poisson subsampling applied to an inner event.
    PoissonSampled {
        /// Probability that each record is included.
        sampling_probability: f64,
        /// The inner event.
        event: Box<DpEvent>,
    },
    /// An ordered sequence of possibly heterogeneous events.
    Composed {
        /// The events, in application order.
        events: Vec<DpEvent>,
    },
    /// An event composed with itself multiple times.
    SelfComposed {
        /// The inner event.
        event: Box<DpEvent>,
        /// Number of compositions.
        count: NonZeroU64,
    },
}

impl DpEvent {
    /// Gaussian mechanism event.
    pub fn gaussian(noise_multiplier: f64) -> Self {
        Self::Gaussian { noise_multiplier }
    }

    /// Laplace mechanism event.
    pub fn laplace(noise_multiplier: f64) -> Self {
        Self::Laplace { noise_multiplier }
    }

    /// Poisson-sampled event; the probability must lie in `[0, 1]`.
    pub fn poisson_sampled(sampling_probability: f64, event: DpEvent) -> Result<Self> {
        validate_probability(sampling_probability)?;
        Ok(Self::PoissonSampled {
            sampling_probability,
            event: Box::new(event),
        })
    }

    /// Sequential composition of `events`.
    pub fn composed(events: Vec<DpEvent>) -> Self {
        Self::Composed { events }
    }

    /// `event` composed `count` times; `count` must be positive.
    pub fn self_composed(event: DpEvent, count: i64) -> Result<Self> {
        Ok(Self::SelfComposed {
            event: Box::new(event),
            count: positive_count(count)?,
        })
    }

    /// Short name of the variant, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            DpEvent::NoOp => "no_op",
            DpEvent::NonPrivate => "non_private",
            DpEvent::Gaussian { .. } => "gaussian",
            DpEvent::Laplace { .. } => "laplace",
            DpEvent::PoissonSampled { .. } => "poisson_sampled",
            DpEvent::Composed { .. } => "composed",
            DpEvent::SelfComposed { .. } => "self_composed",
        }
    }

    /// Recursively check the numeric parameters of every leaf.
    ///
    /// Events built through struct literals or deserialization bypass the
    /// constructors, so accountants run this before any composition work.
    pub fn validate(&self) -> Result<()> {
        match self {
            DpEvent::NoOp | DpEvent::NonPrivate => Ok(()),
            DpEvent::Gaussian { noise_multiplier } | DpEvent::Laplace { noise_multiplier } => {
                if !noise_multiplier.is_finite() || *noise_multiplier < 0.0 {
                    return Err(DpError::invalid(format!(
                        "noise multiplier must be finite and non-negative, got {noise_multiplier}"
                    )));
                }
                Ok(())
            }
            DpEvent::PoissonSampled {
                sampling_probability,
                event,
            } => {
                validate_probability(*sampling_probability)?;
                event.validate()
            }
            DpEvent::Composed { events } => events.iter().try_for_each(DpEvent::validate),
            DpEvent::SelfComposed { event, .. } => event.validate(),
        }
    }
}

/// Convert a caller-supplied composition count into a positive count.
pub fn positive_count(count: i64) -> Result<NonZeroU64> {
    u64::try_from(count)
        .ok()
        .and_then(NonZeroU64::new)
        .ok_or_else(|| DpError::invalid(format!("count must be positive, got {count}")))
}

fn validate_probability(sampling_probability: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&sampling_probability) {
        return Err(DpError::invalid(format!(
            "sampling probability must lie in [0, 1], got {sampling_probability}"
        )));
    }
    Ok(())
}

/// DP-SGD event: Poisson sampled Gaussian repeated `steps` times.
pub fn dpsgd_event(noise_multiplier: f64, steps: i64, sampling_probability: f64) -> Result<DpEvent> {
    let gaussian = DpEvent::gaussian(noise_multiplier);
    gaussian.validate()?;
    let sampled = DpEvent::poisson_sampled(sampling_probability, gaussian)?;
    DpEvent::self_composed(sampled, steps)
}

/// Accumulates composed events into a single compact ledger event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DpEventBuilder {
    entries: Vec<(DpEvent, u64)>,
}

impl DpEventBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `event` composed `count` times.
    pub fn compose(&mut self, event: &DpEvent, count: NonZeroU64) -> Result<()> {
        self.push(event, count.get())
    }

    fn push(&mut self, event: &DpEvent, count: u64) -> Result<()> {
        match event {
            DpEvent::NoOp => Ok(()),
            DpEvent::SelfComposed { event, count: inner } => {
                let total = count
                    .checked_mul(inner.get())
                    .ok_or_else(|| DpError::invalid("composition count overflows u64"))?;
                self.push(event, total)
            }
            DpEvent::Composed { events } if count == 1 => {
                events.iter().try_for_each(|e| self.push(e, 1))
            }
            _ => {
                if let Some((last, last_count)) = self.entries.last_mut() {
                    if last == event {
                        *last_count = last_count
                            .checked_add(count)
                            .ok_or_else(|| DpError::invalid("composition count overflows u64"))?;
                        return Ok(());
                    }
                }
                self.entries.push((event.clone(), count));
                Ok(())
            }
        }
    }

    /// Whether nothing with a privacy cost has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the event equivalent to everything recorded so far.
    pub fn build(&self) -> DpEvent {
        let mut events: Vec<DpEvent> = self
            .entries
            .iter()
            .map(|(event, count)| match NonZeroU64::new(*count) {
                Some(n) if n.get() > 1 => DpEvent::SelfComposed {
                    event: Box::new(event.clone()),
                    count: n,
                },
                _ => event.clone(),
            })
            .collect();
        match events.len() {
            0 => DpEvent::NoOp,
            1 => events.remove(0),
            _ => DpEvent::Composed { events },
        }
    }
}
