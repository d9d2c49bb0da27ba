//! Privacy Loss Distribution (PLD) representation and composition.
//!
//! A mechanism's privacy loss is discretized onto a grid of width
//! `value_discretization_interval` and stored densely, separately for the
//! "remove" and "add" directions of the neighboring relation when the two
//! differ (Poisson subsampling breaks the symmetry). Composition is FFT
//! convolution of the dense arrays followed by tail truncation.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Laplace, Normal};

use dp_ledger_core::{DpError, Result};

const DEFAULT_VALUE_DISCRETIZATION_INTERVAL: f64 = 1e-4;
const DEFAULT_LOG_MASS_TRUNCATION_BOUND: f64 = -50.0;
const DEFAULT_TAIL_MASS_TRUNCATION: f64 = 1e-15;

/// Largest number of grid buckets a single mechanism may discretize into.
const MAX_GRID_BUCKETS: f64 = 1e7;
/// Relative tolerance of the epsilon search.
const EPSILON_SEARCH_TOLERANCE: f64 = 1e-9;
const MAX_EPSILON_SEARCH_STEPS: usize = 200;
const MAX_TRUNCATION_SEARCH_STEPS: usize = 200;

/// Grid and truncation settings shared by every PLD that is composed
/// together.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscretizationParams {
    /// Width of one bucket on the privacy loss axis.
    pub value_discretization_interval: f64,
    /// Log of the noise mass cut from each tail before discretizing.
    pub log_mass_truncation_bound: f64,
    /// Mass trimmed from the tails after each convolution.
    pub tail_mass_truncation: f64,
    /// Round losses up (a valid upper bound) instead of down.
    pub pessimistic_estimate: bool,
}

impl Default for DiscretizationParams {
    fn default() -> Self {
        Self {
            value_discretization_interval: DEFAULT_VALUE_DISCRETIZATION_INTERVAL,
            log_mass_truncation_bound: DEFAULT_LOG_MASS_TRUNCATION_BOUND,
            tail_mass_truncation: DEFAULT_TAIL_MASS_TRUNCATION,
            pessimistic_estimate: true,
        }
    }
}

impl DiscretizationParams {
    /// Use a different grid width.
    pub fn with_value_discretization_interval(mut self, interval: f64) -> Self {
        self.value_discretization_interval = interval;
        self
    }

    /// Use a different post-convolution tail truncation.
    pub fn with_tail_mass_truncation(mut self, tail_mass_truncation: f64) -> Self {
        self.tail_mass_truncation = tail_mass_truncation;
        self
    }

    /// Round losses down instead of up.
    pub fn with_pessimistic_estimate(mut self, pessimistic_estimate: bool) -> Self {
        self.pessimistic_estimate = pessimistic_estimate;
        self
    }

    /// Check that the settings describe a usable grid.
    pub fn validate(&self) -> Result<()> {
        let interval = self.value_discretization_interval;
        if !interval.is_finite() || interval <= 0.0 {
            return Err(DpError::invalid(format!(
                "value discretization interval must be positive, got {interval}"
            )));
        }
        let bound = self.log_mass_truncation_bound;
        if !bound.is_finite() || bound >= 0.0 {
            return Err(DpError::invalid(format!(
                "log mass truncation bound must be negative, got {bound}"
            )));
        }
        if !(0.0..1.0).contains(&self.tail_mass_truncation) {
            return Err(DpError::invalid(format!(
                "tail mass truncation must lie in [0, 1), got {}",
                self.tail_mass_truncation
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AdjacencyType {
    Add,
    Remove,
}

#[derive(Clone, Copy, Debug)]
enum NoiseDistribution {
    Gaussian { sigma: f64, normal: Normal },
    Laplace { scale: f64, laplace: Laplace },
}

impl NoiseDistribution {
    fn gaussian(sigma: f64) -> Result<Self> {
        let normal = Normal::new(0.0, sigma)
            .map_err(|e| DpError::invalid(format!("gaussian noise with sigma {sigma}: {e}")))?;
        Ok(Self::Gaussian { sigma, normal })
    }

    fn laplace(scale: f64) -> Result<Self> {
        let laplace = Laplace::new(0.0, scale)
            .map_err(|e| DpError::invalid(format!("laplace noise with scale {scale}: {e}")))?;
        Ok(Self::Laplace { scale, laplace })
    }

    fn cdf(&self, x: f64) -> f64 {
        match self {
            Self::Gaussian { normal, .. } => normal.cdf(x),
            Self::Laplace { laplace, .. } => laplace.cdf(x),
        }
    }

    /// `ln(p(x + s) / p(x))`.
    fn base_privacy_loss(&self, x: f64, sensitivity: f64) -> f64 {
        match self {
            Self::Gaussian { sigma, .. } => {
                sensitivity * (-0.5 * sensitivity - x) / (sigma * sigma)
            }
            Self::Laplace { scale, .. } => (x.abs() - (x + sensitivity).abs()) / scale,
        }
    }

    /// Inverse of [`Self::base_privacy_loss`] on its strictly decreasing part.
    fn inverse_base_privacy_loss(&self, loss: f64, sensitivity: f64) -> f64 {
        match self {
            Self::Gaussian { sigma, .. } => -0.5 * sensitivity - loss * sigma * sigma / sensitivity,
            Self::Laplace { scale, .. } => {
                (-0.5 * (loss * scale + sensitivity)).clamp(-sensitivity, 0.0)
            }
        }
    }
}

/// Numerically stable `ln(e^a + e^b)`.
fn log_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    if a > b {
        a + (b - a).exp().ln_1p()
    } else {
        b + (a - b).exp().ln_1p()
    }
}

#[derive(Clone, Debug)]
struct TailPrivacyLossDistribution {
    lower_x_truncation: f64,
    upper_x_truncation: f64,
    tail_mass: Vec<(f64, f64)>,
}

/// Privacy loss of an additive noise mechanism, optionally Poisson
/// subsampled.
///
/// For `Remove`, `mu_upper = (1 - q) N + q (N - s)` and `mu_lower = N`; for
/// `Add`, `mu_upper = N` and `mu_lower = (1 - q) N + q (N + s)`. The loss
/// `ln(mu_upper(x) / mu_lower(x))` is decreasing in `x`.
#[derive(Clone, Debug)]
struct AdditiveNoisePrivacyLoss {
    noise: NoiseDistribution,
    sensitivity: f64,
    sampling_prob: f64,
    adjacency_type: AdjacencyType,
    pessimistic_estimate: bool,
    log_mass_truncation_bound: f64,
}

impl AdditiveNoisePrivacyLoss {
    fn is_subsampled(&self) -> bool {
        self.sampling_prob < 1.0
    }

    fn privacy_loss_remove(&self, x: f64) -> f64 {
        let loss = self.noise.base_privacy_loss(x, self.sensitivity);
        if !self.is_subsampled() {
            return loss;
        }
        let q = self.sampling_prob;
        log_add_exp(q.ln() + loss, (-q).ln_1p())
    }

    fn inverse_privacy_loss_remove(&self, loss: f64) -> f64 {
        if !self.is_subsampled() {
            return self.noise.inverse_base_privacy_loss(loss, self.sensitivity);
        }
        let q = self.sampling_prob;
        if loss <= (-q).ln_1p() {
            return f64::INFINITY;
        }
        let base_loss = (loss.exp_m1() + q).ln() - q.ln();
        self.noise.inverse_base_privacy_loss(base_loss, self.sensitivity)
    }

    fn privacy_loss(&self, x: f64) -> f64 {
        match self.adjacency_type {
            AdjacencyType::Remove => self.privacy_loss_remove(x),
            AdjacencyType::Add => -self.privacy_loss_remove(-x),
        }
    }

    fn inverse_privacy_loss(&self, loss: f64) -> f64 {
        match self.adjacency_type {
            AdjacencyType::Remove => self.inverse_privacy_loss_remove(loss),
            AdjacencyType::Add => -self.inverse_privacy_loss_remove(-loss),
        }
    }

    fn mu_upper_cdf(&self, x: f64) -> f64 {
        match self.adjacency_type {
            AdjacencyType::Add => self.noise.cdf(x),
            AdjacencyType::Remove => {
                let shifted = self.noise.cdf(x + self.sensitivity);
                if !self.is_subsampled() {
                    return shifted;
                }
                (1.0 - self.sampling_prob) * self.noise.cdf(x) + self.sampling_prob * shifted
            }
        }
    }

    fn privacy_loss_tail(&self) -> Result<TailPrivacyLossDistribution> {
        match self.noise {
            NoiseDistribution::Gaussian { normal, .. } => self.gaussian_tail(&normal),
            NoiseDistribution::Laplace { .. } => Ok(self.laplace_tail()),
        }
    }

    fn gaussian_tail(&self, normal: &Normal) -> Result<TailPrivacyLossDistribution> {
        let tail_mass = 0.5 * self.log_mass_truncation_bound.exp();
        let z = normal.inverse_cdf(tail_mass);
        if !z.is_finite() {
            return Err(DpError::numerical("gaussian truncation point is not finite"));
        }
        let upper_x_truncation = -z;
        let lower_x_truncation = match self.adjacency_type {
            AdjacencyType::Add => z,
            AdjacencyType::Remove => {
                // mu_upper_cdf is increasing and crosses tail_mass in [z - s, z].
                let mut lo = z - self.sensitivity;
                let mut hi = z;
                for _ in 0..MAX_TRUNCATION_SEARCH_STEPS {
                    if hi - lo <= 1e-9 * (1.0 + hi.abs()) {
                        break;
                    }
                    let mid = 0.5 * (lo + hi);
                    if self.mu_upper_cdf(mid) < tail_mass {
                        lo = mid;
                    } else {
                        hi = mid;
                    }
                }
                lo
            }
        };

        let tail_mass = if self.pessimistic_estimate {
            vec![
                (f64::INFINITY, self.mu_upper_cdf(lower_x_truncation)),
                (
                    self.privacy_loss(upper_x_truncation),
                    1.0 - self.mu_upper_cdf(upper_x_truncation),
                ),
            ]
        } else {
            vec![(
                self.privacy_loss(lower_x_truncation),
                self.mu_upper_cdf(lower_x_truncation),
            )]
        };
        Ok(TailPrivacyLossDistribution {
            lower_x_truncation,
            upper_x_truncation,
            tail_mass,
        })
    }

    /// Laplace losses are constant outside an interval of width `s`, so the
    /// tails are exact point masses.
    fn laplace_tail(&self) -> TailPrivacyLossDistribution {
        let (lower_x_truncation, upper_x_truncation) = match self.adjacency_type {
            AdjacencyType::Add => (0.0, self.sensitivity),
            AdjacencyType::Remove => (-self.sensitivity, 0.0),
        };
        TailPrivacyLossDistribution {
            lower_x_truncation,
            upper_x_truncation,
            tail_mass: vec![
                (
                    self.privacy_loss(lower_x_truncation),
                    self.mu_upper_cdf(lower_x_truncation),
                ),
                (
                    self.privacy_loss(upper_x_truncation),
                    1.0 - self.mu_upper_cdf(upper_x_truncation),
                ),
            ],
        }
    }

    fn discretize(&self, interval: f64) -> Result<PldPmf> {
        let tail = self.privacy_loss_tail()?;
        let top_loss = self.privacy_loss(tail.lower_x_truncation);
        let bottom_loss = self.privacy_loss(tail.upper_x_truncation);
        let span = (top_loss - bottom_loss) / interval;
        if !span.is_finite() || span > MAX_GRID_BUCKETS {
            return Err(DpError::numerical(format!(
                "privacy loss range [{bottom_loss}, {top_loss}] needs too many buckets at interval {interval}"
            )));
        }

        let mut grid = LossGrid::new(
            (bottom_loss / interval).floor() as i64 - 1,
            (top_loss / interval).ceil() as i64 + 1,
        );
        let mut infinity_mass = 0.0;
        for (loss, mass) in tail.tail_mass.iter().copied() {
            if mass <= 0.0 {
                continue;
            }
            if loss.is_infinite() {
                infinity_mass += mass;
                continue;
            }
            grid.add(round_loss(loss, interval, self.pessimistic_estimate), mass);
        }

        // Sweep x upwards; each step covers the x whose loss falls in one
        // bucket [k * interval, (k + 1) * interval].
        let mut lower_x = tail.lower_x_truncation;
        let mut lower_cdf = self.mu_upper_cdf(lower_x);
        let mut rounded_down = (top_loss / interval).floor() as i64;
        let offset = i64::from(self.pessimistic_estimate);
        while lower_x < tail.upper_x_truncation {
            let upper_x = tail
                .upper_x_truncation
                .min(self.inverse_privacy_loss(interval * rounded_down as f64));
            let upper_cdf = self.mu_upper_cdf(upper_x);
            let mass = upper_cdf - lower_cdf;
            if mass > 0.0 {
                grid.add(rounded_down + offset, mass);
            }
            lower_x = upper_x;
            lower_cdf = upper_cdf;
            rounded_down -= 1;
        }

        Ok(grid.into_pmf(interval, infinity_mass, self.pessimistic_estimate))
    }
}

/// Dense accumulator for the buckets of one discretization.
struct LossGrid {
    lower: i64,
    probs: Vec<f64>,
}

impl LossGrid {
    fn new(lower: i64, upper: i64) -> Self {
        let len = usize::try_from(upper - lower + 1).unwrap_or(1).max(1);
        Self {
            lower,
            probs: vec![0.0; len],
        }
    }

    fn add(&mut self, idx: i64, mass: f64) {
        if idx < self.lower {
            let grow = (self.lower - idx) as usize;
            self.probs.splice(0..0, std::iter::repeat(0.0).take(grow));
            self.lower = idx;
        }
        let pos = (idx - self.lower) as usize;
        if pos >= self.probs.len() {
            self.probs.resize(pos + 1, 0.0);
        }
        self.probs[pos] += mass;
    }

    /// Drop empty buckets at both ends.
    fn into_pmf(
        self,
        discretization: f64,
        infinity_mass: f64,
        pessimistic_estimate: bool,
    ) -> PldPmf {
        let first = self.probs.iter().position(|&p| p > 0.0);
        let last = self.probs.iter().rposition(|&p| p > 0.0);
        let (lower_loss, probs) = match (first, last) {
            (Some(first), Some(last)) => (self.lower + first as i64, self.probs[first..=last].to_vec()),
            _ => (0, vec![0.0]),
        };
        PldPmf {
            discretization,
            lower_loss,
            probs,
            infinity_mass,
            pessimistic_estimate,
        }
    }
}

fn round_loss(loss: f64, interval: f64, pessimistic: bool) -> i64 {
    if pessimistic {
        (loss / interval).ceil() as i64
    } else {
        (loss / interval).floor() as i64
    }
}

/// Dense probability mass function over the loss grid.
#[derive(Clone, Debug)]
struct PldPmf {
    discretization: f64,
    lower_loss: i64,
    probs: Vec<f64>,
    infinity_mass: f64,
    pessimistic_estimate: bool,
}

impl PldPmf {
    fn identity(discretization: f64, pessimistic_estimate: bool) -> Self {
        Self {
            discretization,
            lower_loss: 0,
            probs: vec![1.0],
            infinity_mass: 0.0,
            pessimistic_estimate,
        }
    }

    fn size(&self) -> usize {
        self.probs.len()
    }

    fn loss_at(&self, idx: usize) -> f64 {
        (self.lower_loss + idx as i64) as f64 * self.discretization
    }

    fn max_loss(&self) -> f64 {
        self.loss_at(self.size() - 1)
    }

    fn validate_composable(&self, other: &Self) -> Result<()> {
        if (self.discretization - other.discretization).abs() > 1e-12 {
            return Err(DpError::invalid(format!(
                "discretization intervals differ: {} vs {}",
                self.discretization, other.discretization
            )));
        }
        if self.pessimistic_estimate != other.pessimistic_estimate {
            return Err(DpError::invalid(
                "cannot compose pessimistic and optimistic estimates",
            ));
        }
        Ok(())
    }

    /// Trim up to `tail_mass_truncation / 2` from each end of `probs`.
    ///
    /// Returns the index of the first kept bucket, the kept buckets, and the
    /// mass to add to the infinity bucket.
    fn truncate_tails(&self, probs: Vec<f64>, tail_mass_truncation: f64) -> (usize, Vec<f64>, f64) {
        if tail_mass_truncation <= 0.0 || probs.len() <= 1 {
            return (0, probs, 0.0);
        }
        let half = 0.5 * tail_mass_truncation;

        let mut left_idx = 0usize;
        let mut left_mass = 0.0;
        while left_idx + 1 < probs.len() && left_mass + probs[left_idx] <= half {
            left_mass += probs[left_idx];
            left_idx += 1;
        }

        let mut right_idx = probs.len();
        let mut right_mass = 0.0;
        while right_idx > left_idx + 1 && right_mass + probs[right_idx - 1] <= half {
            right_mass += probs[right_idx - 1];
            right_idx -= 1;
        }

        let mut kept = probs[left_idx..right_idx].to_vec();
        if self.pessimistic_estimate {
            kept[0] += left_mass;
            (left_idx, kept, right_mass)
        } else {
            let last = kept.len() - 1;
            kept[last] += right_mass;
            (left_idx, kept, 0.0)
        }
    }

    fn convolve(a: &[f64], b: &[f64]) -> Vec<f64> {
        if a.len() == 1 {
            return b.iter().map(|x| x * a[0]).collect();
        }
        if b.len() == 1 {
            return a.iter().map(|x| x * b[0]).collect();
        }

        let n = a.len() + b.len() - 1;
        let size = n.next_power_of_two();

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(size);
        let ifft = planner.plan_fft_inverse(size);

        let mut fa = vec![Complex::new(0.0, 0.0); size];
        let mut fb = vec![Complex::new(0.0, 0.0); size];
        for (slot, &val) in fa.iter_mut().zip(a) {
            slot.re = val;
        }
        for (slot, &val) in fb.iter_mut().zip(b) {
            slot.re = val;
        }
        fft.process(&mut fa);
        fft.process(&mut fb);
        for (a_i, b_i) in fa.iter_mut().zip(fb.iter()) {
            *a_i *= *b_i;
        }
        ifft.process(&mut fa);

        // FFT round-off can leave tiny negative masses.
        let scale = 1.0 / size as f64;
        fa[..n].iter().map(|c| (c.re * scale).max(0.0)).collect()
    }

    fn compose(&self, other: &Self, tail_mass_truncation: f64) -> Result<Self> {
        self.validate_composable(other)?;
        let probs = Self::convolve(&self.probs, &other.probs);
        let infinity_mass =
            self.infinity_mass + other.infinity_mass - self.infinity_mass * other.infinity_mass;
        let (offset, truncated, right_tail) = self.truncate_tails(probs, tail_mass_truncation);
        Ok(Self {
            discretization: self.discretization,
            lower_loss: self.lower_loss + other.lower_loss + offset as i64,
            probs: truncated,
            infinity_mass: (infinity_mass + right_tail).min(1.0),
            pessimistic_estimate: self.pessimistic_estimate,
        })
    }

    /// Repeated squaring; agrees with `count` sequential compositions up to
    /// truncation.
    fn self_compose(&self, count: u64, tail_mass_truncation: f64) -> Result<Self> {
        let mut result = PldPmf::identity(self.discretization, self.pessimistic_estimate);
        let mut base = self.clone();
        let mut n = count;
        while n > 0 {
            if n % 2 == 1 {
                result = result.compose(&base, tail_mass_truncation)?;
            }
            n /= 2;
            if n > 0 {
                base = base.compose(&base, tail_mass_truncation)?;
            }
        }
        Ok(result)
    }

    /// `infinity_mass + sum over loss > eps of (1 - e^(eps - loss)) * p`.
    fn get_delta_for_epsilon(&self, epsilon: f64) -> f64 {
        let mut delta = self.infinity_mass;
        if epsilon.is_infinite() && epsilon > 0.0 {
            return delta.clamp(0.0, 1.0);
        }
        let first = ((epsilon / self.discretization).floor() as i64)
            .saturating_sub(self.lower_loss)
            .clamp(0, self.size() as i64) as usize;
        for (i, prob) in self.probs.iter().enumerate().skip(first) {
            let loss = self.loss_at(i);
            if loss > epsilon {
                delta += -(epsilon - loss).exp_m1() * prob;
            }
        }
        delta.clamp(0.0, 1.0)
    }
}

/// Discretized privacy loss distribution of a (composed) mechanism.
///
/// Values are immutable: composition returns a new distribution.
#[derive(Clone, Debug)]
pub struct PrivacyLossDistribution {
    params: DiscretizationParams,
    pmf_remove: PldPmf,
    pmf_add: Option<PldPmf>,
}

impl PrivacyLossDistribution {
    /// Distribution of a mechanism that reveals nothing.
    pub fn identity(params: &DiscretizationParams) -> Self {
        Self {
            params: *params,
            pmf_remove: PldPmf::identity(
                params.value_discretization_interval,
                params.pessimistic_estimate,
            ),
            pmf_add: None,
        }
    }

    /// Gaussian mechanism with optional Poisson subsampling.
    pub fn from_gaussian_mechanism(
        standard_deviation: f64,
        sensitivity: f64,
        sampling_prob: f64,
        params: &DiscretizationParams,
    ) -> Result<Self> {
        let noise = NoiseDistribution::gaussian(standard_deviation)?;
        Self::from_additive_noise(noise, sensitivity, sampling_prob, params)
    }

    /// Laplace mechanism with optional Poisson subsampling.
    pub fn from_laplace_mechanism(
        parameter: f64,
        sensitivity: f64,
        sampling_prob: f64,
        params: &DiscretizationParams,
    ) -> Result<Self> {
        let noise = NoiseDistribution::laplace(parameter)?;
        Self::from_additive_noise(noise, sensitivity, sampling_prob, params)
    }

    fn from_additive_noise(
        noise: NoiseDistribution,
        sensitivity: f64,
        sampling_prob: f64,
        params: &DiscretizationParams,
    ) -> Result<Self> {
        params.validate()?;
        if !sensitivity.is_finite() || sensitivity <= 0.0 {
            return Err(DpError::invalid(format!(
                "sensitivity must be positive and finite, got {sensitivity}"
            )));
        }
        if !(0.0..=1.0).contains(&sampling_prob) {
            return Err(DpError::invalid(format!(
                "sampling probability must lie in [0, 1], got {sampling_prob}"
            )));
        }
        if sampling_prob == 0.0 {
            return Ok(Self::identity(params));
        }

        let make = |adjacency_type: AdjacencyType| {
            AdditiveNoisePrivacyLoss {
                noise,
                sensitivity,
                sampling_prob,
                adjacency_type,
                pessimistic_estimate: params.pessimistic_estimate,
                log_mass_truncation_bound: params.log_mass_truncation_bound,
            }
            .discretize(params.value_discretization_interval)
        };

        let pmf_remove = make(AdjacencyType::Remove)?;
        // Without subsampling the add and remove losses coincide.
        let pmf_add = if sampling_prob < 1.0 {
            Some(make(AdjacencyType::Add)?)
        } else {
            None
        };
        tracing::debug!(
            buckets = pmf_remove.size(),
            infinity_mass = pmf_remove.infinity_mass,
            symmetric = pmf_add.is_none(),
            "discretized privacy loss"
        );
        Ok(Self {
            params: *params,
            pmf_remove,
            pmf_add,
        })
    }

    /// Settings this distribution was discretized with.
    pub fn params(&self) -> &DiscretizationParams {
        &self.params
    }

    /// Whether the add and remove directions share one distribution.
    pub fn is_symmetric(&self) -> bool {
        self.pmf_add.is_none()
    }

    /// Mass at infinite privacy loss (worst direction).
    pub fn infinity_mass(&self) -> f64 {
        self.pmfs()
            .map(|pmf| pmf.infinity_mass)
            .fold(0.0, f64::max)
    }

    fn pmfs(&self) -> impl Iterator<Item = &PldPmf> {
        std::iter::once(&self.pmf_remove).chain(self.pmf_add.as_ref())
    }

    /// Distribution of running both mechanisms.
    pub fn compose(&self, other: &Self) -> Result<Self> {
        let tail = self.params.tail_mass_truncation;
        let pmf_remove = self.pmf_remove.compose(&other.pmf_remove, tail)?;
        let pmf_add = match (&self.pmf_add, &other.pmf_add) {
            (None, None) => None,
            (a, b) => {
                let a = a.as_ref().unwrap_or(&self.pmf_remove);
                let b = b.as_ref().unwrap_or(&other.pmf_remove);
                Some(a.compose(b, tail)?)
            }
        };
        Ok(Self {
            params: self.params,
            pmf_remove,
            pmf_add,
        })
    }

    /// Distribution of running this mechanism `count` times.
    pub fn self_compose(&self, count: u64) -> Result<Self> {
        if count == 0 {
            return Err(DpError::invalid("count must be positive, got 0"));
        }
        let tail = self.params.tail_mass_truncation;
        let pmf_remove = self.pmf_remove.self_compose(count, tail)?;
        let pmf_add = match &self.pmf_add {
            Some(add) => Some(add.self_compose(count, tail)?),
            None => None,
        };
        Ok(Self {
            params: self.params,
            pmf_remove,
            pmf_add,
        })
    }

    /// Smallest delta for which the mechanism is `(epsilon, delta)`-DP.
    pub fn get_delta_for_epsilon(&self, epsilon: f64) -> f64 {
        self.pmfs()
            .map(|pmf| pmf.get_delta_for_epsilon(epsilon))
            .fold(0.0, f64::max)
    }

    /// Smallest epsilon for which the mechanism is `(epsilon, delta)`-DP.
    ///
    /// Bisects the non-increasing delta curve; the returned epsilon always
    /// satisfies `get_delta_for_epsilon(epsilon) <= delta`.
    pub fn get_epsilon_for_delta(&self, delta: f64) -> f64 {
        if self.infinity_mass() > delta {
            return f64::INFINITY;
        }
        if self.get_delta_for_epsilon(0.0) <= delta {
            return 0.0;
        }
        // No finite loss exceeds the largest grid value, so delta there is
        // the infinity mass.
        let mut hi = self.pmfs().map(PldPmf::max_loss).fold(0.0, f64::max);
        let mut lo = 0.0;
        for _ in 0..MAX_EPSILON_SEARCH_STEPS {
            if hi - lo <= EPSILON_SEARCH_TOLERANCE * hi.max(1.0) {
                break;
            }
            let mid = 0.5 * (lo + hi);
            if self.get_delta_for_epsilon(mid) <= delta {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        hi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coarse() -> DiscretizationParams {
        DiscretizationParams::default().with_value_discretization_interval(1e-3)
    }

    fn total_mass(pmf: &PldPmf) -> f64 {
        pmf.probs.iter().sum::<f64>() + pmf.infinity_mass
    }

    #[test]
    fn gaussian_pmf_has_unit_mass() {
        let pld = PrivacyLossDistribution::from_gaussian_mechanism(1.0, 1.0, 1.0, &coarse())
            .expect("pld");
        assert!(pld.is_symmetric());
        assert!((total_mass(&pld.pmf_remove) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn subsampled_gaussian_keeps_unsampled_mass() {
        let pld = PrivacyLossDistribution::from_gaussian_mechanism(0.5, 1.0, 0.2, &coarse())
            .expect("pld");
        assert!(!pld.is_symmetric());
        for pmf in pld.pmfs() {
            assert!((total_mass(pmf) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn single_gaussian_delta_matches_closed_form() {
        let pld = PrivacyLossDistribution::from_gaussian_mechanism(
            1.0,
            1.0,
            1.0,
            &DiscretizationParams::default(),
        )
        .expect("pld");
        let delta = pld.get_delta_for_epsilon(1.0);
        let exact = dp_ledger_core::gaussian_mechanism_delta(1.0, 1.0, 1.0);
        // Pessimistic rounding only ever overestimates.
        assert!(delta >= exact - 1e-9);
        assert!(delta - exact < 1e-3);
    }

    #[test]
    fn laplace_delta_vanishes_at_its_epsilon() {
        // Laplace with scale b is (1/b, 0)-DP.
        let pld = PrivacyLossDistribution::from_laplace_mechanism(2.0, 1.0, 1.0, &coarse())
            .expect("pld");
        assert!(pld.get_delta_for_epsilon(0.5 + 2e-3) < 1e-12);
        assert!(pld.get_delta_for_epsilon(0.25) > 0.0);
        let eps = pld.get_epsilon_for_delta(0.0);
        assert!((eps - 0.5).abs() <= 2e-3, "eps = {eps}");
    }

    #[test]
    fn composition_is_commutative() {
        let params = coarse();
        let a = PrivacyLossDistribution::from_gaussian_mechanism(0.8, 1.0, 0.3, &params)
            .expect("pld");
        let b = PrivacyLossDistribution::from_laplace_mechanism(1.5, 1.0, 1.0, &params)
            .expect("pld");
        let ab = a.compose(&b).expect("compose");
        let ba = b.compose(&a).expect("compose");
        for eps in [0.0, 0.5, 1.0, 2.0] {
            let d_ab = ab.get_delta_for_epsilon(eps);
            let d_ba = ba.get_delta_for_epsilon(eps);
            assert!((d_ab - d_ba).abs() < 1e-9);
        }
    }

    #[test]
    fn self_compose_matches_sequential() {
        let params = coarse();
        let pld = PrivacyLossDistribution::from_gaussian_mechanism(1.2, 1.0, 0.2, &params)
            .expect("pld");
        let fast = pld.self_compose(5).expect("self compose");
        let mut slow = pld.clone();
        for _ in 1..5 {
            slow = slow.compose(&pld).expect("compose");
        }
        for eps in [0.25, 0.5, 1.0] {
            let d_fast = fast.get_delta_for_epsilon(eps);
            let d_slow = slow.get_delta_for_epsilon(eps);
            assert!((d_fast - d_slow).abs() < 1e-6);
        }
    }

    #[test]
    fn epsilon_search_certifies_delta() {
        let pld = PrivacyLossDistribution::from_gaussian_mechanism(1.0, 1.0, 0.5, &coarse())
            .expect("pld")
            .self_compose(3)
            .expect("self compose");
        for delta in [1e-6, 1e-3, 0.1] {
            let eps = pld.get_epsilon_for_delta(delta);
            assert!(eps.is_finite());
            assert!(pld.get_delta_for_epsilon(eps) <= delta);
        }
    }

    #[test]
    fn mismatched_grids_do_not_compose() {
        let a = PrivacyLossDistribution::from_gaussian_mechanism(1.0, 1.0, 1.0, &coarse())
            .expect("pld");
        let b = PrivacyLossDistribution::from_gaussian_mechanism(
            1.0,
            1.0,
            1.0,
            &coarse().with_value_discretization_interval(2e-3),
        )
        .expect("pld");
        assert!(a.compose(&b).is_err());
    }

    #[test]
    fn zero_sampling_is_identity() {
        let pld = PrivacyLossDistribution::from_gaussian_mechanism(1.0, 1.0, 0.0, &coarse())
            .expect("pld");
        assert_eq!(pld.get_delta_for_epsilon(0.0), 0.0);
        assert_eq!(pld.get_epsilon_for_delta(0.0), 0.0);
    }

    #[test]
    fn oversized_grid_is_rejected_before_allocating() {
        let err = PrivacyLossDistribution::from_gaussian_mechanism(
            0.005,
            1.0,
            1.0,
            &DiscretizationParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DpError::NumericalError { .. }));
    }

    #[test]
    fn loss_grid_grows_and_trims() {
        let mut grid = LossGrid::new(0, 3);
        grid.add(2, 0.25);
        grid.add(-2, 0.5);
        grid.add(6, 0.25);
        let pmf = grid.into_pmf(0.1, 0.0, true);
        assert_eq!(pmf.lower_loss, -2);
        assert_eq!(pmf.size(), 9);
        assert_eq!(pmf.probs[0], 0.5);
        assert_eq!(pmf.probs[4], 0.25);
        assert_eq!(pmf.probs[8], 0.25);
        assert!((total_mass(&pmf) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn truncation_moves_right_tail_to_infinity() {
        let pmf = PldPmf {
            discretization: 1.0,
            lower_loss: 0,
            probs: vec![0.1, 0.4, 0.4, 0.1],
            infinity_mass: 0.0,
            pessimistic_estimate: true,
        };
        let (offset, kept, right) = pmf.truncate_tails(pmf.probs.clone(), 0.2);
        assert_eq!(offset, 1);
        assert!((kept[0] - 0.5).abs() < 1e-12);
        assert_eq!(kept.len(), 2);
        assert!((right - 0.1).abs() < 1e-12);
    }
}
