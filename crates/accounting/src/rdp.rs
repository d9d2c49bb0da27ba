//! Rényi Differential Privacy accounting.

use std::f64::consts::{PI, SQRT_2};

use dp_ledger_core::{DpError, Result};
use statrs::function::erf::erfc;

use crate::accountant::{
    check_composable, check_delta, check_epsilon, NeighboringRelation, PrivacyAccountant,
};
use crate::accountants::RdpAccountantConfig;
use crate::event::{DpEvent, DpEventBuilder};

/// Cap on the terms of the fractional-order series.
const MAX_SERIES_TERMS: usize = 100_000;

/// RDP accountant for privacy composition.
#[derive(Clone, Debug)]
pub struct RdpAccountant {
    orders: Vec<f64>,
    rdp: Vec<f64>,
    log_factorials: Vec<f64>,
    neighboring_relation: NeighboringRelation,
    ledger: DpEventBuilder,
    accounted: bool,
}

impl Default for RdpAccountant {
    fn default() -> Self {
        Self::new()
    }
}

impl RdpAccountant {
    /// Create an accountant with default Rényi orders.
    pub fn new() -> Self {
        Self::with_config(&RdpAccountantConfig::default())
    }

    /// Create an accountant from a configuration.
    ///
    /// Orders that are not finite or not above 1 are dropped; if none
    /// remain the default orders are used.
    pub fn with_config(config: &RdpAccountantConfig) -> Self {
        let mut orders: Vec<f64> = config
            .orders
            .iter()
            .copied()
            .filter(|&a| a.is_finite() && a > 1.0)
            .collect();
        orders.sort_by(|a, b| a.total_cmp(b));
        orders.dedup_by(|a, b| (*a - *b).abs() < 1e-12);

        if orders.is_empty() {
            orders = default_orders();
        }

        let max_alpha = max_order_ceil(&orders);
        let log_factorials = precompute_log_factorials(max_alpha);
        let rdp = vec![0.0; orders.len()];
        Self {
            orders,
            rdp,
            log_factorials,
            neighboring_relation: config.neighboring_relation,
            ledger: DpEventBuilder::new(),
            accounted: false,
        }
    }

    /// Orders the RDP curve is tracked at.
    pub fn orders(&self) -> &[f64] {
        &self.orders
    }

    /// Accumulated RDP at each order.
    pub fn rdp(&self) -> &[f64] {
        &self.rdp
    }

    /// RDP increment of `event` composed `count` times, per order.
    fn event_rdp(&self, event: &DpEvent, count: f64, increment: &mut [f64]) -> Result<()> {
        match event {
            DpEvent::NoOp => Ok(()),
            DpEvent::NonPrivate => {
                increment.fill(f64::INFINITY);
                Ok(())
            }
            DpEvent::Gaussian { noise_multiplier } => {
                self.add_gaussian(*noise_multiplier, 1.0, count, increment);
                Ok(())
            }
            DpEvent::PoissonSampled {
                sampling_probability,
                event,
            } => match **event {
                DpEvent::Gaussian { noise_multiplier } => {
                    self.add_gaussian(noise_multiplier, *sampling_probability, count, increment);
                    Ok(())
                }
                _ => Err(DpError::unsupported(format!(
                    "poisson sampling of a {} event",
                    event.kind()
                ))),
            },
            DpEvent::Composed { events } => events
                .iter()
                .try_for_each(|e| self.event_rdp(e, count, increment)),
            DpEvent::SelfComposed {
                event,
                count: inner,
            } => self.event_rdp(event, count * inner.get() as f64, increment),
            DpEvent::Laplace { .. } => Err(DpError::unsupported(
                "RDP accounting of the Laplace mechanism",
            )),
        }
    }

    fn add_gaussian(&self, noise_multiplier: f64, q: f64, count: f64, increment: &mut [f64]) {
        if q == 0.0 {
            return;
        }
        if noise_multiplier == 0.0 {
            increment.fill(f64::INFINITY);
            return;
        }
        // Sensitivity 2 at noise sigma is sensitivity 1 at sigma / 2.
        let sigma = noise_multiplier / self.neighboring_relation.sensitivity();
        for (slot, &alpha) in increment.iter_mut().zip(&self.orders) {
            let step = rdp_gaussian_subsampled(alpha, sigma, q, &self.log_factorials);
            *slot += if step.is_finite() {
                step * count
            } else {
                f64::INFINITY
            };
        }
    }

    fn ensure_accounted(&self) -> Result<()> {
        if self.accounted {
            Ok(())
        } else {
            Err(DpError::NotAccountedYet)
        }
    }
}

impl PrivacyAccountant for RdpAccountant {
    fn supports(&self, event: &DpEvent) -> bool {
        match event {
            DpEvent::NoOp | DpEvent::NonPrivate | DpEvent::Gaussian { .. } => true,
            DpEvent::Laplace { .. } => false,
            DpEvent::PoissonSampled { event, .. } => {
                self.neighboring_relation == NeighboringRelation::AddOrRemoveOne
                    && matches!(**event, DpEvent::Gaussian { .. })
            }
            DpEvent::Composed { events } => events.iter().all(|e| self.supports(e)),
            DpEvent::SelfComposed { event, .. } => self.supports(event),
        }
    }

    fn compose(&mut self, event: &DpEvent, count: i64) -> Result<()> {
        let count = check_composable(self, "RDP", event, count)?;

        let mut increment = vec![0.0; self.orders.len()];
        self.event_rdp(event, count.get() as f64, &mut increment)?;
        let mut ledger = self.ledger.clone();
        ledger.compose(event, count)?;

        for (total, step) in self.rdp.iter_mut().zip(increment) {
            *total += step;
        }
        self.ledger = ledger;
        self.accounted = true;
        tracing::debug!(
            family = "rdp",
            event = event.kind(),
            count = count.get(),
            "composed event"
        );
        Ok(())
    }

    fn get_delta(&self, target_epsilon: f64) -> Result<f64> {
        check_epsilon(target_epsilon)?;
        self.ensure_accounted()?;
        Ok(compute_delta(&self.orders, &self.rdp, target_epsilon))
    }

    fn get_epsilon(&self, target_delta: f64) -> Result<f64> {
        check_delta(target_delta)?;
        self.ensure_accounted()?;
        Ok(compute_epsilon(&self.orders, &self.rdp, target_delta))
    }

    fn ledger(&self) -> DpEvent {
        self.ledger.build()
    }

    fn is_accounted(&self) -> bool {
        self.accounted
    }

    fn neighboring_relation(&self) -> NeighboringRelation {
        self.neighboring_relation
    }
}

/// Smallest epsilon over all orders, using the conversion of Canonne,
/// Kamath and Steinke.
fn compute_epsilon(orders: &[f64], rdp: &[f64], delta: f64) -> f64 {
    let best = orders
        .iter()
        .zip(rdp)
        .map(|(&a, &r)| {
            if delta * delta + (-r).exp_m1() > 0.0 {
                // delta <= sqrt(1 - exp(-KL)) already holds.
                0.0
            } else if a > 1.01 {
                r + (-1.0 / a).ln_1p() - (delta * a).ln() / (a - 1.0)
            } else {
                f64::INFINITY
            }
        })
        .fold(f64::INFINITY, f64::min);
    best.max(0.0)
}

/// Smallest delta over all orders.
fn compute_delta(orders: &[f64], rdp: &[f64], epsilon: f64) -> f64 {
    let best = orders
        .iter()
        .zip(rdp)
        .map(|(&a, &r)| {
            let mut log_delta = if r == 0.0 {
                f64::NEG_INFINITY
            } else {
                0.5 * (-(-r).exp()).ln_1p()
            };
            // Unstable as the order approaches 1.
            if a > 1.01 {
                let rdp_bound = (a - 1.0) * (r - epsilon + (-1.0 / a).ln_1p()) - a.ln();
                log_delta = log_delta.min(rdp_bound);
            }
            log_delta
        })
        .fold(f64::INFINITY, f64::min);
    best.exp().min(1.0)
}

/// Default Rényi orders.
///
/// `linspace(1.01, 8, 50)`, then every integer in `8..64`, then
/// `linspace(65, 512, 10)` rounded to integers.
pub fn default_orders() -> Vec<f64> {
    let mut orders = Vec::new();

    orders.extend(linspace(1.01, 8.0, 50));
    for a in 8..64 {
        orders.push(a as f64);
    }
    for a in linspace(65.0, 512.0, 10) {
        orders.push(a.round());
    }

    orders
}

fn linspace(start: f64, end: f64, num: usize) -> Vec<f64> {
    if num == 0 {
        return Vec::new();
    }
    if num == 1 {
        return vec![start];
    }
    let step = (end - start) / (num as f64 - 1.0);
    (0..num).map(|i| start + step * i as f64).collect()
}

fn max_order_ceil(orders: &[f64]) -> usize {
    orders
        .iter()
        .copied()
        .map(|a| a.ceil() as usize)
        .max()
        .unwrap_or(0)
}

fn precompute_log_factorials(max_alpha: usize) -> Vec<f64> {
    let mut log_fact = vec![0.0; max_alpha.saturating_add(1)];
    for i in 1..log_fact.len() {
        log_fact[i] = log_fact[i - 1] + (i as f64).ln();
    }
    log_fact
}

/// RDP of the Poisson subsampled Gaussian mechanism with unit sensitivity.
fn rdp_gaussian_subsampled(alpha: f64, sigma: f64, q: f64, log_fact: &[f64]) -> f64 {
    if q == 0.0 {
        return 0.0;
    }
    if q == 1.0 {
        return alpha / (2.0 * sigma * sigma);
    }

    if is_integer(alpha) {
        let a = alpha.round() as usize;
        return log_a_term(q, sigma, a, log_fact) / (alpha - 1.0);
    }

    log_a_frac(q, sigma, alpha) / (alpha - 1.0)
}

fn is_integer(x: f64) -> bool {
    (x - x.round()).abs() < 1e-12
}

/// `ln(A_alpha)` for integer alpha.
fn log_a_term(q: f64, sigma: f64, alpha: usize, log_fact: &[f64]) -> f64 {
    if alpha >= log_fact.len() {
        return f64::INFINITY;
    }
    let log_q = q.ln();
    let log_1mq = (-q).ln_1p();
    let sigma_sq = sigma * sigma;
    let alpha_f = alpha as f64;

    (0..=alpha).fold(f64::NEG_INFINITY, |log_sum, j| {
        let j_f = j as f64;
        let log_binom = log_fact[alpha] - log_fact[j] - log_fact[alpha - j];
        let log_prob = j_f * log_q + (alpha_f - j_f) * log_1mq;
        let log_exp = j_f * (j_f - 1.0) / (2.0 * sigma_sq);
        log_add_exp(log_sum, log_binom + log_prob + log_exp)
    })
}

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

/// `ln(e^a - e^b)`; NaN when `b > a`.
fn log_sub_exp(a: f64, b: f64) -> f64 {
    if b == f64::NEG_INFINITY {
        return a;
    }
    if b > a {
        return f64::NAN;
    }
    if a == b {
        return f64::NEG_INFINITY;
    }
    a + (-(b - a).exp_m1()).ln()
}

/// `ln(erfc(x))`, switching to the asymptotic series once `erfc` underflows.
fn log_erfc(x: f64) -> f64 {
    let r = erfc(x);
    if r > 0.0 {
        return r.ln();
    }
    -0.5 * PI.ln() - x.ln() - x * x - 0.5 * x.powi(-2) + 0.625 * x.powi(-4)
        - 37.0 / 24.0 * x.powi(-6)
        + 353.0 / 64.0 * x.powi(-8)
}

/// `ln(A_alpha)` for fractional alpha (Mironov, Talwar and Zhang 2019).
///
/// Splits the integral at `z0` and sums both halves of the binomial series
/// until the terms drop below `e^-30`. A series that does not settle gives
/// `+inf`.
fn log_a_frac(q: f64, sigma: f64, alpha: f64) -> f64 {
    let log_q = q.ln();
    let log_1mq = (-q).ln_1p();
    let sigma_sq = sigma * sigma;
    let z0 = sigma_sq * (1.0 / q - 1.0).ln() + 0.5;
    let scale = SQRT_2 * sigma;

    let mut log_a0 = f64::NEG_INFINITY;
    let mut log_a1 = f64::NEG_INFINITY;
    // |binom(alpha, i)| in log space, and its sign.
    let mut log_coef = 0.0;
    let mut positive = true;
    for i in 0..MAX_SERIES_TERMS {
        let i_f = i as f64;
        let j = alpha - i_f;
        let log_t0 = log_coef + i_f * log_q + j * log_1mq;
        let log_t1 = log_coef + j * log_q + i_f * log_1mq;
        let log_e0 = 0.5f64.ln() + log_erfc((i_f - z0) / scale);
        let log_e1 = 0.5f64.ln() + log_erfc((z0 - j) / scale);
        let log_s0 = log_t0 + (i_f * i_f - i_f) / (2.0 * sigma_sq) + log_e0;
        let log_s1 = log_t1 + (j * j - j) / (2.0 * sigma_sq) + log_e1;
        if positive {
            log_a0 = log_add_exp(log_a0, log_s0);
            log_a1 = log_add_exp(log_a1, log_s1);
        } else {
            log_a0 = log_sub_exp(log_a0, log_s0);
            log_a1 = log_sub_exp(log_a1, log_s1);
        }
        if log_s0.max(log_s1) < -30.0 {
            return log_add_exp(log_a0, log_a1);
        }
        log_coef += j.abs().ln() - (i_f + 1.0).ln();
        if j < 0.0 {
            positive = !positive;
        }
    }
    f64::INFINITY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::dpsgd_event;

    #[test]
    fn single_sampled_step_is_finite() {
        let mut acc = RdpAccountant::new();
        let event = dpsgd_event(1.0, 1, 0.01).expect("event");
        acc.compose(&event, 1).expect("compose");
        let eps = acc.get_epsilon(1e-5).expect("epsilon");
        assert!(eps.is_finite());
        assert!(eps > 0.0);
    }

    #[test]
    fn epsilon_increases_with_steps() {
        let mut acc = RdpAccountant::new();
        let event = dpsgd_event(1.0, 1, 0.01).expect("event");
        acc.compose(&event, 1).expect("compose");
        let eps1 = acc.get_epsilon(1e-5).expect("epsilon");
        acc.compose(&event, 1).expect("compose");
        let eps2 = acc.get_epsilon(1e-5).expect("epsilon");
        assert!(eps2 > eps1);
    }

    #[test]
    fn default_orders_cover_large_alphas() {
        let orders = default_orders();
        let max = orders
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, |a, b| a.max(b));
        assert!(max >= 512.0);
        assert!(orders.iter().any(|&a| (a - 1.01).abs() < 1e-9));
    }

    #[test]
    fn count_matches_repeated_compose() {
        let event = DpEvent::poisson_sampled(0.02, DpEvent::gaussian(1.3)).expect("event");
        let mut a = RdpAccountant::new();
        let mut b = RdpAccountant::new();
        for _ in 0..5 {
            a.compose(&event, 1).expect("compose");
        }
        b.compose(&event, 5).expect("compose");

        let eps_a = a.get_epsilon(1e-6).expect("epsilon");
        let eps_b = b.get_epsilon(1e-6).expect("epsilon");
        assert!((eps_a - eps_b).abs() < 1e-9);
    }

    #[test]
    fn unsampled_gaussian_rdp_is_linear_in_order() {
        let mut acc = RdpAccountant::with_config(&RdpAccountantConfig::new(vec![2.0, 10.0]));
        acc.compose(&DpEvent::gaussian(2.0), 3).expect("compose");
        assert!((acc.rdp()[0] - 3.0 * 2.0 / 8.0).abs() < 1e-12);
        assert!((acc.rdp()[1] - 3.0 * 10.0 / 8.0).abs() < 1e-12);
    }

    #[test]
    fn replace_one_doubles_sensitivity() {
        let config = RdpAccountantConfig::new(vec![2.0])
            .with_neighboring_relation(NeighboringRelation::ReplaceOne);
        let mut acc = RdpAccountant::with_config(&config);
        acc.compose(&DpEvent::gaussian(2.0), 1).expect("compose");
        // alpha * 4 / (2 sigma^2)
        assert!((acc.rdp()[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn laplace_is_unsupported() {
        let mut acc = RdpAccountant::new();
        let err = acc.compose(&DpEvent::laplace(1.0), 1).unwrap_err();
        assert!(matches!(err, DpError::UnsupportedEvent { .. }));
        assert!(!acc.is_accounted());
    }

    #[test]
    fn non_private_event_saturates() {
        let mut acc = RdpAccountant::new();
        acc.compose(&DpEvent::NonPrivate, 1).expect("compose");
        assert_eq!(acc.get_epsilon(1e-5), Ok(f64::INFINITY));
        assert_eq!(acc.get_delta(1.0), Ok(1.0));
    }

    #[test]
    fn queries_require_a_composition() {
        let acc = RdpAccountant::new();
        assert_eq!(acc.get_epsilon(1e-5), Err(DpError::NotAccountedYet));
    }

    #[test]
    fn fractional_order_matches_numeric_integration() {
        // D_1.5 and D_2.5 of the q = 0.5, sigma = 1 mixture, integrated numerically.
        let log_fact = precompute_log_factorials(8);
        let d15 = rdp_gaussian_subsampled(1.5, 1.0, 0.5, &log_fact);
        assert!((d15 - 0.235158).abs() < 1e-5, "d15 = {d15}");
        let d25 = rdp_gaussian_subsampled(2.5, 1.0, 0.5, &log_fact);
        assert!((d25 - 0.510560).abs() < 1e-5, "d25 = {d25}");
    }

    #[test]
    fn fractional_series_agrees_at_integer_orders() {
        let log_fact = precompute_log_factorials(8);
        for (q, sigma) in [(0.5, 1.0), (0.01, 1.1), (0.2, 0.7)] {
            let frac = log_a_frac(q, sigma, 3.0);
            let int = log_a_term(q, sigma, 3, &log_fact);
            assert!((frac - int).abs() < 1e-9, "{frac} vs {int}");
        }
    }

    #[test]
    fn default_orders_bound_total_variation() {
        // At epsilon 0, delta is the total variation distance,
        // 0.5 * (2 Phi(0.5) - 1) for this mixture.
        let mut acc = RdpAccountant::new();
        let event = DpEvent::poisson_sampled(0.5, DpEvent::gaussian(1.0)).expect("event");
        acc.compose(&event, 1).expect("compose");
        let delta = acc.get_delta(0.0).expect("delta");
        assert!(delta >= 0.1914, "delta = {delta}");
    }

    #[test]
    fn delta_and_epsilon_conversions_agree() {
        let mut acc = RdpAccountant::new();
        acc.compose(&dpsgd_event(1.1, 100, 0.01).expect("event"), 1)
            .expect("compose");
        let eps = acc.get_epsilon(1e-5).expect("epsilon");
        let delta = acc.get_delta(eps).expect("delta");
        assert!(delta <= 1e-5 * (1.0 + 1e-6));
    }
}
