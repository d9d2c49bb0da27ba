//! Random noise sources for differential privacy mechanisms.
//!
//! Mechanisms never reach for a global generator: every call receives a
//! [`NoiseSource`], so tests can substitute fixed draws.

use rand::Rng;
use rand_distr::{Distribution, Geometric, Normal};

/// Source of the random draws consumed by the noise mechanisms.
pub trait NoiseSource {
    /// Draw `size` independent samples from `N(0, std_dev^2)`.
    fn gaussian(&mut self, std_dev: f64, size: usize) -> Vec<f64>;

    /// Draw one sample from the discrete Laplace distribution with
    /// `P(k) ∝ exp(-a * |k|)` over the integers.
    fn discrete_laplace(&mut self, a: f64) -> i64;
}

impl<N: NoiseSource + ?Sized> NoiseSource for &mut N {
    fn gaussian(&mut self, std_dev: f64, size: usize) -> Vec<f64> {
        (**self).gaussian(std_dev, size)
    }

    fn discrete_laplace(&mut self, a: f64) -> i64 {
        (**self).discrete_laplace(a)
    }
}

/// [`NoiseSource`] backed by any `rand` generator.
#[derive(Clone, Debug)]
pub struct RngNoise<R> {
    rng: R,
}

impl<R: Rng> RngNoise<R> {
    /// Wrap a generator.
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Recover the wrapped generator.
    pub fn into_inner(self) -> R {
        self.rng
    }
}

impl<R: Rng> NoiseSource for RngNoise<R> {
    fn gaussian(&mut self, std_dev: f64, size: usize) -> Vec<f64> {
        if !std_dev.is_finite() || std_dev <= 0.0 {
            return vec![0.0; size];
        }
        let dist = match Normal::new(0.0, std_dev) {
            Ok(d) => d,
            Err(_) => return vec![0.0; size],
        };
        (0..size).map(|_| dist.sample(&mut self.rng)).collect()
    }

    fn discrete_laplace(&mut self, a: f64) -> i64 {
        if a.is_infinite() || a.is_nan() || a <= 0.0 {
            return 0;
        }
        // The difference of two geometric failure counts with success
        // probability 1 - e^-a is discrete Laplace with parameter a.
        let p = -(-a).exp_m1();
        let dist = match Geometric::new(p) {
            Ok(d) => d,
            Err(_) => return 0,
        };
        let x = dist.sample(&mut self.rng);
        let y = dist.sample(&mut self.rng);
        (x as i64).saturating_sub(y as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_gaussian_deterministic() {
        let mut n1 = RngNoise::new(ChaCha8Rng::seed_from_u64(42));
        let mut n2 = RngNoise::new(ChaCha8Rng::seed_from_u64(42));
        assert_eq!(n1.gaussian(1.0, 100), n2.gaussian(1.0, 100));
    }

    #[test]
    fn test_gaussian_statistics() {
        let mut noise = RngNoise::new(ChaCha8Rng::seed_from_u64(123));
        let draws = noise.gaussian(1.0, 10_000);

        let mean: f64 = draws.iter().sum::<f64>() / draws.len() as f64;
        let var: f64 = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / draws.len() as f64;

        assert!(mean.abs() < 0.1);
        assert!((var - 1.0).abs() < 0.1);
    }

    #[test]
    fn zero_scale_gaussian_is_silent() {
        let mut noise = RngNoise::new(ChaCha8Rng::seed_from_u64(1));
        assert_eq!(noise.gaussian(0.0, 3), vec![0.0; 3]);
    }

    #[test]
    fn discrete_laplace_statistics() {
        let mut noise = RngNoise::new(ChaCha8Rng::seed_from_u64(7));
        let a = 0.5f64;
        let n = 20_000;
        let draws: Vec<i64> = (0..n).map(|_| noise.discrete_laplace(a)).collect();

        let mean = draws.iter().sum::<i64>() as f64 / n as f64;
        let var = draws.iter().map(|&k| (k as f64 - mean).powi(2)).sum::<f64>() / n as f64;
        // Var = 2 e^-a / (1 - e^-a)^2.
        let expected_var = 2.0 * (-a).exp() / (1.0 - (-a).exp()).powi(2);

        assert!(mean.abs() < 0.2);
        assert!((var - expected_var).abs() / expected_var < 0.1);
    }

    #[test]
    fn discrete_laplace_without_privacy_is_zero() {
        let mut noise = RngNoise::new(ChaCha8Rng::seed_from_u64(9));
        assert_eq!(noise.discrete_laplace(f64::INFINITY), 0);
    }
}
