//! Laplace mechanism for differential privacy
//!
//! Noise with scale `b = sensitivity / epsilon` is drawn as the difference of
//! two independent exponentials with mean `b`, which is Laplace(0, b).

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Exp1;

use crate::error::{Error, Result};

/// Adds calibrated Laplace noise to scalars
#[derive(Debug)]
pub struct LaplaceMechanism {
    epsilon: f64,
    rng: Mutex<StdRng>,
}

impl LaplaceMechanism {
    /// Create a mechanism with the given privacy budget
    pub fn new(epsilon: f64) -> Result<Self> {
        Self::with_rng(epsilon, StdRng::from_entropy())
    }

    /// Create a mechanism with a fixed seed (for reproducibility)
    pub fn with_seed(epsilon: f64, seed: u64) -> Result<Self> {
        Self::with_rng(epsilon, StdRng::seed_from_u64(seed))
    }

    fn with_rng(epsilon: f64, rng: StdRng) -> Result<Self> {
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(Error::InvalidPrivacyBudget(epsilon));
        }
        Ok(Self {
            epsilon,
            rng: Mutex::new(rng),
        })
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Noise scale for a given sensitivity
    pub fn scale(&self, sensitivity: f64) -> f64 {
        sensitivity.abs() / self.epsilon
    }

    /// Return `value` plus Laplace noise calibrated to `sensitivity`
    pub fn noise(&self, value: f64, sensitivity: f64) -> f64 {
        let scale = self.scale(sensitivity);
        if scale == 0.0 {
            return value;
        }

        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let a: f64 = rng.sample(Exp1);
        let b: f64 = rng.sample(Exp1);
        value + scale * (a - b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: usize = 20_000;

    fn empirical(mechanism: &LaplaceMechanism, value: f64, sensitivity: f64) -> (f64, f64) {
        let samples: Vec<f64> = (0..SAMPLES)
            .map(|_| mechanism.noise(value, sensitivity))
            .collect();
        let mean = samples.iter().sum::<f64>() / SAMPLES as f64;
        // E|X - v| = b for Laplace(v, b)
        let mad = samples.iter().map(|x| (x - value).abs()).sum::<f64>() / SAMPLES as f64;
        (mean, mad)
    }

    #[test]
    fn test_rejects_invalid_budget() {
        assert!(matches!(
            LaplaceMechanism::new(0.0),
            Err(Error::InvalidPrivacyBudget(_))
        ));
        assert!(LaplaceMechanism::new(-1.0).is_err());
        assert!(LaplaceMechanism::new(f64::NAN).is_err());
        assert!(LaplaceMechanism::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_noise_centered_with_expected_scale() {
        let mechanism = LaplaceMechanism::with_seed(1.0, 42).unwrap();
        let (mean, mad) = empirical(&mechanism, 3.0, 1.0);
        assert!((mean - 3.0).abs() < 0.05, "mean was {}", mean);
        assert!((mad - 1.0).abs() < 0.05, "scale was {}", mad);
    }

    #[test]
    fn test_scale_grows_as_budget_shrinks() {
        let mechanism = LaplaceMechanism::with_seed(0.5, 7).unwrap();
        assert_eq!(mechanism.scale(10.0), 20.0);
        let (mean, mad) = empirical(&mechanism, 0.0, 10.0);
        assert!(mean.abs() < 1.0, "mean was {}", mean);
        assert!((mad - 20.0).abs() < 1.0, "scale was {}", mad);
    }

    #[test]
    fn test_zero_sensitivity_is_exact() {
        let mechanism = LaplaceMechanism::with_seed(1.0, 1).unwrap();
        assert_eq!(mechanism.noise(0.3, 0.0), 0.3);
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let a = LaplaceMechanism::with_seed(1.0, 99).unwrap();
        let b = LaplaceMechanism::with_seed(1.0, 99).unwrap();
        for _ in 0..10 {
            assert_eq!(a.noise(1.0, 5.0), b.noise(1.0, 5.0));
        }
    }
}
