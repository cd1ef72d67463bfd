//! Running statistics for a single context dimension

use serde::{Deserialize, Serialize};

use super::clamp_unit;

/// Welford running mean/variance plus observed range for one dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub count: u64,
    pub mean: f64,
    /// Sum of squared deviations from the mean (Welford's M2)
    m2: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for FeatureStats {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl FeatureStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one raw sample into the running statistics
    pub fn observe(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Sample variance; zero until two samples exist
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Whether enough samples exist to trust the observed range
    pub fn is_scaling(&self, min_samples: u64) -> bool {
        self.count >= min_samples && self.max > self.min
    }

    /// Rescale a raw value into [0, 1]
    ///
    /// Uses the observed min/max once `min_samples` samples exist and the
    /// range is non-degenerate; otherwise the raw value is clamped.
    pub fn normalize(&self, value: f64, min_samples: u64) -> f64 {
        if self.is_scaling(min_samples) {
            clamp_unit((value - self.min) / (self.max - self.min))
        } else {
            clamp_unit(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welford_matches_two_pass() {
        let samples = [0.2, 0.4, 0.4, 0.6, 0.9, 0.1, 0.3];
        let mut stats = FeatureStats::new();
        for s in samples {
            stats.observe(s);
        }

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1.0);

        assert_eq!(stats.count, 7);
        assert!((stats.mean - mean).abs() < 1e-12);
        assert!((stats.variance() - var).abs() < 1e-12);
        assert_eq!(stats.min, 0.1);
        assert_eq!(stats.max, 0.9);
    }

    #[test]
    fn test_normalize_raw_phase_clamps() {
        let mut stats = FeatureStats::new();
        for _ in 0..5 {
            stats.observe(0.3);
        }
        assert_eq!(stats.normalize(0.3, 10), 0.3);
        assert_eq!(stats.normalize(1.7, 10), 1.0);
        assert_eq!(stats.normalize(-0.2, 10), 0.0);
    }

    #[test]
    fn test_normalize_extremes_are_exact() {
        let mut stats = FeatureStats::new();
        for i in 0..12 {
            stats.observe(0.2 + (i as f64) * 0.05);
        }
        assert!(stats.is_scaling(10));
        assert_eq!(stats.normalize(stats.max, 10), 1.0);
        assert_eq!(stats.normalize(stats.min, 10), 0.0);
    }

    #[test]
    fn test_degenerate_range_stays_raw() {
        let mut stats = FeatureStats::new();
        for _ in 0..20 {
            stats.observe(0.5);
        }
        assert!(!stats.is_scaling(10));
        assert_eq!(stats.normalize(0.5, 10), 0.5);
    }

    #[test]
    fn test_non_finite_samples_ignored() {
        let mut stats = FeatureStats::new();
        stats.observe(f64::NAN);
        stats.observe(f64::INFINITY);
        assert_eq!(stats.count, 0);
    }
}
