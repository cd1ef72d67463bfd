//! Thompson Sampling multi-armed bandit over backend models
//!
//! Each (tenant, model) arm maintains a Beta distribution over its expected
//! reward, and we sample from these distributions to make selection decisions.
//!
//! ## Algorithm Overview
//!
//! 1. For each model, maintain Beta(α, β) distribution of success probability
//! 2. Sample from each model's distribution: θ ~ Beta(α, β)
//! 3. Select the model with highest sampled value
//! 4. Observe reward and update: α += reward, β += (1 - reward)

use rand::prelude::*;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::types::BetaParams;

/// Posterior and usage counters for one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    pub model_id: String,
    pub posterior: BetaParams,
    /// Outcomes observed by this tenant
    pub total_uses: u64,
    pub reward_sum: f64,
}

impl ArmStats {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            posterior: BetaParams::default(),
            total_uses: 0,
            reward_sum: 0.0,
        }
    }

    pub fn with_prior(mut self, prior: BetaParams) -> Self {
        self.posterior = prior;
        self
    }

    /// Mean observed reward, or the posterior mean before any outcome
    pub fn average_reward(&self) -> f64 {
        if self.total_uses == 0 {
            return self.posterior.mean();
        }
        self.reward_sum / self.total_uses as f64
    }
}

/// Result of a bandit draw
#[derive(Debug, Clone, PartialEq)]
pub struct BanditDraw {
    pub model_id: String,
    pub sampled_value: f64,
    /// Whether the winner was still uncertain or under-sampled
    pub is_exploration: bool,
}

/// Thompson Sampling bandit keyed by tenant
#[derive(Debug)]
pub struct ThompsonSamplingBandit {
    /// Arms per tenant
    arms: HashMap<String, HashMap<String, ArmStats>>,
    /// Minimum samples before we trust the statistics
    min_samples_for_trust: u64,
    rng: StdRng,
}

impl Default for ThompsonSamplingBandit {
    fn default() -> Self {
        Self::new()
    }
}

impl ThompsonSamplingBandit {
    pub fn new() -> Self {
        Self {
            arms: HashMap::new(),
            min_samples_for_trust: 5,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a bandit with a fixed seed (for reproducibility in tests)
    pub fn with_seed(seed: u64) -> Self {
        Self {
            arms: HashMap::new(),
            min_samples_for_trust: 5,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_min_samples(mut self, min_samples: u64) -> Self {
        self.min_samples_for_trust = min_samples;
        self
    }

    pub fn get_or_create(&mut self, tenant: &str, model_id: &str) -> &mut ArmStats {
        self.arms
            .entry(tenant.to_string())
            .or_default()
            .entry(model_id.to_string())
            .or_insert_with(|| ArmStats::new(model_id))
    }

    pub fn get(&self, tenant: &str, model_id: &str) -> Option<&ArmStats> {
        self.arms.get(tenant).and_then(|m| m.get(model_id))
    }

    fn sample_beta(&mut self, params: BetaParams) -> f64 {
        if params.alpha <= 0.0 || params.beta <= 0.0 {
            return 0.5;
        }
        match Beta::new(params.alpha, params.beta) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => 0.5,
        }
    }

    /// Draw one sample per candidate and keep the highest
    pub fn select(&mut self, tenant: &str, candidates: &[String]) -> Option<BanditDraw> {
        if candidates.is_empty() {
            return None;
        }
        if candidates.len() == 1 {
            return Some(BanditDraw {
                model_id: candidates[0].clone(),
                sampled_value: 1.0,
                is_exploration: false,
            });
        }

        let mut best: Option<BanditDraw> = None;
        for model_id in candidates {
            let (posterior, total_uses) = {
                let arm = self.get_or_create(tenant, model_id);
                (arm.posterior, arm.total_uses)
            };
            let sample = self.sample_beta(posterior);
            let is_high_uncertainty =
                posterior.uncertainty() > 0.15 || total_uses < self.min_samples_for_trust;

            if best.as_ref().is_none_or(|b| sample > b.sampled_value) {
                best = Some(BanditDraw {
                    model_id: model_id.clone(),
                    sampled_value: sample,
                    is_exploration: is_high_uncertainty,
                });
            }
        }
        best
    }

    /// Update an arm with an observed reward, clamped to [0, 1]
    pub fn update(&mut self, tenant: &str, model_id: &str, reward: f64) {
        let clamped = if reward.is_finite() { reward.clamp(0.0, 1.0) } else { 0.0 };
        let arm = self.get_or_create(tenant, model_id);
        arm.posterior.alpha += clamped;
        arm.posterior.beta += 1.0 - clamped;
        arm.total_uses += 1;
        arm.reward_sum += clamped;
    }

    /// Install a prior on an arm the tenant has not observed
    pub fn seed_prior(&mut self, tenant: &str, model_id: &str, prior: BetaParams) -> bool {
        let arm = self.get_or_create(tenant, model_id);
        if arm.total_uses > 0 {
            return false;
        }
        arm.posterior = prior;
        true
    }

    /// Posteriors for one tenant, sorted by model id
    pub fn posteriors(&self, tenant: &str) -> BTreeMap<String, BetaParams> {
        self.arms
            .get(tenant)
            .map(|arms| {
                arms.iter()
                    .map(|(model, stats)| (model.clone(), stats.posterior))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace a tenant's arms from stored posteriors
    pub fn import_posteriors(&mut self, tenant: &str, posteriors: BTreeMap<String, BetaParams>) {
        let arms = posteriors
            .into_iter()
            .map(|(model, posterior)| {
                let mut stats = ArmStats::new(model.clone()).with_prior(posterior);
                stats.total_uses = posterior.observations().round() as u64;
                stats.reward_sum = (posterior.alpha - 1.0).max(0.0);
                (model, stats)
            })
            .collect();
        self.arms.insert(tenant.to_string(), arms);
    }

    pub fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.arms.keys().cloned().collect();
        tenants.sort();
        tenants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models() -> Vec<String> {
        vec!["model-a".into(), "model-b".into(), "model-c".into()]
    }

    #[test]
    fn test_single_candidate() {
        let mut bandit = ThompsonSamplingBandit::with_seed(42);
        let draw = bandit.select("t1", &["only".to_string()]).unwrap();
        assert_eq!(draw.model_id, "only");
        assert!(!draw.is_exploration);
        assert!(bandit.select("t1", &[]).is_none());
    }

    #[test]
    fn test_uninformed_bandit_explores() {
        let mut bandit = ThompsonSamplingBandit::with_seed(42);
        let mut seen: HashMap<String, u32> = HashMap::new();
        for _ in 0..100 {
            let draw = bandit.select("t1", &models()).unwrap();
            assert!(draw.is_exploration);
            *seen.entry(draw.model_id).or_default() += 1;
        }
        assert!(seen.len() >= 2, "Expected exploration of multiple models");
    }

    #[test]
    fn test_update_affects_selection() {
        let mut bandit = ThompsonSamplingBandit::with_seed(42);
        for _ in 0..20 {
            bandit.update("t1", "model-a", 1.0);
            bandit.update("t1", "model-b", 0.0);
            bandit.update("t1", "model-c", 0.0);
        }

        let a_count = (0..50)
            .filter(|_| bandit.select("t1", &models()).unwrap().model_id == "model-a")
            .count();
        assert!(a_count > 45, "model-a picked {} of 50", a_count);
    }

    #[test]
    fn test_update_clamps_reward() {
        let mut bandit = ThompsonSamplingBandit::with_seed(1);
        bandit.update("t1", "m", 3.0);
        bandit.update("t1", "m", -1.0);
        let arm = bandit.get("t1", "m").unwrap();
        assert_eq!(arm.posterior, BetaParams::new(2.0, 2.0));
        assert_eq!(arm.total_uses, 2);
        assert_eq!(arm.average_reward(), 0.5);
    }

    #[test]
    fn test_tenants_are_isolated() {
        let mut bandit = ThompsonSamplingBandit::with_seed(1);
        bandit.update("t1", "m", 1.0);
        assert!(bandit.posteriors("t2").is_empty());
        assert_eq!(bandit.posteriors("t1")["m"], BetaParams::new(2.0, 1.0));
        assert_eq!(bandit.tenants(), vec!["t1".to_string()]);
    }

    #[test]
    fn test_seed_prior_only_for_unobserved() {
        let mut bandit = ThompsonSamplingBandit::with_seed(1);
        assert!(bandit.seed_prior("t1", "fresh", BetaParams::new(8.0, 2.0)));
        bandit.update("t1", "used", 1.0);
        assert!(!bandit.seed_prior("t1", "used", BetaParams::new(8.0, 2.0)));
        assert_eq!(bandit.posteriors("t1")["fresh"], BetaParams::new(8.0, 2.0));
        assert_eq!(bandit.posteriors("t1")["used"], BetaParams::new(2.0, 1.0));
    }

    #[test]
    fn test_import_posteriors_marks_arms_observed() {
        let mut bandit = ThompsonSamplingBandit::with_seed(1);
        let mut stored = BTreeMap::new();
        stored.insert("m".to_string(), BetaParams::new(4.0, 3.0));
        bandit.import_posteriors("t1", stored);

        let arm = bandit.get("t1", "m").unwrap();
        assert_eq!(arm.total_uses, 5);
        assert!(!bandit.seed_prior("t1", "m", BetaParams::new(9.0, 1.0)));
    }
}
