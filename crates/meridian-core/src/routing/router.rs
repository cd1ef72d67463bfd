//! Model Router - per-tenant model selection with Thompson sampling
//!
//! The router keeps one Beta posterior per (tenant, model) pair. An explicit
//! `requested_model` that is among the candidates is honoured as-is;
//! otherwise the bandit samples each candidate and takes the best draw.
//! Posteriors are exported as `ts_router:<tenant>:state` records for the
//! meta-learning aggregator and can be seeded from its global priors.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::thompson::ThompsonSamplingBandit;
use crate::error::{Error, Result};
use crate::features::SelectionInput;
use crate::meta::{GlobalParameters, TenantModelState, model_router_key};
use crate::store::{StateStore, load_json, save_json};

/// Why a model was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelDecisionReason {
    /// The caller named this model
    Requested,
    /// Only one candidate was offered
    SingleCandidate,
    /// Best Thompson draw
    Sampled,
    /// Best draw while the posterior is still uncertain
    Exploration,
}

/// Result of a model routing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDecision {
    pub tenant: String,
    pub model_id: String,
    pub sampled_value: f64,
    pub reason: ModelDecisionReason,
}

/// Thompson-sampling router over backend model ids
pub struct ModelRouter {
    bandit: Arc<RwLock<ThompsonSamplingBandit>>,
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRouter {
    pub fn new() -> Self {
        Self {
            bandit: Arc::new(RwLock::new(ThompsonSamplingBandit::new())),
        }
    }

    /// Router with a fixed sampling seed
    pub fn with_seed(seed: u64) -> Self {
        Self {
            bandit: Arc::new(RwLock::new(ThompsonSamplingBandit::with_seed(seed))),
        }
    }

    /// Pick a model for a request
    pub async fn select_model(&self, input: &SelectionInput) -> Result<ModelDecision> {
        let candidates = &input.candidate_models;
        if candidates.is_empty() {
            return Err(Error::NoCandidates(input.task_type.clone()));
        }

        if let Some(requested) = input.explicit_model() {
            if candidates.iter().any(|m| m == requested) {
                debug!(tenant = %input.tenant, model = %requested, "Using requested model");
                return Ok(ModelDecision {
                    tenant: input.tenant.clone(),
                    model_id: requested.to_string(),
                    sampled_value: 1.0,
                    reason: ModelDecisionReason::Requested,
                });
            }
            debug!(
                tenant = %input.tenant,
                model = %requested,
                "Requested model not among candidates, sampling instead"
            );
        }

        let draw = {
            let mut bandit = self.bandit.write().await;
            bandit.select(&input.tenant, candidates)
        }
        .ok_or_else(|| Error::NoCandidates(input.task_type.clone()))?;

        let reason = if candidates.len() == 1 {
            ModelDecisionReason::SingleCandidate
        } else if draw.is_exploration {
            ModelDecisionReason::Exploration
        } else {
            ModelDecisionReason::Sampled
        };

        debug!(
            tenant = %input.tenant,
            model = %draw.model_id,
            sample = draw.sampled_value,
            reason = ?reason,
            "Selected model"
        );

        Ok(ModelDecision {
            tenant: input.tenant.clone(),
            model_id: draw.model_id,
            sampled_value: draw.sampled_value,
            reason,
        })
    }

    /// Record the reward for a model decision
    pub async fn record_outcome(&self, tenant: &str, model_id: &str, reward: f64) {
        let mut bandit = self.bandit.write().await;
        bandit.update(tenant, model_id, reward);
        debug!(tenant, model = model_id, reward, "Recorded model outcome");
    }

    /// Snapshot a tenant's posteriors in the persisted shape
    pub async fn export_state(&self, tenant: &str) -> TenantModelState {
        let bandit = self.bandit.read().await;
        TenantModelState {
            posteriors: bandit.posteriors(tenant),
        }
    }

    /// Write `ts_router:<tenant>:state`
    pub async fn persist_state(&self, store: &dyn StateStore, tenant: &str) -> Result<()> {
        let state = self.export_state(tenant).await;
        save_json(store, &model_router_key(tenant), &state).await?;
        info!(tenant, models = state.posteriors.len(), "Persisted model router state");
        Ok(())
    }

    /// Load a tenant's posteriors back from the store
    ///
    /// Returns the number of models restored; a missing record restores none.
    pub async fn restore_state(&self, store: &dyn StateStore, tenant: &str) -> Result<usize> {
        let Some(state) = load_json::<TenantModelState>(store, &model_router_key(tenant)).await?
        else {
            return Ok(0);
        };
        let count = state.posteriors.len();
        self.bandit
            .write()
            .await
            .import_posteriors(tenant, state.posteriors);
        Ok(count)
    }

    /// Install global priors for the given models where the tenant has no observations
    ///
    /// Global priors also carry agent arms, so only ids listed in `models`
    /// are ever turned into model arms.
    pub async fn seed_from_global(
        &self,
        tenant: &str,
        params: &GlobalParameters,
        models: &[String],
    ) -> usize {
        let mut bandit = self.bandit.write().await;
        let mut seeded = 0;
        for model in models {
            let Some(prior) = params.prior(model) else {
                continue;
            };
            if bandit.seed_prior(tenant, model, prior) {
                seeded += 1;
            }
        }
        info!(tenant, seeded, "Seeded model priors from global parameters");
        seeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::BetaParams;
    use crate::store::InMemoryStateStore;

    fn input(models: &[&str]) -> SelectionInput {
        SelectionInput::new("t1", "chat")
            .with_candidate_models(models.iter().map(|m| m.to_string()).collect())
    }

    #[tokio::test]
    async fn test_requested_model_wins() {
        let router = ModelRouter::with_seed(3);
        let decision = router
            .select_model(&input(&["a", "b"]).with_requested_model("b"))
            .await
            .unwrap();
        assert_eq!(decision.model_id, "b");
        assert_eq!(decision.reason, ModelDecisionReason::Requested);
    }

    #[tokio::test]
    async fn test_unknown_requested_model_is_sampled() {
        let router = ModelRouter::with_seed(3);
        let decision = router
            .select_model(&input(&["a", "b"]).with_requested_model("zzz"))
            .await
            .unwrap();
        assert!(decision.model_id == "a" || decision.model_id == "b");
        assert_ne!(decision.reason, ModelDecisionReason::Requested);
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let router = ModelRouter::with_seed(3);
        let err = router
            .select_model(&input(&[]).with_requested_model("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoCandidates(_)));
    }

    #[tokio::test]
    async fn test_single_candidate() {
        let router = ModelRouter::with_seed(3);
        let decision = router.select_model(&input(&["solo"])).await.unwrap();
        assert_eq!(decision.model_id, "solo");
        assert_eq!(decision.reason, ModelDecisionReason::SingleCandidate);
    }

    #[tokio::test]
    async fn test_learns_from_outcomes() {
        let router = ModelRouter::with_seed(5);
        for _ in 0..30 {
            router.record_outcome("t1", "good", 1.0).await;
            router.record_outcome("t1", "bad", 0.0).await;
        }
        let mut good = 0;
        for _ in 0..40 {
            if router.select_model(&input(&["good", "bad"])).await.unwrap().model_id == "good" {
                good += 1;
            }
        }
        assert!(good >= 38, "good picked {} of 40", good);
    }

    #[tokio::test]
    async fn test_persist_restore_and_seed() {
        let store = InMemoryStateStore::new();
        let router = ModelRouter::with_seed(5);
        router.record_outcome("t1", "m1", 1.0).await;
        router.persist_state(&store, "t1").await.unwrap();

        let raw = store.get("ts_router:t1:state").await.unwrap().unwrap();
        let state: TenantModelState = serde_json::from_str(&raw).unwrap();
        assert_eq!(state.posteriors["m1"], BetaParams::new(2.0, 1.0));

        let fresh = ModelRouter::with_seed(5);
        assert_eq!(fresh.restore_state(&store, "t1").await.unwrap(), 1);
        assert_eq!(fresh.restore_state(&store, "t9").await.unwrap(), 0);

        let mut global = GlobalParameters::default();
        global
            .arm_priors
            .insert("m1".to_string(), BetaParams::new(9.0, 9.0));
        global
            .arm_priors
            .insert("m2".to_string(), BetaParams::new(6.0, 2.0));
        let models = vec!["m1".to_string(), "m2".to_string()];
        assert_eq!(fresh.seed_from_global("t1", &global, &models).await, 1);

        let state = fresh.export_state("t1").await;
        assert_eq!(state.posteriors["m1"], BetaParams::new(2.0, 1.0));
        assert_eq!(state.posteriors["m2"], BetaParams::new(6.0, 2.0));
    }

    #[tokio::test]
    async fn test_seeding_ignores_agent_priors() {
        let mut global = GlobalParameters::default();
        global
            .arm_priors
            .insert("writer-agent".to_string(), BetaParams::new(7.0, 3.0));
        global
            .arm_priors
            .insert("model-a".to_string(), BetaParams::new(4.0, 2.0));

        let router = ModelRouter::with_seed(1);
        let models = vec!["model-a".to_string(), "model-b".to_string()];
        assert_eq!(router.seed_from_global("t", &global, &models).await, 1);

        let state = router.export_state("t").await;
        let exported: Vec<&str> = state.posteriors.keys().map(String::as_str).collect();
        assert_eq!(exported, vec!["model-a"]);
        assert_eq!(state.posteriors["model-a"], BetaParams::new(4.0, 2.0));
    }
}
