//! Contextual bandit selection over agents
//!
//! Scores each eligible agent by its reward model's prediction, discounted by
//! health, success rate and free capacity:
//!
//! ```text
//! expected_reward = dot(w, x) * health * success_rate * (1 - load / max_parallel)
//! ```
//!
//! Selection never mutates state; learning happens through [`BanditSelector::update`],
//! which the orchestrator calls only from its batched feedback step.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::reward::{RewardModel, RewardSnapshot, WeightUpdate};
use super::types::{AgentCapability, AgentSelection, BetaParams, SelectionCriteria};
use crate::config::RoutingConfig;
use crate::error::{Error, Result};
use crate::features::{CONTEXT_DIM, ContextVector};

/// Confidence ceiling when the margin between the top two is large
const MAX_CONFIDENCE: f64 = 0.95;
/// Runner-ups reported with each selection
const MAX_ALTERNATIVES: usize = 2;

/// A scored, eligible candidate
#[derive(Debug, Clone)]
struct Scored<'a> {
    agent: &'a AgentCapability,
    score: f64,
    success_rate: f64,
    average_duration_s: f64,
}

/// Bandit selector holding one reward model per agent
#[derive(Debug)]
pub struct BanditSelector {
    models: RwLock<HashMap<String, Arc<RewardModel>>>,
    health_threshold: f64,
    default_confidence: f64,
}

impl Default for BanditSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl BanditSelector {
    /// Create a selector with default thresholds
    pub fn new() -> Self {
        Self::with_config(&RoutingConfig::default())
    }

    /// Create a selector from routing configuration
    pub fn with_config(config: &RoutingConfig) -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            health_threshold: config.health_threshold,
            default_confidence: config.default_confidence,
        }
    }

    fn read_models(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<RewardModel>>> {
        self.models.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_models(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<RewardModel>>> {
        self.models.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a reward model for an agent, keeping any existing one
    pub fn register(&self, agent: &AgentCapability) -> Arc<RewardModel> {
        let mut models = self.write_models();
        Arc::clone(models.entry(agent.agent_id.clone()).or_insert_with(|| {
            Arc::new(RewardModel::new(
                agent.agent_id.clone(),
                agent.success_rate,
                agent.average_duration_s,
            ))
        }))
    }

    /// Drop an agent's reward model
    pub fn remove(&self, agent_id: &str) -> bool {
        self.write_models().remove(agent_id).is_some()
    }

    pub fn model(&self, agent_id: &str) -> Option<Arc<RewardModel>> {
        self.read_models().get(agent_id).cloned()
    }

    pub fn snapshot(&self, agent_id: &str) -> Option<Arc<RewardSnapshot>> {
        self.model(agent_id).map(|m| m.snapshot())
    }

    /// Registered agent ids, sorted
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read_models().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Pick the best eligible agent for a context
    ///
    /// Fails with [`Error::NoCandidates`] when filtering leaves nothing.
    pub fn select(
        &self,
        candidates: &[AgentCapability],
        context: &ContextVector,
        criteria: &SelectionCriteria,
    ) -> Result<AgentSelection> {
        let mut scored: Vec<Scored<'_>> = {
            let models = self.read_models();
            candidates
                .iter()
                .filter(|agent| self.is_eligible(agent, criteria))
                .map(|agent| {
                    let snapshot = models.get(&agent.agent_id).map(|m| m.snapshot());
                    let (prediction, success_rate, average_duration_s) = match &snapshot {
                        Some(s) => (s.predict(context), s.success_rate, s.average_duration_s),
                        None => (0.0, agent.success_rate, agent.average_duration_s),
                    };
                    let score =
                        prediction * agent.health_score * success_rate * agent.load_factor();
                    Scored {
                        agent,
                        score,
                        success_rate,
                        average_duration_s,
                    }
                })
                .collect()
        };

        if scored.is_empty() {
            debug!(
                task_type = %criteria.task_type,
                offered = candidates.len(),
                "No eligible agents"
            );
            return Err(Error::NoCandidates(criteria.task_type.clone()));
        }

        // Stable sort keeps registration order among ties
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));

        let best = &scored[0];
        let confidence = match scored.get(1) {
            Some(runner_up) => (0.5 + (best.score - runner_up.score) / 2.0).min(MAX_CONFIDENCE),
            None => self.default_confidence,
        };

        let alternatives: Vec<(String, f64)> = scored
            .iter()
            .skip(1)
            .take(MAX_ALTERNATIVES)
            .map(|s| (s.agent.agent_id.clone(), s.score))
            .collect();

        let reasoning = format!(
            "Selected {} ({}) with expected reward {:.3} from {} eligible agent(s): {}",
            best.agent.name,
            best.agent.agent_type,
            best.score,
            scored.len(),
            format_args!(
                "health {:.2}, success rate {:.2}, load {}/{}",
                best.agent.health_score,
                best.success_rate,
                best.agent.current_load,
                best.agent.max_parallel_tasks,
            ),
        );

        debug!(
            agent = %best.agent.agent_id,
            score = best.score,
            confidence = confidence,
            eligible = scored.len(),
            "Selected agent"
        );

        Ok(AgentSelection {
            agent_id: best.agent.agent_id.clone(),
            confidence,
            expected_success: best.success_rate.clamp(0.0, 1.0),
            expected_duration_s: best.average_duration_s,
            reasoning,
            alternatives,
        })
    }

    fn is_eligible(&self, agent: &AgentCapability, criteria: &SelectionCriteria) -> bool {
        agent.health_score >= self.health_threshold
            && agent.current_load < agent.max_parallel_tasks
            && agent.handles(&criteria.task_type)
            && agent.satisfies(&criteria.required_specializations)
    }

    /// Apply an observed outcome to an agent's reward model
    pub fn update(
        &self,
        agent_id: &str,
        context: &ContextVector,
        reward: f64,
        duration_s: Option<f64>,
        success: bool,
    ) -> Result<WeightUpdate> {
        let model = self
            .model(agent_id)
            .ok_or_else(|| Error::UnknownAgent(agent_id.to_string()))?;
        Ok(model.update(context, reward, duration_s, success))
    }

    /// Seed a cold agent's weights and success prior
    pub fn seed_weights(
        &self,
        agent_id: &str,
        weights: [f64; CONTEXT_DIM],
        prior: Option<BetaParams>,
    ) -> Result<bool> {
        let model = self
            .model(agent_id)
            .ok_or_else(|| Error::UnknownAgent(agent_id.to_string()))?;
        Ok(model.seed(weights, prior))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str) -> AgentCapability {
        AgentCapability::new(id)
            .with_capacity(4)
            .with_success_rate(0.9)
            .with_health(1.0)
    }

    fn selector_with(agents: &[AgentCapability]) -> BanditSelector {
        let selector = BanditSelector::new();
        for a in agents {
            selector.register(a);
        }
        selector
    }

    #[test]
    fn test_single_candidate_default_confidence() {
        let agents = vec![agent("solo")];
        let selector = selector_with(&agents);

        let selection = selector
            .select(&agents, &ContextVector::splat(0.5), &SelectionCriteria::new("chat"))
            .unwrap();

        assert_eq!(selection.agent_id, "solo");
        assert_eq!(selection.confidence, 0.85);
        assert!(selection.alternatives.is_empty());
    }

    #[test]
    fn test_no_candidates() {
        let agents = vec![
            agent("sick").with_health(0.2),
            agent("busy").with_capacity(2).with_load(2),
            agent("wrong-task").with_task_types(["transcription"]),
        ];
        let selector = selector_with(&agents);

        let err = selector
            .select(&agents, &ContextVector::splat(0.5), &SelectionCriteria::new("chat"))
            .unwrap_err();
        assert!(matches!(err, Error::NoCandidates(ref t) if t == "chat"));

        let err = selector
            .select(&[], &ContextVector::zeros(), &SelectionCriteria::new("chat"))
            .unwrap_err();
        assert!(matches!(err, Error::NoCandidates(_)));
    }

    #[test]
    fn test_health_threshold_is_inclusive() {
        let agents = vec![agent("edge").with_health(0.4)];
        let selector = selector_with(&agents);
        assert!(
            selector
                .select(&agents, &ContextVector::zeros(), &SelectionCriteria::new("chat"))
                .is_ok()
        );
    }

    #[test]
    fn test_specialization_filter() {
        let agents = vec![
            agent("legal").with_specializations(["legal"]),
            agent("medical").with_specializations(["medical"]),
        ];
        let selector = selector_with(&agents);
        let criteria =
            SelectionCriteria::new("analysis").with_specializations(vec!["medical".to_string()]);

        let selection = selector
            .select(&agents, &ContextVector::splat(0.5), &criteria)
            .unwrap();
        assert_eq!(selection.agent_id, "medical");
        assert!(selection.alternatives.is_empty());
    }

    #[test]
    fn test_trained_weights_win() {
        let agents = vec![agent("untrained"), agent("trained")];
        let selector = selector_with(&agents);
        selector.seed_weights("trained", [0.1; CONTEXT_DIM], None).unwrap();

        let selection = selector
            .select(&agents, &ContextVector::splat(0.5), &SelectionCriteria::new("chat"))
            .unwrap();

        assert_eq!(selection.agent_id, "trained");
        assert_eq!(selection.alternatives.len(), 1);
        assert_eq!(selection.alternatives[0].0, "untrained");
        assert_eq!(selection.alternatives[0].1, 0.0);
        // score = 0.9 * 1.0 * 0.9 * 1.0
        assert!((selection.confidence - (0.5_f64 + 0.81 / 2.0).min(0.95)).abs() < 1e-9);
    }

    #[test]
    fn test_load_penalizes_score() {
        let agents = vec![agent("loaded").with_load(3), agent("idle")];
        let selector = selector_with(&agents);
        selector.seed_weights("loaded", [0.1; CONTEXT_DIM], None).unwrap();
        selector.seed_weights("idle", [0.08; CONTEXT_DIM], None).unwrap();

        let selection = selector
            .select(&agents, &ContextVector::splat(0.5), &SelectionCriteria::new("chat"))
            .unwrap();
        // loaded: 0.9*0.9*0.25, idle: 0.72*0.9
        assert_eq!(selection.agent_id, "idle");
    }

    #[test]
    fn test_alternatives_capped_and_sorted() {
        let agents = vec![agent("a"), agent("b"), agent("c"), agent("d")];
        let selector = selector_with(&agents);
        selector.seed_weights("a", [0.01; CONTEXT_DIM], None).unwrap();
        selector.seed_weights("b", [0.04; CONTEXT_DIM], None).unwrap();
        selector.seed_weights("c", [0.03; CONTEXT_DIM], None).unwrap();
        selector.seed_weights("d", [0.02; CONTEXT_DIM], None).unwrap();

        let selection = selector
            .select(&agents, &ContextVector::splat(1.0), &SelectionCriteria::new("chat"))
            .unwrap();
        assert_eq!(selection.agent_id, "b");
        let ids: Vec<&str> = selection.alternatives.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
        assert!(selection.alternatives[0].1 > selection.alternatives[1].1);
    }

    #[test]
    fn test_unregistered_candidate_scores_zero() {
        let agents = vec![agent("ghost")];
        let selector = BanditSelector::new();
        let selection = selector
            .select(&agents, &ContextVector::splat(1.0), &SelectionCriteria::new("chat"))
            .unwrap();
        assert_eq!(selection.agent_id, "ghost");
        assert!((selection.expected_success - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_update_unknown_agent() {
        let selector = BanditSelector::new();
        let err = selector
            .update("nobody", &ContextVector::zeros(), 1.0, None, true)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownAgent(_)));
    }

    #[test]
    fn test_update_changes_selection() {
        let agents = vec![agent("a"), agent("b")];
        let selector = selector_with(&agents);
        let ctx = ContextVector::splat(0.2);
        for _ in 0..20 {
            selector.update("b", &ctx, 1.0, Some(2.0), true).unwrap();
            selector.update("a", &ctx, 0.0, Some(2.0), false).unwrap();
        }
        let selection = selector
            .select(&agents, &ctx, &SelectionCriteria::new("chat"))
            .unwrap();
        assert_eq!(selection.agent_id, "b");
        assert!((selection.expected_duration_s - 2.0).abs() < 1e-9);
    }
}
