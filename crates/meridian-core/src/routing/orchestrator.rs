//! Routing orchestrator
//!
//! Wires the feature extractor and the bandit selector to callers. It owns the
//! agent registry with live load counters, turns completions into rewards, and
//! buffers them for the batched learning step.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::feedback::FeedbackQueue;
use super::reward::RewardSnapshot;
use super::selector::BanditSelector;
use super::types::{
    AgentCapability, AgentSelection, CompletionOutcome, FeedbackRecord, SelectionCriteria,
};
use crate::config::RoutingConfig;
use crate::error::{Error, Result};
use crate::features::{CONTEXT_DIM, ContextVector, FeatureExtractor, SelectionInput};
use crate::meta::{GlobalParameters, TenantRoutingState, agent_routing_key, weights_by_name};
use crate::store::{StateStore, save_json};

/// Reward for a successful task before the quality bonus
const SUCCESS_REWARD: f64 = 0.5;
/// Weight of the optional quality score
const QUALITY_WEIGHT: f64 = 0.5;
/// Subtracted when a task runs well over the agent's average
const SLOW_PENALTY: f64 = 0.2;
/// Multiple of the average duration that counts as slow
const SLOW_FACTOR: f64 = 2.0;

/// Source of agent capabilities
///
/// The orchestrator depends on this rather than on a concrete registry.
#[async_trait]
pub trait AgentDiscovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<AgentCapability>>;
}

/// Discovery over a fixed list of agents
#[derive(Debug, Clone, Default)]
pub struct StaticAgentDiscovery {
    agents: Vec<AgentCapability>,
}

impl StaticAgentDiscovery {
    pub fn new(agents: Vec<AgentCapability>) -> Self {
        Self { agents }
    }
}

#[async_trait]
impl AgentDiscovery for StaticAgentDiscovery {
    async fn discover(&self) -> Result<Vec<AgentCapability>> {
        Ok(self.agents.clone())
    }
}

/// Registered agent with its live load counter
#[derive(Debug)]
struct AgentSlot {
    capability: AgentCapability,
    load: Arc<AtomicU32>,
}

impl AgentSlot {
    /// Capability with the current load filled in
    fn view(&self) -> AgentCapability {
        let mut capability = self.capability.clone();
        capability.current_load = self.load.load(Ordering::Acquire);
        capability
    }

    /// Take one unit of capacity if any is left
    fn try_acquire(&self) -> bool {
        let max = self.capability.max_parallel_tasks;
        self.load
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |load| {
                (load < max).then_some(load + 1)
            })
            .is_ok()
    }

    /// Return one unit of capacity, never going below zero
    fn release(&self) -> u32 {
        match self
            .load
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |load| load.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(current) => current,
        }
    }
}

/// A routed request together with the context it was routed on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedRequest {
    pub selection: AgentSelection,
    pub context: ContextVector,
}

/// Result of one feedback processing step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub applied: usize,
    /// Records for agents no longer registered
    pub skipped: usize,
    pub remaining: usize,
}

/// Adaptive agent router
pub struct RoutingOrchestrator {
    extractor: Arc<FeatureExtractor>,
    selector: BanditSelector,
    agents: RwLock<BTreeMap<String, Arc<AgentSlot>>>,
    feedback: FeedbackQueue,
    discovery: Option<Arc<dyn AgentDiscovery>>,
    config: RoutingConfig,
    /// Held by the single feedback consumer
    consumer: tokio::sync::Mutex<()>,
}

impl Default for RoutingOrchestrator {
    fn default() -> Self {
        Self::new(Arc::new(FeatureExtractor::new()), RoutingConfig::default())
    }
}

impl RoutingOrchestrator {
    pub fn new(extractor: Arc<FeatureExtractor>, config: RoutingConfig) -> Self {
        Self {
            extractor,
            selector: BanditSelector::with_config(&config),
            agents: RwLock::new(BTreeMap::new()),
            feedback: FeedbackQueue::new(config.feedback_capacity),
            discovery: None,
            config,
            consumer: tokio::sync::Mutex::new(()),
        }
    }

    /// Set the agent discovery used by [`RoutingOrchestrator::refresh_agents`]
    pub fn with_discovery(mut self, discovery: Arc<dyn AgentDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn extractor(&self) -> &Arc<FeatureExtractor> {
        &self.extractor
    }

    pub fn selector(&self) -> &BanditSelector {
        &self.selector
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    fn read_agents(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<AgentSlot>>> {
        self.agents.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_agents(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<AgentSlot>>> {
        self.agents.write().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, agent_id: &str) -> Option<Arc<AgentSlot>> {
        self.read_agents().get(agent_id).cloned()
    }

    /// Register or update an agent
    ///
    /// Re-registering keeps the agent's live load and its learned model.
    pub fn register_agent(&self, capability: AgentCapability) {
        self.selector.register(&capability);

        let mut agents = self.write_agents();
        let load = match agents.get(&capability.agent_id) {
            Some(existing) => Arc::clone(&existing.load),
            None => Arc::new(AtomicU32::new(capability.current_load)),
        };
        debug!(agent = %capability.agent_id, "Registered agent");
        agents.insert(
            capability.agent_id.clone(),
            Arc::new(AgentSlot { capability, load }),
        );
    }

    /// Pull the current agent set from discovery
    ///
    /// Returns the number of agents registered; zero without a discovery source.
    pub async fn refresh_agents(&self) -> Result<usize> {
        let Some(discovery) = &self.discovery else {
            return Ok(0);
        };
        let discovered = discovery.discover().await?;
        let count = discovered.len();
        for capability in discovered {
            self.register_agent(capability);
        }
        info!(count, "Refreshed agents from discovery");
        Ok(count)
    }

    /// Registered agents with their live loads
    pub fn agents(&self) -> Vec<AgentCapability> {
        self.read_agents().values().map(|slot| slot.view()).collect()
    }

    pub fn agent_load(&self, agent_id: &str) -> Option<u32> {
        self.slot(agent_id).map(|slot| slot.load.load(Ordering::Acquire))
    }

    pub fn agent_snapshot(&self, agent_id: &str) -> Option<Arc<RewardSnapshot>> {
        self.selector.snapshot(agent_id)
    }

    /// Select an agent and take a unit of its capacity
    ///
    /// Fails with [`Error::NoCandidates`] without touching any load.
    pub fn route(
        &self,
        context: &ContextVector,
        task_type: &str,
        required_specializations: &[String],
    ) -> Result<AgentSelection> {
        let criteria = SelectionCriteria::new(task_type)
            .with_specializations(required_specializations.to_vec());
        let slots: Vec<Arc<AgentSlot>> = self.read_agents().values().cloned().collect();

        // Each lost race leaves one fewer agent with spare capacity
        for _ in 0..=slots.len() {
            let candidates: Vec<AgentCapability> = slots.iter().map(|s| s.view()).collect();
            let selection = self.selector.select(&candidates, context, &criteria)?;

            let Some(slot) = slots
                .iter()
                .find(|s| s.capability.agent_id == selection.agent_id)
            else {
                break;
            };

            if slot.try_acquire() {
                info!(
                    agent = %selection.agent_id,
                    task_type,
                    confidence = selection.confidence,
                    load = slot.load.load(Ordering::Acquire),
                    "Routed task"
                );
                return Ok(selection);
            }
            debug!(agent = %selection.agent_id, "Agent filled up during selection, retrying");
        }

        Err(Error::NoCandidates(task_type.to_string()))
    }

    /// Extract features for a request and route it
    pub fn route_request(
        &self,
        input: &SelectionInput,
        required_specializations: &[String],
    ) -> Result<RoutedRequest> {
        let context = self.extractor.extract(input);
        let selection = self.route(&context, &input.task_type, required_specializations)?;
        Ok(RoutedRequest { selection, context })
    }

    /// Report a finished task
    ///
    /// Releases the agent's capacity, computes the reward and queues it for
    /// the next feedback batch. Never fails; an unknown agent is reported as
    /// not accepted.
    pub fn complete(
        &self,
        agent_id: &str,
        context: &ContextVector,
        success: bool,
        duration_s: Option<f64>,
        quality: Option<f64>,
    ) -> CompletionOutcome {
        let Some(slot) = self.slot(agent_id) else {
            warn!(agent = %agent_id, "Completion for unknown agent ignored");
            return CompletionOutcome {
                agent_id: agent_id.to_string(),
                accepted: false,
                reward: 0.0,
                current_load: 0,
                evicted_oldest: false,
            };
        };

        let current_load = slot.release();

        let average_duration = self
            .selector
            .snapshot(agent_id)
            .map(|s| s.average_duration_s)
            .unwrap_or(slot.capability.average_duration_s);
        let reward = compute_reward(success, duration_s, quality, average_duration);

        let record = FeedbackRecord::new(agent_id, *context, reward, success, duration_s);
        let evicted_oldest = self.feedback.push(record);

        debug!(
            agent = %agent_id,
            success,
            reward,
            current_load,
            pending = self.feedback.len(),
            "Task completed"
        );

        CompletionOutcome {
            agent_id: agent_id.to_string(),
            accepted: true,
            reward,
            current_load,
            evicted_oldest,
        }
    }

    /// Apply up to `batch_size` queued records to the reward models, oldest first
    pub async fn process_feedback_batch(&self, batch_size: usize) -> BatchReport {
        let _consumer = self.consumer.lock().await;

        let batch = self.feedback.drain(batch_size);
        let mut report = BatchReport::default();

        for record in &batch {
            match self.selector.update(
                &record.agent_id,
                &record.context,
                record.reward,
                record.duration_s,
                record.success,
            ) {
                Ok(step) => {
                    report.applied += 1;
                    debug!(
                        agent = %record.agent_id,
                        error = step.error,
                        learning_rate = step.learning_rate,
                        "Applied feedback"
                    );
                }
                Err(e) => {
                    report.skipped += 1;
                    warn!(agent = %record.agent_id, error = %e, "Dropping feedback");
                }
            }
        }

        report.remaining = self.feedback.len();
        if !batch.is_empty() {
            info!(
                applied = report.applied,
                skipped = report.skipped,
                remaining = report.remaining,
                "Processed feedback batch"
            );
        }
        report
    }

    /// Process one batch using the configured batch size
    pub async fn process_pending_feedback(&self) -> BatchReport {
        self.process_feedback_batch(self.config.feedback_batch_size).await
    }

    pub fn pending_feedback(&self) -> usize {
        self.feedback.len()
    }

    pub fn dropped_feedback(&self) -> u64 {
        self.feedback.dropped()
    }

    /// Snapshot this orchestrator's learned state in the persisted shape
    ///
    /// Context weights are the mean over agents that have seen feedback.
    pub fn export_routing_state(&self) -> TenantRoutingState {
        let mut sums = [0.0; CONTEXT_DIM];
        let mut trained = 0usize;
        let mut state = TenantRoutingState::default();

        for agent_id in self.selector.agent_ids() {
            let Some(snapshot) = self.selector.snapshot(&agent_id) else {
                continue;
            };
            if snapshot.observations > 0 {
                trained += 1;
                for (sum, w) in sums.iter_mut().zip(snapshot.weights.iter()) {
                    *sum += w;
                }
            }
            state.total_trials += snapshot.observations;
            state.agent_bandits.insert(agent_id, snapshot.beta_params());
        }

        if trained > 0 {
            state.context_weights = weights_by_name(&sums.map(|s| s / trained as f64));
        }
        state
    }

    /// Write `bandit:agent_routing:<tenant>:state`
    pub async fn persist_state(&self, store: &dyn StateStore, tenant: &str) -> Result<()> {
        let state = self.export_routing_state();
        save_json(store, &agent_routing_key(tenant), &state).await?;
        info!(
            tenant,
            agents = state.agent_bandits.len(),
            trials = state.total_trials,
            "Persisted agent routing state"
        );
        Ok(())
    }

    /// Seed agents without observations from global parameters
    ///
    /// Returns how many agents took the seed.
    pub fn seed_from_global(&self, params: &GlobalParameters) -> usize {
        if params.is_empty() {
            return 0;
        }
        let weights = params.weight_vector();
        let mut seeded = 0;
        for agent_id in self.selector.agent_ids() {
            match self
                .selector
                .seed_weights(&agent_id, weights, params.prior(&agent_id))
            {
                Ok(true) => seeded += 1,
                Ok(false) => {}
                Err(e) => warn!(agent = %agent_id, error = %e, "Failed to seed agent"),
            }
        }
        info!(seeded, tenants = params.tenant_ids.len(), "Seeded agents from global parameters");
        seeded
    }
}

/// Reward for a completed task
///
/// `0.5` for success plus `0.5 * quality` when a quality score is given, then
/// `-0.2` when the task took more than twice the agent's average duration.
pub fn compute_reward(
    success: bool,
    duration_s: Option<f64>,
    quality: Option<f64>,
    average_duration_s: f64,
) -> f64 {
    let mut reward = 0.0;
    if success {
        reward += SUCCESS_REWARD;
        if let Some(q) = quality.filter(|q| q.is_finite()) {
            reward += QUALITY_WEIGHT * q.clamp(0.0, 1.0);
        }
    }
    if let Some(duration) = duration_s {
        if average_duration_s > 0.0 && duration > SLOW_FACTOR * average_duration_s {
            reward -= SLOW_PENALTY;
        }
    }
    reward
}
