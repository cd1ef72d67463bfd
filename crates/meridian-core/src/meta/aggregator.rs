//! Cross-tenant aggregation of routing state
//!
//! Two passes read the per-tenant records from the state store, add Laplace
//! noise to every scalar, and average each key over the tenants that carry
//! it. [`MetaLearningAggregator::sync_all_params`] runs both, merges them and
//! publishes the result under [`GLOBAL_PARAMS_KEY`].

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::privacy::LaplaceMechanism;
use super::types::{
    AGENT_ROUTING_PREFIX, GLOBAL_PARAMS_KEY, GlobalParameters, MODEL_ROUTER_PREFIX,
    TenantModelState, TenantRoutingState, tenant_from_key,
};
use crate::config::MetaConfig;
use crate::error::{Error, Result};
use crate::metrics::{AGGREGATIONS_TOTAL, ERRORS_TOTAL, MetricsSink, SYNCS_TOTAL, TracingMetrics};
use crate::routing::BetaParams;
use crate::store::StateStore;

/// Lowest value an averaged Beta parameter may take
const MIN_BETA_PARAM: f64 = 1.0;

/// Running sums for one averaged Beta prior
#[derive(Debug, Default, Clone, Copy)]
struct BetaSum {
    alpha: f64,
    beta: f64,
    count: usize,
}

/// Accumulates noisy per-tenant values for sparse averaging
#[derive(Debug, Default)]
struct Accumulator {
    weights: BTreeMap<String, (f64, usize)>,
    priors: BTreeMap<String, BetaSum>,
    tenants: BTreeSet<String>,
    observations: u64,
}

impl Accumulator {
    fn add_weight(&mut self, name: String, value: f64) {
        let entry = self.weights.entry(name).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    fn add_prior(&mut self, arm: String, alpha: f64, beta: f64) {
        let entry = self.priors.entry(arm).or_default();
        entry.alpha += alpha;
        entry.beta += beta;
        entry.count += 1;
    }

    fn finish(self) -> GlobalParameters {
        let context_weights = self
            .weights
            .into_iter()
            .map(|(name, (sum, n))| (name, sum / n as f64))
            .collect();
        let arm_priors = self
            .priors
            .into_iter()
            .map(|(arm, s)| {
                let n = s.count as f64;
                let prior = BetaParams::new(
                    (s.alpha / n).max(MIN_BETA_PARAM),
                    (s.beta / n).max(MIN_BETA_PARAM),
                );
                (arm, prior)
            })
            .collect();

        GlobalParameters {
            context_weights,
            arm_priors,
            tenant_ids: self.tenants,
            last_sync: Some(Utc::now()),
            total_observations: self.observations,
        }
    }
}

/// Aggregates tenant routing state into privacy-protected global parameters
pub struct MetaLearningAggregator {
    store: Arc<dyn StateStore>,
    metrics: Arc<dyn MetricsSink>,
    privacy: LaplaceMechanism,
    config: MetaConfig,
    cancel: CancellationToken,
}

impl MetaLearningAggregator {
    /// Create an aggregator over a state store
    ///
    /// Fails when the configured privacy budget is not positive.
    pub fn new(store: Arc<dyn StateStore>, config: MetaConfig) -> Result<Self> {
        let privacy = LaplaceMechanism::new(config.epsilon)?;
        Ok(Self {
            store,
            metrics: Arc::new(TracingMetrics),
            privacy,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Use a fixed noise seed
    pub fn with_seed(mut self, seed: u64) -> Result<Self> {
        self.privacy = LaplaceMechanism::with_seed(self.config.epsilon, seed)?;
        Ok(self)
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Token checked between tenants by the one-shot passes
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &MetaConfig {
        &self.config
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = self.config.store_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::PersistenceUnavailable(format!("{}: {}", operation, e))),
            Err(_) => Err(Error::PersistenceUnavailable(format!(
                "{} timed out after {:?}",
                operation, limit
            ))),
        }
    }

    fn record_error(&self, operation: &str) {
        self.metrics
            .increment(ERRORS_TOTAL, &[("operation", operation.to_string())]);
    }

    fn record_aggregation(&self, kind: &str, tenant_count: usize) {
        self.metrics.increment(
            AGGREGATIONS_TOTAL,
            &[("type", kind.to_string()), ("tenant_count", tenant_count.to_string())],
        );
    }

    /// Read every record under `prefix`, parsing each one
    ///
    /// Store failures abort the pass; malformed records are skipped.
    async fn collect<T, F>(
        &self,
        prefix: &str,
        kind: &str,
        cancel: &CancellationToken,
        mut apply: F,
    ) -> Result<GlobalParameters>
    where
        T: serde::de::DeserializeOwned,
        F: FnMut(&mut Accumulator, T),
    {
        let keys = self
            .bounded("list_keys", self.store.keys_with_prefix(prefix))
            .await?;

        let mut acc = Accumulator::default();
        let mut skipped = 0usize;

        for (index, key) in keys.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    kind,
                    processed = index,
                    remaining = keys.len() - index,
                    "Aggregation cancelled, remaining tenants deferred"
                );
                break;
            }

            let Some(tenant) = tenant_from_key(key, prefix) else {
                debug!(key = %key, "Ignoring key outside the state namespace");
                continue;
            };

            let raw = match self.bounded("load_state", self.store.get(key)).await? {
                Some(raw) => raw,
                None => continue,
            };

            match serde_json::from_str::<T>(&raw) {
                Ok(state) => {
                    apply(&mut acc, state);
                    acc.tenants.insert(tenant.to_string());
                }
                Err(e) => {
                    skipped += 1;
                    let partial = Error::AggregationPartial {
                        tenant: tenant.to_string(),
                        reason: e.to_string(),
                    };
                    warn!(kind, error = %partial, "Skipping malformed tenant record");
                    self.record_error(&format!("parse_{}", kind));
                }
            }
        }

        let params = acc.finish();
        self.record_aggregation(kind, params.tenant_ids.len());
        info!(
            kind,
            tenants = params.tenant_ids.len(),
            skipped,
            weights = params.context_weights.len(),
            priors = params.arm_priors.len(),
            "Aggregated tenant state"
        );
        Ok(params)
    }

    async fn agent_pass(&self, cancel: &CancellationToken) -> Result<GlobalParameters> {
        let weight_sensitivity = self.config.weight_sensitivity;
        let beta_sensitivity = self.config.agent_beta_sensitivity;

        self.collect(
            AGENT_ROUTING_PREFIX,
            "agent_routing",
            cancel,
            |acc, state: TenantRoutingState| {
                for (name, weight) in state.context_weights {
                    if weight.is_finite() {
                        let noisy = self.privacy.noise(weight, weight_sensitivity);
                        acc.add_weight(name, noisy);
                    }
                }
                for (agent, params) in state.agent_bandits {
                    if params.alpha.is_finite() && params.beta.is_finite() {
                        acc.add_prior(
                            agent,
                            self.privacy.noise(params.alpha, beta_sensitivity),
                            self.privacy.noise(params.beta, beta_sensitivity),
                        );
                    }
                }
                acc.observations += state.total_trials;
            },
        )
        .await
    }

    async fn model_pass(&self, cancel: &CancellationToken) -> Result<GlobalParameters> {
        let sensitivity = self.config.model_posterior_sensitivity;

        self.collect(
            MODEL_ROUTER_PREFIX,
            "model_routing",
            cancel,
            |acc, state: TenantModelState| {
                for (model, params) in state.posteriors {
                    if params.alpha.is_finite() && params.beta.is_finite() {
                        acc.observations += params.observations().round() as u64;
                        acc.add_prior(
                            model,
                            self.privacy.noise(params.alpha, sensitivity),
                            self.privacy.noise(params.beta, sensitivity),
                        );
                    }
                }
            },
        )
        .await
    }

    /// Aggregate `bandit:agent_routing:*` records
    pub async fn aggregate_agent_params(&self) -> Result<GlobalParameters> {
        self.agent_pass(&self.cancel).await
    }

    /// Aggregate `ts_router:*` records
    pub async fn aggregate_model_params(&self) -> Result<GlobalParameters> {
        self.model_pass(&self.cancel).await
    }

    /// Run both passes, merge, and persist the global parameters
    ///
    /// A failing pass contributes nothing; the other still completes.
    pub async fn sync_all_params(&self) -> GlobalParameters {
        self.sync_with(&self.cancel).await
    }

    async fn sync_with(&self, cancel: &CancellationToken) -> GlobalParameters {
        let agent = match self.agent_pass(cancel).await {
            Ok(params) => params,
            Err(e) => {
                warn!(error = %e, "Agent routing aggregation failed");
                self.record_error("aggregate_agent_params");
                GlobalParameters::default()
            }
        };
        let model = match self.model_pass(cancel).await {
            Ok(params) => params,
            Err(e) => {
                warn!(error = %e, "Model routing aggregation failed");
                self.record_error("aggregate_model_params");
                GlobalParameters::default()
            }
        };

        let merged = agent.merge(model);

        if merged.tenant_ids.is_empty() {
            debug!("No tenant state found, global parameters left unchanged");
        } else if let Err(e) = self.persist(&merged).await {
            warn!(error = %e, "Failed to persist global parameters");
            self.record_error("persist_global_params");
        }

        self.metrics.increment(SYNCS_TOTAL, &[]);
        info!(
            tenants = merged.tenant_ids.len(),
            observations = merged.total_observations,
            "Meta-learning sync complete"
        );
        merged
    }

    async fn persist(&self, params: &GlobalParameters) -> Result<()> {
        let raw = serde_json::to_string(params)?;
        self.bounded("save_global_params", self.store.put(GLOBAL_PARAMS_KEY, &raw))
            .await
    }

    /// Read the last published global parameters
    pub async fn load_global_params(&self) -> Result<Option<GlobalParameters>> {
        match self
            .bounded("load_global_params", self.store.get(GLOBAL_PARAMS_KEY))
            .await?
        {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Sync on a fixed interval until `cancel` fires
    ///
    /// The first sync runs immediately. Returns the number of syncs completed.
    pub async fn run_periodic(&self, interval: Duration, cancel: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut syncs = 0u64;
        info!(interval_secs = interval.as_secs(), "Starting periodic meta-learning sync");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sync_with(&cancel).await;
                    syncs += 1;
                }
            }
        }
        info!(syncs, "Periodic meta-learning sync stopped");
        syncs
    }
}
