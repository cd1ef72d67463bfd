//! Feature extractor with per-tenant rolling windows

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::{debug, trace};

use super::embedding::content_type_embedding;
use super::input::SelectionInput;
use super::stats::FeatureStats;
use super::{CONTEXT_DIM, ContextVector, FEATURE_NAMES, clamp_unit};
use crate::config::FeatureConfig;

/// Latency/cost features need this many samples before they leave the prior
const MIN_LATENCY_SAMPLES: usize = 5;
/// Neutral value used while a tenant has no history
const COLD_START_PRIOR: f64 = 0.5;
const SECONDS_PER_DAY: f64 = 86_400.0;
const RATE_SCALE: f64 = 100.0;
const CANDIDATE_SCALE: f64 = 10.0;
const MIN_PROMPT_CHARS: usize = 10;
const MIN_REMAINING_BUDGET: f64 = 0.01;

/// Rolling observations and running statistics for one tenant
#[derive(Debug, Default)]
struct TenantWindow {
    stats: [FeatureStats; CONTEXT_DIM],
    latencies_ms: VecDeque<f64>,
    costs_usd: VecDeque<f64>,
    budget_allocated: f64,
    requests: VecDeque<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ExtractorState {
    tenants: HashMap<String, TenantWindow>,
    /// Request timestamps keyed by `tenant/workspace`
    workspaces: HashMap<String, VecDeque<DateTime<Utc>>>,
    last_sweep: Option<DateTime<Utc>>,
}

impl ExtractorState {
    /// Drop workspaces with no request inside the activity span
    ///
    /// Runs at most once per span of request time.
    fn sweep_workspaces(&mut self, now: DateTime<Utc>) {
        let span = activity_span();
        if self
            .last_sweep
            .is_some_and(|last| now.signed_duration_since(last) < span)
        {
            return;
        }
        self.last_sweep = Some(now);

        let before = self.workspaces.len();
        self.workspaces.retain(|_, timestamps| {
            timestamps
                .back()
                .is_some_and(|last| now.signed_duration_since(*last) <= span)
        });
        let evicted = before - self.workspaces.len();
        if evicted > 0 {
            debug!(evicted, "Evicted idle workspaces");
        }
    }
}

fn activity_span() -> Duration {
    Duration::hours(1)
}

/// Turns [`SelectionInput`] into a normalized [`ContextVector`]
///
/// All mutable state sits behind a single mutex, so concurrent extraction
/// for the same tenant serializes its Welford updates.
#[derive(Debug)]
pub struct FeatureExtractor {
    config: FeatureConfig,
    state: Mutex<ExtractorState>,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor {
    /// Create an extractor with default configuration
    pub fn new() -> Self {
        Self::with_config(FeatureConfig::default())
    }

    /// Create an extractor with custom configuration
    pub fn with_config(config: FeatureConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ExtractorState::default()),
        }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Names of the produced dimensions, in order
    pub fn feature_names(&self) -> &'static [&'static str; CONTEXT_DIM] {
        &FEATURE_NAMES
    }

    fn lock(&self) -> MutexGuard<'_, ExtractorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Extract the context vector for a request
    ///
    /// Records the request against the tenant's rate window and folds every
    /// raw dimension into that tenant's running statistics.
    pub fn extract(&self, input: &SelectionInput) -> ContextVector {
        let now = input.timestamp.unwrap_or_else(Utc::now);
        let window = self.config.window_size;
        let min_samples = self.config.min_samples_for_scaling;

        let mut state = self.lock();
        state.sweep_workspaces(now);
        let ExtractorState {
            tenants,
            workspaces,
            ..
        } = &mut *state;

        let workspace_key = format!("{}/{}", input.tenant, input.workspace);
        let workspace = workspaces.entry(workspace_key).or_default();
        push_bounded(workspace, now, window);
        let workspace_activity =
            clamp_unit(count_since(workspace, now, activity_span()) / RATE_SCALE);

        let tenant = tenants.entry(input.tenant.clone()).or_default();
        push_bounded(&mut tenant.requests, now, window);

        let raw = self.raw_features(input, tenant, now, workspace_activity);

        let mut values = [0.0; CONTEXT_DIM];
        for (i, value) in raw.iter().enumerate() {
            tenant.stats[i].observe(*value);
            values[i] = tenant.stats[i].normalize(*value, min_samples);
        }

        trace!(tenant = %input.tenant, ?raw, "Raw context features");
        debug!(
            tenant = %input.tenant,
            task_type = %input.task_type,
            samples = tenant.stats[0].count,
            "Extracted context vector"
        );

        ContextVector::new(values)
    }

    fn raw_features(
        &self,
        input: &SelectionInput,
        tenant: &TenantWindow,
        now: DateTime<Utc>,
        workspace_activity: f64,
    ) -> [f64; CONTEXT_DIM] {
        let [emb_0, emb_1] = content_type_embedding(&input.task_type);
        let explicit_model = input.explicit_model().is_some();
        let has_overrides = input
            .provider_overrides
            .as_ref()
            .is_some_and(|o| !o.is_empty());
        let compression_active = input
            .compression_metadata
            .final_tokens
            .is_some_and(|t| t < input.tokens_in);

        [
            (input.tokens_in as f64 / self.config.token_scale).min(1.0),
            prompt_entropy(&input.prompt),
            self.tail_latency(tenant),
            budget_utilization(tenant),
            input.sla_tier.as_feature(),
            emb_0,
            emb_1,
            now.num_seconds_from_midnight() as f64 / SECONDS_PER_DAY,
            clamp_unit(count_since(&tenant.requests, now, Duration::seconds(60)) / RATE_SCALE),
            cost_pressure(tenant, input.projected_cost),
            flag(input.offline_mode),
            (input.candidate_models.len() as f64 / CANDIDATE_SCALE).min(1.0),
            flag(explicit_model),
            cost_variance(&tenant.costs_usd),
            self.average_latency(tenant),
            workspace_activity,
            flag(has_overrides),
            flag(compression_active),
        ]
    }

    fn tail_latency(&self, tenant: &TenantWindow) -> f64 {
        if tenant.latencies_ms.len() < MIN_LATENCY_SAMPLES {
            return COLD_START_PRIOR;
        }
        let samples: Vec<f64> = tenant.latencies_ms.iter().copied().collect();
        clamp_unit(percentile(&samples, 0.9) / self.config.latency_scale_ms)
    }

    fn average_latency(&self, tenant: &TenantWindow) -> f64 {
        if tenant.latencies_ms.len() < MIN_LATENCY_SAMPLES {
            return COLD_START_PRIOR;
        }
        let mean = tenant.latencies_ms.iter().sum::<f64>() / tenant.latencies_ms.len() as f64;
        clamp_unit(mean / self.config.latency_scale_ms)
    }

    /// Feed the rolling windows after a real request completes
    pub fn update_observation(
        &self,
        tenant: &str,
        latency_ms: Option<f64>,
        cost_usd: Option<f64>,
        budget_allocated: Option<f64>,
    ) {
        let window = self.config.window_size;
        let mut state = self.lock();
        let entry = state.tenants.entry(tenant.to_string()).or_default();

        if let Some(latency) = latency_ms.filter(|l| l.is_finite() && *l >= 0.0) {
            push_bounded(&mut entry.latencies_ms, latency, window);
        }
        if let Some(cost) = cost_usd.filter(|c| c.is_finite() && *c >= 0.0) {
            push_bounded(&mut entry.costs_usd, cost, window);
        }
        if let Some(budget) = budget_allocated.filter(|b| b.is_finite()) {
            entry.budget_allocated = budget;
        }

        trace!(
            tenant = %tenant,
            latency_samples = entry.latencies_ms.len(),
            cost_samples = entry.costs_usd.len(),
            "Recorded observation"
        );
    }

    /// Snapshot of a tenant's per-dimension statistics
    pub fn stats(&self, tenant: &str) -> Option<Vec<FeatureStats>> {
        self.lock()
            .tenants
            .get(tenant)
            .map(|t| t.stats.to_vec())
    }

    /// Number of tenants with extractor state
    pub fn tenant_count(&self) -> usize {
        self.lock().tenants.len()
    }

    /// Number of tracked `tenant/workspace` activity windows
    pub fn workspace_count(&self) -> usize {
        self.lock().workspaces.len()
    }

    /// Drop all state held for a tenant, including its workspaces
    ///
    /// Returns whether the tenant was known.
    pub fn forget_tenant(&self, tenant: &str) -> bool {
        let mut state = self.lock();
        let prefix = format!("{}/", tenant);
        state.workspaces.retain(|key, _| !key.starts_with(&prefix));
        state.tenants.remove(tenant).is_some()
    }
}

fn push_bounded<T>(window: &mut VecDeque<T>, value: T, capacity: usize) {
    while window.len() >= capacity.max(1) {
        window.pop_front();
    }
    window.push_back(value);
}

fn count_since(timestamps: &VecDeque<DateTime<Utc>>, now: DateTime<Utc>, span: Duration) -> f64 {
    timestamps
        .iter()
        .filter(|t| {
            let age = now.signed_duration_since(**t);
            age >= Duration::zero() && age <= span
        })
        .count() as f64
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

/// Shannon entropy of the prompt's alphanumeric characters, scaled by log2(36)
pub(crate) fn prompt_entropy(prompt: &str) -> f64 {
    if prompt.chars().count() < MIN_PROMPT_CHARS {
        return 0.0;
    }

    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in prompt.chars().filter(|c| c.is_alphanumeric()) {
        for lower in c.to_lowercase() {
            *counts.entry(lower).or_default() += 1;
            total += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }

    let entropy: f64 = counts
        .values()
        .map(|&n| {
            let p = n as f64 / total as f64;
            -p * p.log2()
        })
        .sum();

    clamp_unit(entropy / 36f64.log2())
}

/// Spend over the cost window
fn windowed_spend(tenant: &TenantWindow) -> f64 {
    tenant.costs_usd.iter().sum()
}

fn budget_utilization(tenant: &TenantWindow) -> f64 {
    if tenant.budget_allocated <= 0.0 {
        return COLD_START_PRIOR;
    }
    clamp_unit(windowed_spend(tenant) / tenant.budget_allocated)
}

fn cost_pressure(tenant: &TenantWindow, projected_cost: f64) -> f64 {
    if tenant.budget_allocated <= 0.0 {
        return COLD_START_PRIOR;
    }
    let remaining = (tenant.budget_allocated - windowed_spend(tenant)).max(MIN_REMAINING_BUDGET);
    clamp_unit((projected_cost.max(0.0) / remaining).min(1.0))
}

/// Coefficient of variation of observed costs
fn cost_variance(costs: &VecDeque<f64>) -> f64 {
    if costs.len() < 2 {
        return 0.0;
    }
    let n = costs.len() as f64;
    let mean = costs.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = costs.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / (n - 1.0);
    clamp_unit(variance.sqrt() / mean)
}

/// Linear-interpolated percentile, `q` in [0, 1]
fn percentile(samples: &[f64], q: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
