//! Persisted routing state and aggregated global parameters

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::{CONTEXT_DIM, FEATURE_NAMES, feature_index};
use crate::routing::BetaParams;

/// Key namespace for per-tenant agent routing state
pub const AGENT_ROUTING_PREFIX: &str = "bandit:agent_routing:";
/// Key namespace for per-tenant model router posteriors
pub const MODEL_ROUTER_PREFIX: &str = "ts_router:";
/// Key of the aggregated global parameters
pub const GLOBAL_PARAMS_KEY: &str = "meta_learning:global_params";

const STATE_SUFFIX: &str = ":state";

/// `bandit:agent_routing:<tenant>:state`
pub fn agent_routing_key(tenant: &str) -> String {
    format!("{}{}{}", AGENT_ROUTING_PREFIX, tenant, STATE_SUFFIX)
}

/// `ts_router:<tenant>:state`
pub fn model_router_key(tenant: &str) -> String {
    format!("{}{}{}", MODEL_ROUTER_PREFIX, tenant, STATE_SUFFIX)
}

/// Extract the tenant id from a state key in the given namespace
pub fn tenant_from_key<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)?
        .strip_suffix(STATE_SUFFIX)
        .filter(|tenant| !tenant.is_empty())
}

/// A tenant's agent routing state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantRoutingState {
    /// Feature name to learned weight
    #[serde(default)]
    pub context_weights: BTreeMap<String, f64>,
    /// Agent id to success posterior
    #[serde(default)]
    pub agent_bandits: BTreeMap<String, BetaParams>,
    #[serde(default)]
    pub total_trials: u64,
}

/// A tenant's model router posteriors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantModelState {
    /// Model id to Beta posterior
    #[serde(default)]
    pub posteriors: BTreeMap<String, BetaParams>,
}

/// Privacy-protected parameters averaged across tenants
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalParameters {
    /// Feature name to averaged weight
    pub context_weights: BTreeMap<String, f64>,
    /// Arm id (agent or model) to averaged Beta prior
    pub arm_priors: BTreeMap<String, BetaParams>,
    /// Tenants that contributed to this aggregate
    pub tenant_ids: BTreeSet<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub total_observations: u64,
}

impl GlobalParameters {
    pub fn is_empty(&self) -> bool {
        self.context_weights.is_empty() && self.arm_priors.is_empty()
    }

    /// Averaged weights laid out in context order; unknown features are 0
    pub fn weight_vector(&self) -> [f64; CONTEXT_DIM] {
        let mut weights = [0.0; CONTEXT_DIM];
        for (name, value) in &self.context_weights {
            if let Some(i) = feature_index(name) {
                weights[i] = *value;
            }
        }
        weights
    }

    pub fn prior(&self, arm_id: &str) -> Option<BetaParams> {
        self.arm_priors.get(arm_id).copied()
    }

    /// Combine two partial aggregates
    ///
    /// Weights and priors present in both are averaged; tenant sets are
    /// unioned and the later sync time wins.
    pub fn merge(mut self, other: GlobalParameters) -> GlobalParameters {
        for (name, value) in other.context_weights {
            self.context_weights
                .entry(name)
                .and_modify(|w| *w = (*w + value) / 2.0)
                .or_insert(value);
        }
        for (arm, prior) in other.arm_priors {
            self.arm_priors
                .entry(arm)
                .and_modify(|p| {
                    *p = BetaParams::new((p.alpha + prior.alpha) / 2.0, (p.beta + prior.beta) / 2.0)
                })
                .or_insert(prior);
        }
        self.tenant_ids.extend(other.tenant_ids);
        self.last_sync = match (self.last_sync, other.last_sync) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.total_observations += other.total_observations;
        self
    }
}

/// Build the weight map for a tenant from a dense vector
pub(crate) fn weights_by_name(weights: &[f64; CONTEXT_DIM]) -> BTreeMap<String, f64> {
    FEATURE_NAMES
        .iter()
        .zip(weights)
        .map(|(name, w)| (name.to_string(), *w))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_keys() {
        assert_eq!(agent_routing_key("acme"), "bandit:agent_routing:acme:state");
        assert_eq!(model_router_key("acme"), "ts_router:acme:state");
        assert_eq!(
            tenant_from_key("bandit:agent_routing:acme:state", AGENT_ROUTING_PREFIX),
            Some("acme")
        );
        assert_eq!(tenant_from_key("ts_router::state", MODEL_ROUTER_PREFIX), None);
        assert_eq!(tenant_from_key("ts_router:acme", MODEL_ROUTER_PREFIX), None);
    }

    #[test]
    fn test_tenant_state_wire_format() {
        let raw = r#"{
            "context_weights": {"token_count_norm": 0.25},
            "agent_bandits": {"writer": {"alpha": 3.0, "beta": 2.0}},
            "total_trials": 4
        }"#;
        let state: TenantRoutingState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.context_weights["token_count_norm"], 0.25);
        assert_eq!(state.agent_bandits["writer"], BetaParams::new(3.0, 2.0));
        assert_eq!(state.total_trials, 4);

        let models: TenantModelState =
            serde_json::from_str(r#"{"posteriors": {"m1": {"alpha": 1.5, "beta": 1.0}}}"#).unwrap();
        assert_eq!(models.posteriors["m1"].alpha, 1.5);
    }

    #[test]
    fn test_weight_vector_layout() {
        let mut params = GlobalParameters::default();
        params.context_weights.insert("sla_tier".to_string(), 0.7);
        params.context_weights.insert("not_a_feature".to_string(), 9.0);
        let weights = params.weight_vector();
        assert_eq!(weights[4], 0.7);
        assert_eq!(weights.iter().filter(|w| **w != 0.0).count(), 1);
    }

    #[test]
    fn test_merge() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();

        let mut a = GlobalParameters {
            last_sync: Some(late),
            total_observations: 3,
            ..Default::default()
        };
        a.context_weights.insert("sla_tier".to_string(), 0.2);
        a.arm_priors.insert("shared".to_string(), BetaParams::new(2.0, 4.0));
        a.tenant_ids.insert("t1".to_string());

        let mut b = GlobalParameters {
            last_sync: Some(early),
            total_observations: 5,
            ..Default::default()
        };
        b.arm_priors.insert("shared".to_string(), BetaParams::new(4.0, 2.0));
        b.arm_priors.insert("model-x".to_string(), BetaParams::new(5.0, 1.0));
        b.tenant_ids.insert("t2".to_string());

        let merged = a.merge(b);
        assert_eq!(merged.context_weights["sla_tier"], 0.2);
        assert_eq!(merged.arm_priors["shared"], BetaParams::new(3.0, 3.0));
        assert_eq!(merged.arm_priors["model-x"], BetaParams::new(5.0, 1.0));
        assert_eq!(merged.tenant_ids.len(), 2);
        assert_eq!(merged.last_sync, Some(late));
        assert_eq!(merged.total_observations, 8);
    }
}
