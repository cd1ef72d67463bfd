//! Cross-tenant meta-learning
//!
//! Tenants persist their routing state to a shared [`StateStore`](crate::store::StateStore).
//! The [`MetaLearningAggregator`] periodically reads it back, adds Laplace
//! noise so no single tenant's contribution can be recovered, averages, and
//! publishes [`GlobalParameters`] that tenants use to seed cold models.

mod aggregator;
mod privacy;
mod types;

pub use aggregator::MetaLearningAggregator;
pub use privacy::LaplaceMechanism;
pub use types::{
    AGENT_ROUTING_PREFIX, GLOBAL_PARAMS_KEY, GlobalParameters, MODEL_ROUTER_PREFIX,
    TenantModelState, TenantRoutingState, agent_routing_key, model_router_key, tenant_from_key,
};
pub(crate) use types::weights_by_name;
