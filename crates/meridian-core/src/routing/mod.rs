//! Adaptive routing with online learning
//!
//! Two routers live here:
//!
//! - **Agent routing**: a contextual bandit. Each agent has a linear
//!   [`RewardModel`] over the 18-dimensional context vector; the
//!   [`BanditSelector`] scores eligible agents by predicted reward discounted
//!   by health, success rate and free capacity. The [`RoutingOrchestrator`]
//!   tracks live load, turns completions into rewards and applies them in
//!   batches.
//!
//! - **Model routing**: a Thompson Sampling [`ModelRouter`] over backend
//!   model ids, one Beta posterior per (tenant, model).
//!
//! Both export their state in the shapes the meta-learning aggregator reads,
//! and both can be seeded from the aggregated global parameters.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use meridian_core::features::{FeatureExtractor, SelectionInput};
//! use meridian_core::routing::{AgentCapability, RoutingOrchestrator};
//!
//! let orchestrator = RoutingOrchestrator::new(
//!     Arc::new(FeatureExtractor::new()),
//!     Default::default(),
//! );
//! orchestrator.register_agent(AgentCapability::new("summarizer").with_capacity(4));
//!
//! let input = SelectionInput::new("acme", "summarize").with_tokens(1200);
//! let routed = orchestrator.route_request(&input, &[])?;
//!
//! // ... run the task on routed.selection.agent_id ...
//!
//! orchestrator.complete(&routed.selection.agent_id, &routed.context, true, Some(3.2), Some(0.9));
//! orchestrator.process_pending_feedback().await;
//! ```

mod feedback;
mod orchestrator;
mod reward;
mod router;
mod selector;
mod thompson;
mod types;

pub use feedback::{DEFAULT_FEEDBACK_CAPACITY, FeedbackQueue};
pub use orchestrator::{
    AgentDiscovery, BatchReport, RoutedRequest, RoutingOrchestrator, StaticAgentDiscovery,
    compute_reward,
};
pub use reward::{RewardModel, RewardSnapshot, WeightUpdate};
pub use router::{ModelDecision, ModelDecisionReason, ModelRouter};
pub use selector::BanditSelector;
pub use thompson::{ArmStats, BanditDraw, ThompsonSamplingBandit};
pub use types::{
    AgentCapability, AgentSelection, BetaParams, CompletionOutcome, FeedbackRecord,
    SelectionCriteria,
};
