//! Meridian Core Library
//!
//! Adaptive routing decision engine:
//! - Context feature extraction (18 normalized dimensions per request)
//! - Contextual-bandit agent selection with per-agent reward models
//! - Thompson-sampling model routing
//! - Cross-tenant meta-learning under differential privacy
//! - Key-value state persistence (in-memory, SQLite)

pub mod config;
pub mod error;
pub mod features;
pub mod meta;
pub mod metrics;
pub mod routing;
pub mod store;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::features::{ContextVector, FeatureExtractor, SelectionInput, SlaTier};
    pub use crate::meta::{GlobalParameters, MetaLearningAggregator};
    pub use crate::routing::{AgentCapability, AgentSelection, ModelRouter, RoutingOrchestrator};
    pub use crate::store::{InMemoryStateStore, SqliteStateStore, StateStore};
}
