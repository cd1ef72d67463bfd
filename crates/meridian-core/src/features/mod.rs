//! Context feature extraction
//!
//! Turns raw per-request metadata into the fixed-length context vector the
//! bandit reward models consume.
//!
//! - **SelectionInput**: what the caller knows about a request
//! - **FeatureExtractor**: per-tenant rolling windows and running statistics
//! - **FeatureStats**: Welford mean/variance plus min/max used for
//!   adaptive min-max scaling
//! - **ContextVector**: the 18 normalized dimensions, each in [0, 1]
//!
//! Scaling is two-phase: early traffic uses the heuristic raw values
//! (already designed to sit in [0, 1]), and once a dimension has seen enough
//! samples its observed range takes over.
//!
//! ## Example
//!
//! ```rust,ignore
//! use meridian_core::features::{FeatureExtractor, SelectionInput, SlaTier};
//!
//! let extractor = FeatureExtractor::new();
//! let input = SelectionInput::new("tenant-a", "summarize")
//!     .with_tokens(1200)
//!     .with_sla_tier(SlaTier::Premium);
//! let context = extractor.extract(&input);
//!
//! // after the request completes
//! extractor.update_observation("tenant-a", Some(840.0), Some(0.002), None);
//! ```

mod embedding;
mod extractor;
mod input;
mod stats;

pub use embedding::content_type_embedding;
pub use extractor::FeatureExtractor;
pub use input::{CompressionMetadata, SelectionInput, SlaTier};
pub use stats::FeatureStats;

use serde::{Deserialize, Serialize};

/// Number of dimensions in a context vector
pub const CONTEXT_DIM: usize = 18;

/// Semantic name of each context dimension, in order
pub const FEATURE_NAMES: [&str; CONTEXT_DIM] = [
    "token_count_norm",
    "prompt_entropy",
    "latency_p90_norm",
    "budget_utilization",
    "sla_tier",
    "content_type_emb_0",
    "content_type_emb_1",
    "time_of_day",
    "request_rate",
    "cost_pressure",
    "offline_mode",
    "candidate_count",
    "explicit_model",
    "cost_variance",
    "avg_latency_norm",
    "workspace_activity",
    "provider_preference",
    "compression_active",
];

/// Index of a named feature
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|n| *n == name)
}

/// Normalized request context; every dimension lies in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextVector {
    values: [f64; CONTEXT_DIM],
}

impl ContextVector {
    /// Build a vector, clamping every dimension into [0, 1]
    pub fn new(values: [f64; CONTEXT_DIM]) -> Self {
        Self {
            values: values.map(clamp_unit),
        }
    }

    /// All-zero context
    pub fn zeros() -> Self {
        Self {
            values: [0.0; CONTEXT_DIM],
        }
    }

    /// Same value in every dimension
    pub fn splat(value: f64) -> Self {
        Self::new([value; CONTEXT_DIM])
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn as_array(&self) -> &[f64; CONTEXT_DIM] {
        &self.values
    }

    /// Dot product with a weight vector
    pub fn dot(&self, weights: &[f64; CONTEXT_DIM]) -> f64 {
        self.values
            .iter()
            .zip(weights.iter())
            .map(|(x, w)| x * w)
            .sum()
    }
}

impl Default for ContextVector {
    fn default() -> Self {
        Self::zeros()
    }
}

/// Clamp into [0, 1], mapping NaN to 0
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
