//! Types for adaptive agent routing
//!
//! This module defines the records exchanged between the router and its
//! callers: agent capabilities, selection results, and outcome feedback.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::ContextVector;

/// Capabilities and live status of an execution agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCapability {
    /// Unique agent identifier
    pub agent_id: String,
    /// Human-readable name
    pub name: String,
    /// Agent family (e.g. "llm", "tool", "pipeline")
    pub agent_type: String,
    /// Specialization tags used for constraint matching
    pub specializations: BTreeSet<String>,
    /// Task types this agent handles; empty means any
    pub task_types: BTreeSet<String>,
    /// Tasks currently in flight
    pub current_load: u32,
    /// Maximum concurrent tasks
    pub max_parallel_tasks: u32,
    /// Rolling success rate (0.0 to 1.0)
    pub success_rate: f64,
    /// Rolling average task duration in seconds
    pub average_duration_s: f64,
    /// Health score (0.0 to 1.0)
    pub health_score: f64,
}

impl AgentCapability {
    /// Create a new agent with defaults
    pub fn new(agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            name: agent_id.clone(),
            agent_id,
            agent_type: "general".to_string(),
            specializations: BTreeSet::new(),
            task_types: BTreeSet::new(),
            current_load: 0,
            max_parallel_tasks: 4,
            success_rate: 0.8,
            average_duration_s: 0.0,
            health_score: 1.0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = agent_type.into();
        self
    }

    pub fn with_specializations<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.specializations = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_task_types<I, S>(mut self, task_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.task_types = task_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capacity(mut self, max_parallel_tasks: u32) -> Self {
        self.max_parallel_tasks = max_parallel_tasks;
        self
    }

    pub fn with_load(mut self, current_load: u32) -> Self {
        self.current_load = current_load;
        self
    }

    pub fn with_success_rate(mut self, rate: f64) -> Self {
        self.success_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_average_duration(mut self, seconds: f64) -> Self {
        self.average_duration_s = seconds.max(0.0);
        self
    }

    pub fn with_health(mut self, score: f64) -> Self {
        self.health_score = score.clamp(0.0, 1.0);
        self
    }

    /// Whether this agent accepts the given task type
    pub fn handles(&self, task_type: &str) -> bool {
        self.task_types.is_empty() || self.task_types.contains(task_type)
    }

    /// Whether this agent satisfies the required specializations
    ///
    /// An empty requirement always matches; otherwise one shared tag is enough.
    pub fn satisfies(&self, required: &[String]) -> bool {
        required.is_empty() || required.iter().any(|tag| self.specializations.contains(tag))
    }

    /// Fraction of capacity still free
    pub fn load_factor(&self) -> f64 {
        if self.max_parallel_tasks == 0 {
            return 0.0;
        }
        (1.0 - self.current_load as f64 / self.max_parallel_tasks as f64).max(0.0)
    }
}

/// Constraints a caller places on a routing decision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionCriteria {
    pub task_type: String,
    pub required_specializations: Vec<String>,
}

impl SelectionCriteria {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            required_specializations: Vec::new(),
        }
    }

    pub fn with_specializations(mut self, specializations: Vec<String>) -> Self {
        self.required_specializations = specializations;
        self
    }
}

/// Result of a routing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSelection {
    /// Selected agent
    pub agent_id: String,
    /// Confidence score (0.0 to 1.0)
    pub confidence: f64,
    /// Expected probability of success
    pub expected_success: f64,
    /// Expected task duration in seconds
    pub expected_duration_s: f64,
    /// Why this agent was chosen
    pub reasoning: String,
    /// Runner-up agents with their scores, best first
    pub alternatives: Vec<(String, f64)>,
}

/// Outcome feedback waiting for the batched learning step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub agent_id: String,
    pub context: ContextVector,
    pub reward: f64,
    pub success: bool,
    pub duration_s: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn new(
        agent_id: impl Into<String>,
        context: ContextVector,
        reward: f64,
        success: bool,
        duration_s: Option<f64>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            context,
            reward,
            success,
            duration_s,
            recorded_at: Utc::now(),
        }
    }
}

/// Result of reporting a task completion
///
/// Completion never fails; unknown agents are reported through `accepted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub agent_id: String,
    /// Whether the agent was known and the feedback queued
    pub accepted: bool,
    /// Scalar reward computed for the outcome
    pub reward: f64,
    /// Load after the decrement
    pub current_load: u32,
    /// Whether queueing this record evicted the oldest one
    pub evicted_oldest: bool,
}

/// Beta distribution parameters (Thompson-sampling sufficient statistics)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaParams {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for BetaParams {
    fn default() -> Self {
        // Uninformed prior (Beta(1,1) = uniform distribution)
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

impl BetaParams {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    /// Mean of the distribution
    pub fn mean(&self) -> f64 {
        let total = self.alpha + self.beta;
        if total <= 0.0 {
            return 0.5;
        }
        self.alpha / total
    }

    /// Standard deviation of the distribution
    pub fn uncertainty(&self) -> f64 {
        let ab = self.alpha + self.beta;
        if ab <= 0.0 {
            return 0.5;
        }
        ((self.alpha * self.beta) / (ab * ab * (ab + 1.0))).sqrt()
    }

    /// Observations beyond the uniform prior
    pub fn observations(&self) -> f64 {
        (self.alpha + self.beta - 2.0).max(0.0)
    }
}
