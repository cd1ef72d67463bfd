//! Per-agent linear reward model
//!
//! Each agent owns a weight vector mapping context to expected reward. The
//! current state is published as an immutable snapshot; an update builds a
//! fresh snapshot and swaps it in wholesale, so readers on the selection
//! path only ever clone an `Arc` and never observe a half-written vector.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::types::BetaParams;
use crate::features::{CONTEXT_DIM, ContextVector};

/// Exponential moving average coefficient for success rate and duration
const EMA_DECAY: f64 = 0.9;

/// Immutable published state of a reward model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardSnapshot {
    pub weights: [f64; CONTEXT_DIM],
    /// Updates applied so far
    pub observations: u64,
    pub success_rate: f64,
    pub average_duration_s: f64,
    pub successes: u64,
    pub failures: u64,
}

impl RewardSnapshot {
    fn new(success_rate: f64, average_duration_s: f64) -> Self {
        Self {
            weights: [0.0; CONTEXT_DIM],
            observations: 0,
            success_rate: success_rate.clamp(0.0, 1.0),
            average_duration_s: average_duration_s.max(0.0),
            successes: 0,
            failures: 0,
        }
    }

    /// Linear prediction `dot(weights, context)`
    pub fn predict(&self, context: &ContextVector) -> f64 {
        context.dot(&self.weights)
    }

    /// Beta posterior over success built from observed outcomes
    pub fn beta_params(&self) -> BetaParams {
        BetaParams::new(1.0 + self.successes as f64, 1.0 + self.failures as f64)
    }

    /// Step size for the next update: `1 / (1 + sqrt(n))`
    pub fn learning_rate(&self) -> f64 {
        1.0 / (1.0 + (self.observations as f64).sqrt())
    }
}

/// Summary of one gradient step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightUpdate {
    pub learning_rate: f64,
    pub prediction: f64,
    pub error: f64,
    /// L2 norm of the applied weight change
    pub delta_norm: f64,
}

/// Reward model for a single agent
#[derive(Debug)]
pub struct RewardModel {
    agent_id: String,
    current: RwLock<Arc<RewardSnapshot>>,
}

impl RewardModel {
    /// Create a model with zero weights and the given priors
    pub fn new(agent_id: impl Into<String>, success_rate: f64, average_duration_s: f64) -> Self {
        Self {
            agent_id: agent_id.into(),
            current: RwLock::new(Arc::new(RewardSnapshot::new(success_rate, average_duration_s))),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Current published state
    pub fn snapshot(&self) -> Arc<RewardSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn predict(&self, context: &ContextVector) -> f64 {
        self.snapshot().predict(context)
    }

    /// Apply one stochastic gradient step on squared error
    ///
    /// `weights += lr * (reward - dot(weights, context)) * context`, with
    /// EMA updates to the success rate and, when supplied, the duration.
    pub fn update(
        &self,
        context: &ContextVector,
        reward: f64,
        duration_s: Option<f64>,
        success: bool,
    ) -> WeightUpdate {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = Arc::clone(&guard);

        let learning_rate = previous.learning_rate();
        let prediction = previous.predict(context);
        let error = reward - prediction;

        let mut next = (*previous).clone();
        let mut delta_sq = 0.0;
        for (w, x) in next.weights.iter_mut().zip(context.as_slice()) {
            let delta = learning_rate * error * x;
            *w += delta;
            delta_sq += delta * delta;
        }

        next.observations += 1;
        next.success_rate = ema(previous.success_rate, if success { 1.0 } else { 0.0 });
        if success {
            next.successes += 1;
        } else {
            next.failures += 1;
        }
        if let Some(duration) = duration_s.filter(|d| d.is_finite() && *d >= 0.0) {
            next.average_duration_s = if previous.average_duration_s > 0.0 {
                ema(previous.average_duration_s, duration)
            } else {
                duration
            };
        }

        *guard = Arc::new(next);

        WeightUpdate {
            learning_rate,
            prediction,
            error,
            delta_norm: delta_sq.sqrt(),
        }
    }

    /// Install cold-start weights and success prior
    ///
    /// Only applies while the model has no observations of its own; returns
    /// whether the seed was taken.
    pub fn seed(&self, weights: [f64; CONTEXT_DIM], prior: Option<BetaParams>) -> bool {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.observations > 0 {
            return false;
        }

        let mut next = (**guard).clone();
        next.weights = weights.map(|w| if w.is_finite() { w } else { 0.0 });
        if let Some(prior) = prior {
            next.success_rate = prior.mean().clamp(0.0, 1.0);
        }
        *guard = Arc::new(next);
        true
    }
}

fn ema(old: f64, sample: f64) -> f64 {
    EMA_DECAY * old + (1.0 - EMA_DECAY) * sample
}
