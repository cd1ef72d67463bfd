//! Raw per-request metadata supplied by the caller

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Service level of the requesting tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaTier {
    Basic,
    #[default]
    Standard,
    Premium,
    Enterprise,
}

impl SlaTier {
    /// Position of the tier on the unit interval
    pub fn as_feature(&self) -> f64 {
        match self {
            Self::Basic => 0.25,
            Self::Standard => 0.5,
            Self::Premium => 0.75,
            Self::Enterprise => 1.0,
        }
    }
}

impl std::fmt::Display for SlaTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Standard => write!(f, "standard"),
            Self::Premium => write!(f, "premium"),
            Self::Enterprise => write!(f, "enterprise"),
        }
    }
}

impl std::str::FromStr for SlaTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "standard" => Ok(Self::Standard),
            "premium" => Ok(Self::Premium),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(format!("Unknown SLA tier: {}", s)),
        }
    }
}

/// Prompt compression applied upstream of routing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionMetadata {
    /// Token count after compression, if compression ran
    pub final_tokens: Option<u64>,
}

/// Everything the caller knows about a request before it is routed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionInput {
    pub tokens_in: u64,
    pub prompt: String,
    pub tenant: String,
    pub workspace: String,
    pub sla_tier: SlaTier,
    pub task_type: String,
    /// Projected cost of serving this request in USD
    pub projected_cost: f64,
    pub offline_mode: bool,
    pub requested_model: Option<String>,
    pub candidate_models: Vec<String>,
    pub provider_overrides: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub compression_metadata: CompressionMetadata,
    /// Request time; the extractor uses the wall clock when absent
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl SelectionInput {
    /// Create an input with neutral defaults
    pub fn new(tenant: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            tokens_in: 0,
            prompt: String::new(),
            tenant: tenant.into(),
            workspace: "default".to_string(),
            sla_tier: SlaTier::Standard,
            task_type: task_type.into(),
            projected_cost: 0.0,
            offline_mode: false,
            requested_model: None,
            candidate_models: Vec::new(),
            provider_overrides: None,
            compression_metadata: CompressionMetadata::default(),
            timestamp: None,
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_in = tokens;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_sla_tier(mut self, tier: SlaTier) -> Self {
        self.sla_tier = tier;
        self
    }

    pub fn with_projected_cost(mut self, cost: f64) -> Self {
        self.projected_cost = cost;
        self
    }

    pub fn with_offline_mode(mut self, offline: bool) -> Self {
        self.offline_mode = offline;
        self
    }

    pub fn with_requested_model(mut self, model: impl Into<String>) -> Self {
        self.requested_model = Some(model.into());
        self
    }

    pub fn with_candidate_models(mut self, models: Vec<String>) -> Self {
        self.candidate_models = models;
        self
    }

    pub fn with_provider_overrides(mut self, overrides: BTreeMap<String, String>) -> Self {
        self.provider_overrides = Some(overrides);
        self
    }

    pub fn with_final_tokens(mut self, tokens: u64) -> Self {
        self.compression_metadata.final_tokens = Some(tokens);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// The explicitly requested model, ignoring blank values
    pub fn explicit_model(&self) -> Option<&str> {
        self.requested_model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}
