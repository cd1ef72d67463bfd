//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Meridian configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub routing: RoutingConfig,
    pub features: FeatureConfig,
    pub meta: MetaConfig,
    pub store: StoreConfig,
}

/// Agent selection and feedback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Agents below this health score are never selected
    pub health_threshold: f64,
    /// Confidence reported when only one agent is eligible
    pub default_confidence: f64,
    /// Maximum queued feedback records before the oldest is dropped
    pub feedback_capacity: usize,
    /// Records consumed per maintenance cycle
    pub feedback_batch_size: usize,
}

/// Context feature extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Rolling window length for latency/cost observations
    pub window_size: usize,
    /// Samples required before min-max rescaling kicks in
    pub min_samples_for_scaling: u64,
    /// Token count that maps to a full token ratio
    pub token_scale: f64,
    /// Latency (ms) that maps to a full latency feature
    pub latency_scale_ms: f64,
}

/// Cross-tenant aggregation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    /// Privacy budget; lower means more noise
    pub epsilon: f64,
    pub weight_sensitivity: f64,
    pub agent_beta_sensitivity: f64,
    pub model_posterior_sensitivity: f64,
    /// Upper bound on any single state store call
    pub store_timeout_secs: u64,
    /// Interval between periodic syncs
    pub sync_interval_secs: u64,
}

/// Persistence settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database used as the shared state store; in-memory when unset
    pub database_path: Option<PathBuf>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            health_threshold: 0.4,
            default_confidence: 0.85,
            feedback_capacity: 500,
            feedback_batch_size: 50,
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            min_samples_for_scaling: 10,
            token_scale: 4000.0,
            latency_scale_ms: 10_000.0,
        }
    }
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            epsilon: 1.0,
            weight_sensitivity: 1.0,
            agent_beta_sensitivity: 10.0,
            model_posterior_sensitivity: 5.0,
            store_timeout_secs: 5,
            sync_interval_secs: 3600,
        }
    }
}

impl MetaConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

const KEYS: [&str; 15] = [
    "routing.health_threshold",
    "routing.default_confidence",
    "routing.feedback_capacity",
    "routing.feedback_batch_size",
    "features.window_size",
    "features.min_samples_for_scaling",
    "features.token_scale",
    "features.latency_scale_ms",
    "meta.epsilon",
    "meta.weight_sensitivity",
    "meta.agent_beta_sensitivity",
    "meta.model_posterior_sensitivity",
    "meta.store_timeout_secs",
    "meta.sync_interval_secs",
    "store.database_path",
];

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("MERIDIAN_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("meridian")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.routing.health_threshold) {
            return Err(anyhow!("routing.health_threshold must be between 0.0 and 1.0"));
        }
        if !(0.0..=1.0).contains(&self.routing.default_confidence) {
            return Err(anyhow!("routing.default_confidence must be between 0.0 and 1.0"));
        }
        if self.routing.feedback_capacity == 0 {
            return Err(anyhow!("routing.feedback_capacity must be at least 1"));
        }
        if self.features.window_size == 0 {
            return Err(anyhow!("features.window_size must be at least 1"));
        }
        if self.features.token_scale <= 0.0 || self.features.latency_scale_ms <= 0.0 {
            return Err(anyhow!("feature scales must be positive"));
        }
        if self.meta.epsilon <= 0.0 || !self.meta.epsilon.is_finite() {
            return Err(anyhow!("meta.epsilon must be a positive number"));
        }
        if self.meta.weight_sensitivity <= 0.0
            || self.meta.agent_beta_sensitivity <= 0.0
            || self.meta.model_posterior_sensitivity <= 0.0
        {
            return Err(anyhow!("meta sensitivities must be positive"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "routing.health_threshold" => Ok(self.routing.health_threshold.to_string()),
            "routing.default_confidence" => Ok(self.routing.default_confidence.to_string()),
            "routing.feedback_capacity" => Ok(self.routing.feedback_capacity.to_string()),
            "routing.feedback_batch_size" => Ok(self.routing.feedback_batch_size.to_string()),

            "features.window_size" => Ok(self.features.window_size.to_string()),
            "features.min_samples_for_scaling" => {
                Ok(self.features.min_samples_for_scaling.to_string())
            }
            "features.token_scale" => Ok(self.features.token_scale.to_string()),
            "features.latency_scale_ms" => Ok(self.features.latency_scale_ms.to_string()),

            "meta.epsilon" => Ok(self.meta.epsilon.to_string()),
            "meta.weight_sensitivity" => Ok(self.meta.weight_sensitivity.to_string()),
            "meta.agent_beta_sensitivity" => Ok(self.meta.agent_beta_sensitivity.to_string()),
            "meta.model_posterior_sensitivity" => {
                Ok(self.meta.model_posterior_sensitivity.to_string())
            }
            "meta.store_timeout_secs" => Ok(self.meta.store_timeout_secs.to_string()),
            "meta.sync_interval_secs" => Ok(self.meta.sync_interval_secs.to_string()),

            "store.database_path" => Ok(self
                .store
                .database_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(in-memory)".to_string())),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `meridian config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "routing.health_threshold" => {
                self.routing.health_threshold = parse_unit(key, value)?;
            }
            "routing.default_confidence" => {
                self.routing.default_confidence = parse_unit(key, value)?;
            }
            "routing.feedback_capacity" => {
                let capacity: usize = value
                    .parse()
                    .with_context(|| format!("Invalid feedback_capacity value: {}", value))?;
                if capacity == 0 {
                    return Err(anyhow!("Feedback capacity must be at least 1"));
                }
                self.routing.feedback_capacity = capacity;
            }
            "routing.feedback_batch_size" => {
                self.routing.feedback_batch_size = value
                    .parse()
                    .with_context(|| format!("Invalid feedback_batch_size value: {}", value))?;
            }

            "features.window_size" => {
                let size: usize = value
                    .parse()
                    .with_context(|| format!("Invalid window_size value: {}", value))?;
                if size == 0 {
                    return Err(anyhow!("Window size must be at least 1"));
                }
                self.features.window_size = size;
            }
            "features.min_samples_for_scaling" => {
                self.features.min_samples_for_scaling = value
                    .parse()
                    .with_context(|| format!("Invalid min_samples_for_scaling value: {}", value))?;
            }
            "features.token_scale" => {
                self.features.token_scale = parse_positive(key, value)?;
            }
            "features.latency_scale_ms" => {
                self.features.latency_scale_ms = parse_positive(key, value)?;
            }

            "meta.epsilon" => {
                self.meta.epsilon = parse_positive(key, value)?;
            }
            "meta.weight_sensitivity" => {
                self.meta.weight_sensitivity = parse_positive(key, value)?;
            }
            "meta.agent_beta_sensitivity" => {
                self.meta.agent_beta_sensitivity = parse_positive(key, value)?;
            }
            "meta.model_posterior_sensitivity" => {
                self.meta.model_posterior_sensitivity = parse_positive(key, value)?;
            }
            "meta.store_timeout_secs" => {
                self.meta.store_timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid store_timeout_secs value: {}", value))?;
            }
            "meta.sync_interval_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid sync_interval_secs value: {}", value))?;
                if secs == 0 {
                    return Err(anyhow!("Sync interval must be at least 1 second"));
                }
                self.meta.sync_interval_secs = secs;
            }

            "store.database_path" => {
                self.store.database_path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Run `meridian config list` for valid keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn parse_unit(key: &str, value: &str) -> anyhow::Result<f64> {
    let parsed: f64 = value
        .parse()
        .with_context(|| format!("Invalid value for {}: {}", key, value))?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err(anyhow!("{} must be between 0.0 and 1.0", key));
    }
    Ok(parsed)
}

fn parse_positive(key: &str, value: &str) -> anyhow::Result<f64> {
    let parsed: f64 = value
        .parse()
        .with_context(|| format!("Invalid value for {}: {}", key, value))?;
    if parsed <= 0.0 || !parsed.is_finite() {
        return Err(anyhow!("{} must be a positive number", key));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_routing_constants() {
        let config = Config::default();
        assert_eq!(config.routing.health_threshold, 0.4);
        assert_eq!(config.routing.default_confidence, 0.85);
        assert_eq!(config.routing.feedback_capacity, 500);
        assert_eq!(config.meta.epsilon, 1.0);
        assert_eq!(config.meta.agent_beta_sensitivity, 10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_set_and_get_roundtrip() {
        let mut config = Config::default();
        config.set("meta.epsilon", "0.5").unwrap();
        assert_eq!(config.get("meta.epsilon").unwrap(), "0.5");

        config.set("store.database_path", "/tmp/meridian.db").unwrap();
        assert_eq!(config.get("store.database_path").unwrap(), "/tmp/meridian.db");
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();
        assert!(config.set("meta.epsilon", "0").is_err());
        assert!(config.set("meta.epsilon", "abc").is_err());
        assert!(config.set("routing.health_threshold", "1.5").is_err());
        assert!(config.set("routing.feedback_capacity", "0").is_err());
        assert!(config.set("no.such.key", "1").is_err());
    }

    #[test]
    fn test_list_covers_every_key() {
        let config = Config::default();
        let listed = config.list().unwrap();
        assert_eq!(listed.len(), KEYS.len());
        assert!(listed.iter().any(|(k, _)| k == "meta.sync_interval_secs"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[meta]\nepsilon = 0.25\n").unwrap();
        assert_eq!(config.meta.epsilon, 0.25);
        assert_eq!(config.meta.weight_sensitivity, 1.0);
        assert_eq!(config.routing.feedback_capacity, 500);
    }
}
