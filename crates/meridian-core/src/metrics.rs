//! Counter metrics emitted by the meta-learning layer
//!
//! Metric names:
//! - `meta_learning_aggregations_total{type, tenant_count}`
//! - `meta_learning_errors_total{operation}`
//! - `meta_learning_syncs_total`

use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::info;

pub const AGGREGATIONS_TOTAL: &str = "meta_learning_aggregations_total";
pub const ERRORS_TOTAL: &str = "meta_learning_errors_total";
pub const SYNCS_TOTAL: &str = "meta_learning_syncs_total";

/// Destination for counter increments
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str, labels: &[(&str, String)]);
}

/// Render `name{k="v",...}` with labels sorted by key
pub fn series_key(name: &str, labels: &[(&str, String)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<&(&str, String)> = labels.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let rendered: Vec<String> = sorted
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect();
    format!("{}{{{}}}", name, rendered.join(","))
}

/// Counters kept in memory, readable for inspection and tests
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: RwLock<BTreeMap<String, u64>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of one labelled series
    pub fn counter(&self, name: &str, labels: &[(&str, String)]) -> u64 {
        let key = series_key(name, labels);
        match self.counters.read() {
            Ok(counters) => counters.get(&key).copied().unwrap_or(0),
            Err(poisoned) => poisoned.into_inner().get(&key).copied().unwrap_or(0),
        }
    }

    /// Sum over every series of a metric
    pub fn total(&self, name: &str) -> u64 {
        self.snapshot()
            .into_iter()
            .filter(|(key, _)| key == name || key.starts_with(&format!("{}{{", name)))
            .map(|(_, v)| v)
            .sum()
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        match self.counters.read() {
            Ok(counters) => counters.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, name: &str, labels: &[(&str, String)]) {
        let key = series_key(name, labels);
        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        *counters.entry(key).or_insert(0) += 1;
    }
}

/// Sink that reports each increment as a tracing event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn increment(&self, name: &str, labels: &[(&str, String)]) {
        info!(
            target: "meridian::metrics",
            metric = %series_key(name, labels),
            "counter incremented"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_key_sorts_labels() {
        let key = series_key(
            AGGREGATIONS_TOTAL,
            &[("type", "agent_routing".to_string()), ("tenant_count", "2".to_string())],
        );
        assert_eq!(
            key,
            "meta_learning_aggregations_total{tenant_count=\"2\",type=\"agent_routing\"}"
        );
        assert_eq!(series_key(SYNCS_TOTAL, &[]), SYNCS_TOTAL);
    }

    #[test]
    fn test_in_memory_counts() {
        let metrics = InMemoryMetrics::new();
        metrics.increment(SYNCS_TOTAL, &[]);
        metrics.increment(SYNCS_TOTAL, &[]);
        metrics.increment(ERRORS_TOTAL, &[("operation", "load".to_string())]);
        metrics.increment(ERRORS_TOTAL, &[("operation", "save".to_string())]);

        assert_eq!(metrics.counter(SYNCS_TOTAL, &[]), 2);
        assert_eq!(
            metrics.counter(ERRORS_TOTAL, &[("operation", "load".to_string())]),
            1
        );
        assert_eq!(metrics.total(ERRORS_TOTAL), 2);
        assert_eq!(metrics.total(AGGREGATIONS_TOTAL), 0);
    }
}
