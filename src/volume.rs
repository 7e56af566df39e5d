//! # Volume Estimator
//!
//! Approximate traded volume per pair, derived from the cumulative
//! `swap_executed_total{pair=...}` counter:
//!
//! ```text
//! volume ≈ swap_count × average_swap_size   (default 0.1 units)
//! ```
//!
//! This is cumulative since process start, not a 24h window, and the swap size is an
//! assumption rather than a measured amount. Windowed volume belongs to the metrics
//! backend (e.g. `increase(swap_executed_total{pair="ETH-USDC"}[24h])`).

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::metrics::{self, SWAP_EXECUTED_TOTAL};

/// Assumed average swap size, in input-token units.
pub const DEFAULT_AVERAGE_SWAP_SIZE: f64 = 0.1;

/// Canonical pair key: symbols ordered lexicographically, joined by `-`.
pub fn normalize_pair(token_a: &str, token_b: &str) -> String {
    if token_a <= token_b {
        format!("{}-{}", token_a, token_b)
    } else {
        format!("{}-{}", token_b, token_a)
    }
}

/// Read access to cumulative counters.
pub trait MetricsRegistry: Send + Sync {
    /// Cumulative value of counter `name` with exactly `tags`, if it exists.
    fn counter(&self, name: &str, tags: &[(&str, &str)]) -> Option<f64>;

    /// Every counter named `name`, with its tag set.
    fn counters_named(&self, name: &str) -> Vec<(Vec<(String, String)>, f64)>;
}

type CounterKey = (String, Vec<(String, String)>);

fn counter_key(name: &str, tags: &[(&str, &str)]) -> CounterKey {
    let mut tags: Vec<(String, String)> = tags
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    tags.sort();
    (name.to_string(), tags)
}

/// In-process counter registry. Swaps recorded here are mirrored to the `metrics` facade.
#[derive(Default)]
pub struct SwapCounterRegistry {
    counters: DashMap<CounterKey, u64>,
}

impl SwapCounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &str, tags: &[(&str, &str)], by: u64) {
        *self.counters.entry(counter_key(name, tags)).or_insert(0) += by;
    }

    /// Records one executed swap for the canonical pair of `input`/`output`.
    pub fn record_swap(&self, input_symbol: &str, output_symbol: &str) {
        let pair = normalize_pair(input_symbol, output_symbol);
        self.increment(SWAP_EXECUTED_TOTAL, &[("pair", pair.as_str())], 1);
        metrics::increment_swap_executed(&pair);
    }
}

impl MetricsRegistry for SwapCounterRegistry {
    fn counter(&self, name: &str, tags: &[(&str, &str)]) -> Option<f64> {
        self.counters
            .get(&counter_key(name, tags))
            .map(|count| *count as f64)
    }

    fn counters_named(&self, name: &str) -> Vec<(Vec<(String, String)>, f64)> {
        self.counters
            .iter()
            .filter(|entry| entry.key().0 == name)
            .map(|entry| (entry.key().1.clone(), *entry.value() as f64))
            .collect()
    }
}

pub struct VolumeEstimator {
    registry: Arc<dyn MetricsRegistry>,
    average_swap_size: f64,
}

impl VolumeEstimator {
    pub fn new(registry: Arc<dyn MetricsRegistry>) -> Self {
        Self {
            registry,
            average_swap_size: DEFAULT_AVERAGE_SWAP_SIZE,
        }
    }

    pub fn with_average_swap_size(mut self, average_swap_size: f64) -> Self {
        self.average_swap_size = average_swap_size;
        self
    }

    /// Approximate cumulative volume for the pair. Order of the symbols does not matter.
    pub fn estimate(&self, token_a: &str, token_b: &str) -> f64 {
        let pair = normalize_pair(token_a, token_b);
        match self.registry.counter(SWAP_EXECUTED_TOTAL, &[("pair", pair.as_str())]) {
            Some(swap_count) => {
                debug!("Pool {} has {} total swaps (cumulative)", pair, swap_count);
                swap_count * self.average_swap_size
            }
            None => 0.0,
        }
    }

    /// Approximate cumulative volume for every pair with recorded swaps.
    pub fn all_volumes(&self) -> HashMap<String, f64> {
        let volumes: HashMap<String, f64> = self
            .registry
            .counters_named(SWAP_EXECUTED_TOTAL)
            .into_iter()
            .filter_map(|(tags, count)| {
                tags.into_iter()
                    .find(|(k, _)| k == "pair")
                    .map(|(_, pair)| (pair, count * self.average_swap_size))
            })
            .collect();

        debug!("Calculated volumes for {} pools", volumes.len());
        volumes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_pair() {
        assert_eq!(normalize_pair("USDC", "ETH"), "ETH-USDC");
        assert_eq!(normalize_pair("ETH", "USDC"), "ETH-USDC");
        assert_eq!(normalize_pair("ETH", "ETH"), "ETH-ETH");
    }

    #[test]
    fn test_estimate_reads_canonical_counter() {
        let registry = Arc::new(SwapCounterRegistry::new());
        for _ in 0..30 {
            registry.record_swap("USDC", "ETH");
        }
        let estimator = VolumeEstimator::new(registry.clone());

        let a = estimator.estimate("USDC", "ETH");
        let b = estimator.estimate("ETH", "USDC");
        assert_eq!(a, b);
        assert!((a - 3.0).abs() < 1e-9);
        assert_eq!(registry.counter(SWAP_EXECUTED_TOTAL, &[("pair", "ETH-USDC")]), Some(30.0));
    }

    #[test]
    fn test_unknown_pair_has_zero_volume() {
        let estimator = VolumeEstimator::new(Arc::new(SwapCounterRegistry::new()));
        assert_eq!(estimator.estimate("BTC", "ETH"), 0.0);
        assert!(estimator.all_volumes().is_empty());
    }

    #[test]
    fn test_all_volumes_with_custom_swap_size() {
        let registry = Arc::new(SwapCounterRegistry::new());
        registry.record_swap("ETH", "USDC");
        registry.record_swap("BTC", "ETH");
        registry.record_swap("ETH", "BTC");

        let volumes = VolumeEstimator::new(registry).with_average_swap_size(2.0).all_volumes();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes["BTC-ETH"], 4.0);
        assert_eq!(volumes["ETH-USDC"], 2.0);
    }
}
