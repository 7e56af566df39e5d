//! Integration tests for volume estimation

use std::sync::Arc;
use swap_ledger_sdk::metrics::SWAP_EXECUTED_TOTAL;
use swap_ledger_sdk::volume::{MetricsRegistry, SwapCounterRegistry, VolumeEstimator};

/// Registry backed by a fixed counter set, as an external metrics backend would be.
struct FixedRegistry(Vec<(String, f64)>);

impl MetricsRegistry for FixedRegistry {
    fn counter(&self, name: &str, tags: &[(&str, &str)]) -> Option<f64> {
        if name != SWAP_EXECUTED_TOTAL {
            return None;
        }
        let pair = tags.iter().find(|(k, _)| *k == "pair").map(|(_, v)| *v)?;
        self.0.iter().find(|(p, _)| p == pair).map(|(_, c)| *c)
    }

    fn counters_named(&self, name: &str) -> Vec<(Vec<(String, String)>, f64)> {
        if name != SWAP_EXECUTED_TOTAL {
            return Vec::new();
        }
        self.0
            .iter()
            .map(|(pair, count)| (vec![("pair".to_string(), pair.clone())], *count))
            .collect()
    }
}

#[test]
fn test_estimate_uses_canonical_pair_on_external_registry() {
    let registry = FixedRegistry(vec![("ETH-USDC".to_string(), 120.0)]);
    let estimator = VolumeEstimator::new(Arc::new(registry));

    assert!((estimator.estimate("USDC", "ETH") - 12.0).abs() < 1e-9);
    assert!((estimator.estimate("ETH", "USDC") - 12.0).abs() < 1e-9);
    assert_eq!(estimator.estimate("USDC", "BTC"), 0.0);
}

#[test]
fn test_recorded_swaps_accumulate_per_pair() {
    let registry = Arc::new(SwapCounterRegistry::new());
    for _ in 0..10 {
        registry.record_swap("ETH", "USDC");
    }
    for _ in 0..5 {
        registry.record_swap("USDC", "ETH");
    }
    registry.record_swap("BTC", "USDC");

    let estimator = VolumeEstimator::new(registry).with_average_swap_size(1.0);
    assert_eq!(estimator.estimate("ETH", "USDC"), 15.0);

    let volumes = estimator.all_volumes();
    assert_eq!(volumes.len(), 2);
    assert_eq!(volumes["BTC-USDC"], 1.0);
}
