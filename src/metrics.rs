// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! increment_counter {
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter,
};

use std::time::Duration;

/// Counter read back by the volume estimator, labeled by canonical pair.
pub const SWAP_EXECUTED_TOTAL: &str = "swap_executed_total";

/// Initializes the descriptions for all the metrics in the SDK.
/// This should be called once at startup.
pub fn describe_metrics() {
    describe_counter!(
        "idempotency_requests_total",
        Unit::Count,
        "Guarded requests, labeled by outcome (executed, replayed, mismatch, in_flight, not_cached, abandoned)."
    );
    describe_counter!(
        "token_merge_exercises_total",
        Unit::Count,
        "Merge exercises submitted to the ledger, labeled by status (ok, failed)."
    );
    describe_counter!(
        "token_merge_outcomes_total",
        Unit::Count,
        "Merge folds completed, labeled by outcome (merged, unchanged, no_holdings, skipped, failed)."
    );
    describe_histogram!(
        "token_merge_duration_ms",
        "Wall time of a complete merge fold in milliseconds."
    );
    describe_counter!(
        "token_mint_total",
        Unit::Count,
        "Token mint operations, labeled by status (ok, validation, partial, failed)."
    );
    describe_counter!(
        "pool_directory_updates_total",
        Unit::Count,
        "Pool directory upserts, labeled by result (applied, ignored)."
    );
    describe_gauge!("pool_directory_size", "Number of pools in the directory.");
    describe_counter!(
        SWAP_EXECUTED_TOTAL,
        Unit::Count,
        "Swaps executed, labeled by canonical pair (e.g. ETH-USDC)."
    );
}

pub fn increment_idempotency_outcome(outcome: &'static str) {
    increment_counter!("idempotency_requests_total", "outcome" => outcome);
}

pub fn increment_merge_exercise(status: &'static str) {
    increment_counter!("token_merge_exercises_total", "status" => status);
}

pub fn increment_merge_outcome(outcome: &'static str) {
    increment_counter!("token_merge_outcomes_total", "outcome" => outcome);
}

pub fn record_merge_duration(duration: Duration) {
    histogram!("token_merge_duration_ms", duration.as_secs_f64() * 1000.0);
}

pub fn increment_mint(status: &'static str) {
    increment_counter!("token_mint_total", "status" => status);
}

pub fn increment_pool_directory_update(result: &'static str) {
    increment_counter!("pool_directory_updates_total", "result" => result);
}

pub fn set_pool_directory_size(size: f64) {
    gauge!("pool_directory_size", size);
}

pub fn increment_swap_executed(pair: &str) {
    counter!(SWAP_EXECUTED_TOTAL, 1, "pair" => pair.to_string());
}
