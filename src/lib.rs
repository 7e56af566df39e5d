//! # Swap Ledger SDK
//!
//! Integration layer for a ledger-backed token-swap application. The SDK sits between
//! an HTTP surface and a distributed ledger client and provides the pieces that need
//! care around ordering and at-most-once execution.
//!
//! ## Overview
//!
//! - **Idempotency**: request fingerprints (method, path, principal, SHA-256 of the body)
//!   and a guard that runs each logical request at most once, replaying cached responses
//! - **Token merge**: sequential folding of fragmented token holdings into one contract
//!   per symbol after trading activity
//! - **Mint**: two-token mint with fail-fast validation and explicit partial-failure
//!   reporting
//! - **Pool directory**: concurrent registry of pool contract ids with snapshot reads
//! - **Volume**: approximate traded volume from swap counters
//!
//! ## Request Flow
//!
//! An inbound mutating request is fingerprinted and passed through the
//! [`IdempotencyGuard`]. On first execution the business operation (mint, or a swap
//! followed by a merge) drives the [`LedgerGateway`]; a cacheable result is stored under
//! the fingerprint so retries replay it instead of repeating ledger side effects.

// Idempotency
/// Error taxonomy and client error payloads
pub mod errors;
/// Request fingerprinting and idempotency key validation
pub mod fingerprint;
/// Idempotency record storage (in-memory, Redis)
pub mod idempotency_cache;
/// At-most-once request guard
pub mod idempotency;

// Ledger
/// Ledger gateway trait and contract types
pub mod ledger;
/// In-process ledger for local runs and tests
pub mod sandbox_ledger;
/// Sequential token merge coordination
pub mod token_merge;
/// Token pair minting
pub mod token_mint;

// Directory & Metrics
/// Pool id to contract registry
pub mod pool_directory;
/// Approximate volume from swap counters
pub mod volume;
/// Metrics and observability
pub mod metrics;

// Settings & Configuration
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use errors::{ApiError, ErrorCode, SdkError, SdkResult};
pub use fingerprint::RequestFingerprint;
pub use idempotency::{GuardedResponse, IdempotencyGuard};
pub use idempotency_cache::{CachedResponse, IdempotencyCache, InMemoryIdempotencyCache};
pub use ledger::{ContractId, LedgerGateway};
pub use pool_directory::PoolDirectory;
pub use settings::Settings;
pub use token_merge::{MergeOutcome, SequentialMergeCoordinator};
pub use token_mint::TokenMintService;
pub use volume::VolumeEstimator;
