//! # Idempotency Guard
//!
//! Enforces at-most-once execution of mutating requests.
//!
//! ## Flow
//!
//! 1. The guard atomically reserves the cache key with an `InFlight` record
//!    (`insert_if_absent`). Only the request that wins the reservation runs `compute`.
//! 2. A cacheable outcome (anything below 500) replaces the reservation with a
//!    `Completed` record. A 5xx outcome or a `compute` error releases the reservation,
//!    so a retry executes again. So does dropping the guarded future before it finishes
//!    (client disconnect, timeout, panic in `compute`): the release is then spawned on the
//!    runtime. Reservations carry their own short TTL as a last resort.
//! 3. A request that finds a `Completed` record with the same fingerprint gets the stored
//!    response back without re-running side effects. One that finds an `InFlight` record
//!    is rejected with [`SdkError::IdempotencyInFlight`].
//!
//! With a caller-supplied idempotency key ([`IdempotencyGuard::guard_keyed`]) the record
//! lives under that key, and reusing the key for a different request fails with
//! [`SdkError::IdempotencyKeyBodyMismatch`].
//!
//! The guard never retries `compute`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{SdkError, SdkResult};
use crate::fingerprint::{validate_idempotency_key, RequestFingerprint, DEFAULT_MAX_KEY_LENGTH};
use crate::idempotency_cache::{
    CachedResponse, IdempotencyCache, IdempotencyRecord, RecordState, DEFAULT_IDEMPOTENCY_TTL,
    DEFAULT_IN_FLIGHT_TTL,
};
use crate::metrics;

/// Response header carrying the ledger command id, recorded alongside the cached response.
pub const COMMAND_ID_HEADER: &str = "x-command-id";

// A reservation can vanish between a failed insert and the follow-up read.
const RESERVE_ATTEMPTS: usize = 3;

/// Response returned by the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedResponse {
    pub response: CachedResponse,
    /// `true` when served from the cache without running `compute`.
    pub replayed: bool,
}

/// Holds an `InFlight` reservation until the request completes.
///
/// Dropped while still armed, it releases the reservation from a spawned task.
struct Reservation {
    cache: Arc<dyn IdempotencyCache>,
    key: String,
    reservation_id: String,
    armed: bool,
}

impl Reservation {
    fn commit(&mut self) {
        self.armed = false;
    }

    async fn release(mut self) {
        self.armed = false;
        release_reservation(self.cache.as_ref(), &self.key, &self.reservation_id).await;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        metrics::increment_idempotency_outcome("abandoned");
        let cache = self.cache.clone();
        let key = std::mem::take(&mut self.key);
        let reservation_id = std::mem::take(&mut self.reservation_id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(key = %key, "Guarded request dropped before completion, releasing reservation");
                handle.spawn(async move {
                    release_reservation(cache.as_ref(), &key, &reservation_id).await;
                });
            }
            Err(_) => warn!(
                key = %key,
                "No runtime to release reservation, it expires with the in-flight TTL"
            ),
        }
    }
}

async fn release_reservation(cache: &dyn IdempotencyCache, key: &str, reservation_id: &str) {
    match cache.remove_reservation(key, reservation_id).await {
        Ok(true) => debug!(key, "Released idempotency reservation"),
        Ok(false) => debug!(key, "Reservation already replaced or expired"),
        Err(e) => warn!(key, error = %e, "Failed to release idempotency reservation"),
    }
}

pub struct IdempotencyGuard {
    cache: Arc<dyn IdempotencyCache>,
    ttl: Duration,
    in_flight_ttl: Duration,
    max_key_length: usize,
}

impl IdempotencyGuard {
    pub fn new(cache: Arc<dyn IdempotencyCache>) -> Self {
        Self {
            cache,
            ttl: DEFAULT_IDEMPOTENCY_TTL,
            in_flight_ttl: DEFAULT_IN_FLIGHT_TTL,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
        }
    }

    /// Lifetime of completed records.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Lifetime of `InFlight` reservations.
    pub fn with_in_flight_ttl(mut self, in_flight_ttl: Duration) -> Self {
        self.in_flight_ttl = in_flight_ttl;
        self
    }

    pub fn with_max_key_length(mut self, max_key_length: usize) -> Self {
        self.max_key_length = max_key_length;
        self
    }

    /// Runs `compute` at most once per fingerprint.
    pub async fn guard<F, Fut>(
        &self,
        fingerprint: &RequestFingerprint,
        compute: F,
    ) -> SdkResult<GuardedResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SdkResult<CachedResponse>>,
    {
        let cache_key = fingerprint.to_cache_key();
        self.run(&cache_key, None, fingerprint, compute).await
    }

    /// Runs `compute` at most once per caller-supplied idempotency key.
    ///
    /// Without a key this falls back to [`IdempotencyGuard::guard`]. A key that was first
    /// used for a different request fails with `IdempotencyKeyBodyMismatch`.
    pub async fn guard_keyed<F, Fut>(
        &self,
        idempotency_key: Option<&str>,
        fingerprint: &RequestFingerprint,
        compute: F,
    ) -> SdkResult<GuardedResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SdkResult<CachedResponse>>,
    {
        validate_idempotency_key(idempotency_key, self.max_key_length)?;

        match idempotency_key {
            Some(key) => self.run(key, Some(key), fingerprint, compute).await,
            None => self.guard(fingerprint, compute).await,
        }
    }

    async fn run<F, Fut>(
        &self,
        cache_key: &str,
        caller_key: Option<&str>,
        fingerprint: &RequestFingerprint,
        compute: F,
    ) -> SdkResult<GuardedResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SdkResult<CachedResponse>>,
    {
        let reservation =
            IdempotencyRecord::in_flight(fingerprint.to_cache_key(), fingerprint.body_hash.clone());

        for _ in 0..RESERVE_ATTEMPTS {
            if self
                .cache
                .insert_if_absent(cache_key, reservation.clone(), self.in_flight_ttl)
                .await?
            {
                return self.execute(cache_key, reservation, compute).await;
            }

            if let Some(existing) = self.cache.get(cache_key).await? {
                return self.resolve_existing(cache_key, caller_key, fingerprint, existing);
            }
            debug!(key = cache_key, "Reservation released concurrently, retrying");
        }

        metrics::increment_idempotency_outcome("in_flight");
        Err(SdkError::IdempotencyInFlight {
            key: caller_key.unwrap_or(cache_key).to_string(),
        })
    }

    fn resolve_existing(
        &self,
        cache_key: &str,
        caller_key: Option<&str>,
        fingerprint: &RequestFingerprint,
        existing: IdempotencyRecord,
    ) -> SdkResult<GuardedResponse> {
        let reported_key = caller_key.unwrap_or(cache_key).to_string();

        if existing.fingerprint != fingerprint.to_cache_key() {
            metrics::increment_idempotency_outcome("mismatch");
            warn!(
                key = %reported_key,
                expected = %existing.fingerprint,
                actual = %fingerprint,
                "Idempotency key body mismatch - same key with different request"
            );
            return Err(SdkError::IdempotencyKeyBodyMismatch {
                key: reported_key,
                expected_hash: existing.body_hash,
                actual_hash: fingerprint.body_hash.clone(),
            });
        }

        match existing.state {
            RecordState::InFlight => {
                metrics::increment_idempotency_outcome("in_flight");
                debug!(key = %reported_key, "Request with same fingerprint still in flight");
                Err(SdkError::IdempotencyInFlight { key: reported_key })
            }
            RecordState::Completed { response } => {
                metrics::increment_idempotency_outcome("replayed");
                info!(
                    key = %reported_key,
                    status = response.status,
                    "Idempotent request detected - returning cached response"
                );
                Ok(GuardedResponse {
                    response,
                    replayed: true,
                })
            }
        }
    }

    async fn execute<F, Fut>(
        &self,
        cache_key: &str,
        reservation: IdempotencyRecord,
        compute: F,
    ) -> SdkResult<GuardedResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SdkResult<CachedResponse>>,
    {
        let mut held = Reservation {
            cache: self.cache.clone(),
            key: cache_key.to_string(),
            reservation_id: reservation.reservation_id.clone(),
            armed: true,
        };

        let response = match compute().await {
            Ok(response) => response,
            Err(e) => {
                held.release().await;
                return Err(e);
            }
        };

        if !response.is_cacheable() {
            metrics::increment_idempotency_outcome("not_cached");
            debug!(key = cache_key, status = response.status, "Skipping cache for 5xx response");
            held.release().await;
            return Ok(GuardedResponse {
                response,
                replayed: false,
            });
        }

        let mut record = reservation.complete(response.clone());
        record.command_id = response
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(COMMAND_ID_HEADER))
            .map(|(_, value)| value.clone());

        match self.cache.put(cache_key, record, self.ttl).await {
            Ok(()) => {
                held.commit();
                info!(key = cache_key, status = response.status, "Registered idempotency key");
            }
            Err(e) => {
                // The side effect already happened; hand the result back and drop the reservation.
                warn!(key = cache_key, error = %e, "Failed to store idempotent response");
                held.release().await;
            }
        }

        metrics::increment_idempotency_outcome("executed");
        Ok(GuardedResponse {
            response,
            replayed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency_cache::InMemoryIdempotencyCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn guard() -> (IdempotencyGuard, Arc<InMemoryIdempotencyCache>) {
        let cache = Arc::new(InMemoryIdempotencyCache::new());
        (IdempotencyGuard::new(cache.clone()), cache)
    }

    #[tokio::test]
    async fn test_second_call_replays_without_side_effect() {
        let (guard, _) = guard();
        let fp = RequestFingerprint::derive("POST", "/api/mint", Some("alice"), b"{}");
        let calls = AtomicUsize::new(0);

        let first = guard
            .guard(&fp, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(CachedResponse::new(200, "minted"))
            })
            .await
            .unwrap();
        let second = guard
            .guard(&fp, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(CachedResponse::new(200, "minted again"))
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(second.response.body, first.response.body);
    }

    #[tokio::test]
    async fn test_compute_error_releases_reservation() {
        let (guard, cache) = guard();
        let fp = RequestFingerprint::derive("POST", "/api/mint", None, b"x");

        let err = guard
            .guard(&fp, || async { Err(SdkError::Validation("amount must be positive".to_string())) })
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::Validation(_)));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_command_id_recorded() {
        let (guard, cache) = guard();
        let fp = RequestFingerprint::derive("POST", "/api/swap", None, b"x");

        guard
            .guard(&fp, || async {
                Ok(CachedResponse::new(200, "ok").with_header("X-Command-Id", "cmd-42"))
            })
            .await
            .unwrap();

        let record = cache.get(&fp.to_cache_key()).await.unwrap().unwrap();
        assert_eq!(record.command_id.as_deref(), Some("cmd-42"));
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_before_compute() {
        let (guard, _) = guard();
        let fp = RequestFingerprint::derive("POST", "/api/swap", None, b"x");
        let calls = AtomicUsize::new(0);

        let err = guard
            .guard_keyed(Some("not a key"), &fp, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(CachedResponse::new(200, "ok"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SdkError::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
