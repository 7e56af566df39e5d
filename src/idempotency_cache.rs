// Idempotency Cache - storage for idempotency records
// In-memory store (DashMap + per-entry expiry) and Redis store (feature "redis")

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[cfg(feature = "redis")]
use redis::aio::ConnectionManager;
#[cfg(feature = "redis")]
use redis::{AsyncCommands, Client};

/// Default lifetime of a completed record (24 hours).
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(86_400);

/// Default lifetime of an `InFlight` reservation. Bounds the lockout if the owner dies
/// without releasing it.
pub const DEFAULT_IN_FLIGHT_TTL: Duration = Duration::from_secs(300);

/// A response as stored for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// JSON response with a `content-type` header.
    pub fn json<T: Serialize>(status: u16, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(status, body).with_header("content-type", "application/json"))
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// 5xx responses are never stored.
    pub fn is_cacheable(&self) -> bool {
        !self.is_server_error()
    }
}

/// Lifecycle of an idempotency record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecordState {
    /// Reserved by the request currently executing.
    InFlight,
    /// Execution finished with a cacheable response.
    Completed { response: CachedResponse },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Cache key of the fingerprint of the request that owns the record.
    pub fingerprint: String,
    pub body_hash: String,
    /// Identifies the reservation this record was created from.
    #[serde(default)]
    pub reservation_id: String,
    /// Ledger command id of the side effect, when the caller reports one.
    pub command_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub state: RecordState,
}

impl IdempotencyRecord {
    pub fn in_flight(fingerprint: String, body_hash: String) -> Self {
        Self {
            fingerprint,
            body_hash,
            reservation_id: uuid::Uuid::new_v4().to_string(),
            command_id: None,
            created_at: Utc::now(),
            state: RecordState::InFlight,
        }
    }

    pub fn complete(mut self, response: CachedResponse) -> Self {
        self.state = RecordState::Completed { response };
        self
    }

    /// True for an `InFlight` record created by `reservation_id`.
    pub fn is_reservation(&self, reservation_id: &str) -> bool {
        self.state == RecordState::InFlight && self.reservation_id == reservation_id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),
    #[error("Failed to encode idempotency record: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Storage consulted by [`crate::idempotency::IdempotencyGuard`].
///
/// `insert_if_absent` must be atomic: of two concurrent calls for the same key exactly
/// one returns `true`. Expired records behave as absent.
#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, CacheError>;

    async fn insert_if_absent(
        &self,
        key: &str,
        record: IdempotencyRecord,
        ttl: Duration,
    ) -> Result<bool, CacheError>;

    async fn put(&self, key: &str, record: IdempotencyRecord, ttl: Duration) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Removes the record only while it is still the `InFlight` reservation
    /// `reservation_id`. Returns whether something was removed.
    async fn remove_reservation(&self, key: &str, reservation_id: &str) -> Result<bool, CacheError>;
}

struct StoredRecord {
    record: IdempotencyRecord,
    expires_at: Instant,
}

impl StoredRecord {
    fn new(record: IdempotencyRecord, ttl: Duration) -> Self {
        Self {
            record,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Process-local idempotency store.
#[derive(Default)]
pub struct InMemoryIdempotencyCache {
    entries: DashMap<String, StoredRecord>,
    expired_evictions: AtomicU64,
}

impl InMemoryIdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes expired records, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, stored| {
            if stored.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.expired_evictions.fetch_add(removed as u64, Ordering::Relaxed);
            info!(removed, "Cleaned up expired idempotency entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn expired_evictions(&self) -> u64 {
        self.expired_evictions.load(Ordering::Relaxed)
    }

    /// Drops every record (for testing).
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl IdempotencyCache for InMemoryIdempotencyCache {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, CacheError> {
        // Copy out before removing so the shard read lock is released.
        let found = self
            .entries
            .get(key)
            .map(|stored| (stored.record.clone(), stored.is_expired()));

        match found {
            Some((_, true)) => {
                self.entries.remove_if(key, |_, stored| stored.is_expired());
                self.expired_evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Idempotency key expired and removed");
                Ok(None)
            }
            Some((record, false)) => Ok(Some(record)),
            None => Ok(None),
        }
    }

    async fn insert_if_absent(
        &self,
        key: &str,
        record: IdempotencyRecord,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredRecord::new(record, ttl));
                    self.expired_evictions.fetch_add(1, Ordering::Relaxed);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredRecord::new(record, ttl));
                Ok(true)
            }
        }
    }

    async fn put(&self, key: &str, record: IdempotencyRecord, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), StoredRecord::new(record, ttl));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn remove_reservation(&self, key: &str, reservation_id: &str) -> Result<bool, CacheError> {
        Ok(self
            .entries
            .remove_if(key, |_, stored| stored.record.is_reservation(reservation_id))
            .is_some())
    }
}

/// Configuration for the Redis-backed store.
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    pub url: String,
    pub key_prefix: String,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "idem:".to_string(),
        }
    }
}

/// Idempotency store shared across processes through Redis.
///
/// Insert-if-absent is `SET key value NX EX ttl`, so the reservation is atomic on the
/// server. Records are JSON-encoded.
#[cfg(feature = "redis")]
#[derive(Clone)]
pub struct RedisIdempotencyCache {
    conn: ConnectionManager,
    config: RedisCacheConfig,
}

#[cfg(feature = "redis")]
impl RedisIdempotencyCache {
    pub async fn new(config: RedisCacheConfig) -> Result<Self, CacheError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| CacheError::Backend(format!("Failed to create Redis client: {}", e)))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to connect to Redis: {}", e)))?;

        info!(url = %config.url, "Redis idempotency cache connected");

        Ok(Self { conn, config })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    pub async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("Redis health check failed: {}", e)))?;

        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Backend(format!("Unexpected Redis response: {}", pong)))
        }
    }
}

// Compare-and-delete on the reservation id; records are JSON with an internally tagged state.
#[cfg(feature = "redis")]
const REMOVE_RESERVATION_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end
local record = cjson.decode(raw)
if record.reservation_id == ARGV[1] and record.state.state == 'in_flight' then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

#[cfg(feature = "redis")]
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[cfg(feature = "redis")]
#[async_trait]
impl IdempotencyCache for RedisIdempotencyCache {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(self.key(key))
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to get idempotency record: {}", e)))?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn insert_if_absent(
        &self,
        key: &str,
        record: IdempotencyRecord,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let payload = serde_json::to_string(&record)?;
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(payload)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to reserve idempotency key: {}", e)))?;

        Ok(reply.is_some())
    }

    async fn put(&self, key: &str, record: IdempotencyRecord, ttl: Duration) -> Result<(), CacheError> {
        let payload = serde_json::to_string(&record)?;
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.key(key))
            .arg(payload)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to store idempotency record: {}", e)))?;

        debug!(key, "Stored idempotency record in Redis");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.key(key))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to delete idempotency record: {}", e)))?;
        Ok(())
    }

    async fn remove_reservation(&self, key: &str, reservation_id: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::Script::new(REMOVE_RESERVATION_SCRIPT)
            .key(self.key(key))
            .arg(reservation_id)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to release reservation: {}", e)))?;
        Ok(removed > 0)
    }
}
