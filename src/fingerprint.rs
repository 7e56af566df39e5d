// Request fingerprinting for idempotent mutating requests.
// Display form: {method}:{path}:{principal}:{sha256(body)}
// Cache key: SHA-256 over the length-prefixed fields, so ':' inside a field cannot collide.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{SdkError, SdkResult};

/// Principal recorded when the request carries no caller identity.
pub const UNAUTHENTICATED_PRINCIPAL: &str = "unauthenticated";

/// HTTP header carrying the caller-supplied idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// Default maximum length of a caller-supplied idempotency key.
pub const DEFAULT_MAX_KEY_LENGTH: usize = 255;

/// Deterministic identity of a logical request.
///
/// Two requests with equal fingerprints are the same logical operation. `body_hash` is
/// always 64 lower-case hex characters (SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestFingerprint {
    pub method: String,
    pub path: String,
    pub principal: String,
    pub body_hash: String,
}

impl RequestFingerprint {
    /// Derives the fingerprint of a request. Pure: identical inputs give identical output.
    pub fn derive(method: &str, path: &str, principal: Option<&str>, body: &[u8]) -> Self {
        let principal = match principal {
            Some(p) if !p.trim().is_empty() => p.to_string(),
            _ => UNAUTHENTICATED_PRINCIPAL.to_string(),
        };

        Self {
            method: method.to_string(),
            path: path.to_string(),
            principal,
            body_hash: body_sha256_hex(body),
        }
    }

    /// Cache key: 64 hex chars, unique per distinct (method, path, principal, body hash).
    pub fn to_cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        for field in [&self.method, &self.path, &self.principal, &self.body_hash] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.method, self.path, self.principal, self.body_hash
        )
    }
}

/// Lower-case, fixed-width hex SHA-256 of the raw body bytes.
pub fn body_sha256_hex(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Validates a caller-supplied idempotency key.
///
/// A missing key is fine (the header is optional). A present key must be non-blank, at
/// most `max_len` characters, and use only ASCII alphanumerics, `-` and `_`.
pub fn validate_idempotency_key(key: Option<&str>, max_len: usize) -> SdkResult<()> {
    let Some(key) = key else {
        return Ok(());
    };

    if key.trim().is_empty() {
        return Err(SdkError::Validation(
            "Idempotency key cannot be empty".to_string(),
        ));
    }

    if key.chars().count() > max_len {
        return Err(SdkError::Validation(format!(
            "Idempotency key too long (max {} characters)",
            max_len
        )));
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SdkError::Validation(
            "Idempotency key contains invalid characters (only alphanumeric, -, _ allowed)"
                .to_string(),
        ));
    }

    Ok(())
}
