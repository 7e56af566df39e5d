//! # Error Taxonomy
//!
//! Every fallible SDK operation returns [`SdkError`]. Each variant maps to an
//! [`ErrorCode`] and an HTTP status so an outer HTTP layer can translate it into an
//! [`ApiError`] payload without inspecting messages.
//!
//! Merge failures have no variant: the merge coordinator reports them
//! through [`crate::token_merge::MergeOutcome::Failed`] and they never become an
//! `SdkError`.

use serde::Serialize;
use serde_json::json;

use crate::idempotency_cache::CacheError;
use crate::ledger::LedgerError;
use crate::token_mint::MintedToken;

/// Machine-readable error code sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Validation,
    Conflict,
    IdempotencyKeyBodyMismatch,
    LedgerRejected,
    PartialMint,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::IdempotencyKeyBodyMismatch => "IDEMPOTENCY_KEY_BODY_MISMATCH",
            ErrorCode::LedgerRejected => "LEDGER_REJECTED",
            ErrorCode::PartialMint => "PARTIAL_MINT",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by SDK operations.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    /// Caller-supplied input is invalid. Detected before any ledger mutation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The same idempotency key was reused with a different request.
    #[error("IDEMPOTENCY_KEY_BODY_MISMATCH: key '{key}' was first used with body hash {expected_hash}, got {actual_hash}")]
    IdempotencyKeyBodyMismatch {
        key: String,
        expected_hash: String,
        actual_hash: String,
    },

    /// Another request with the same fingerprint is still executing.
    #[error("Request '{key}' is already being processed")]
    IdempotencyInFlight { key: String },

    /// The first token of a pair was minted but the second was not. Nothing is rolled back.
    #[error("Partial mint: {} token(s) minted before {failed_symbol} failed: {source}", .minted.len())]
    PartialMint {
        minted: Vec<MintedToken>,
        failed_symbol: String,
        #[source]
        source: LedgerError,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Idempotency cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl SdkError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SdkError::Validation(_) => ErrorCode::Validation,
            SdkError::IdempotencyKeyBodyMismatch { .. } => ErrorCode::IdempotencyKeyBodyMismatch,
            SdkError::IdempotencyInFlight { .. } => ErrorCode::Conflict,
            SdkError::PartialMint { .. } => ErrorCode::PartialMint,
            SdkError::Ledger(_) => ErrorCode::LedgerRejected,
            SdkError::Cache(_) | SdkError::Unexpected(_) => ErrorCode::Internal,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            SdkError::Validation(_) | SdkError::IdempotencyKeyBodyMismatch { .. } => 400,
            SdkError::IdempotencyInFlight { .. } => 409,
            SdkError::Ledger(_) => 502,
            SdkError::PartialMint { .. } | SdkError::Cache(_) | SdkError::Unexpected(_) => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status())
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SdkError::IdempotencyInFlight { .. } | SdkError::Cache(_) | SdkError::Ledger(LedgerError::Unavailable(_))
        )
    }

    /// Builds the client-facing error payload.
    pub fn to_api_error(&self) -> ApiError {
        let details = match self {
            SdkError::IdempotencyKeyBodyMismatch {
                key,
                expected_hash,
                actual_hash,
            } => Some(json!({
                "idempotencyKey": key,
                "expectedBodyHash": expected_hash,
                "actualBodyHash": actual_hash,
            })),
            SdkError::PartialMint {
                minted,
                failed_symbol,
                ..
            } => Some(json!({
                "minted": minted,
                "failedSymbol": failed_symbol,
            })),
            SdkError::IdempotencyInFlight { key } => Some(json!({ "idempotencyKey": key })),
            _ => None,
        };

        ApiError {
            code: self.code(),
            message: self.to_string(),
            details,
            retryable: self.is_retryable(),
        }
    }
}

/// Error payload returned to HTTP clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub retryable: bool,
}

pub type SdkResult<T> = Result<T, SdkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_maps_to_client_error() {
        let err = SdkError::IdempotencyKeyBodyMismatch {
            key: "swap-1".to_string(),
            expected_hash: "aa".to_string(),
            actual_hash: "bb".to_string(),
        };
        assert_eq!(err.http_status(), 400);
        assert!(err.is_client_error());

        let api = err.to_api_error();
        assert_eq!(api.code, ErrorCode::IdempotencyKeyBodyMismatch);
        let details = api.details.unwrap();
        assert_eq!(details["expectedBodyHash"], "aa");
        assert_eq!(details["actualBodyHash"], "bb");

        let encoded = serde_json::to_value(&err.to_api_error()).unwrap();
        assert_eq!(encoded["code"], "IDEMPOTENCY_KEY_BODY_MISMATCH");
    }

    #[test]
    fn test_ledger_errors_are_server_errors() {
        let err = SdkError::from(LedgerError::Rejected("contract consumed".to_string()));
        assert_eq!(err.http_status(), 502);
        assert!(!err.is_client_error());
        assert_eq!(err.code().as_str(), "LEDGER_REJECTED");
    }
}
