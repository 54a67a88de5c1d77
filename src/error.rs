//! Error types for the cache server
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the cache engines, the replicated state machine
/// and the HTTP layer.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Tail pop on an ordered index that holds no entries.
    ///
    /// Bookkeeping claimed an entry existed, so `size` or the frequency
    /// buckets have diverged from the actual content.
    #[error("Ordered index is empty: {0}")]
    EmptyStructure(&'static str),

    /// Entry handle is stale or linked into a different ordered index
    #[error("Entry is not a member of this index: {0}")]
    ForeignEntry(String),

    /// Snapshot or log payload could not be encoded or decoded
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Snapshot sink I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Committed log entry delivered out of sequence
    #[error("Log entry out of order: expected index > {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<base64::DecodeError> for CacheError {
    fn from(err: base64::DecodeError) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache server.
pub type Result<T> = std::result::Result<T, CacheError>;
