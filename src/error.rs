//! Error types for the edge layer
//!
//! Store faults are kept separate from request-facing errors so the cache
//! and session paths can degrade on them while the rate limiter and the
//! invalidation hook surface them.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::policy::CacheCategory;

// == Store Error Enum ==
/// Failure reported by a [`Store`](crate::store::Store) backend.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Network or connection level failure (retryable)
    #[error("store connection error during {op}: {message}")]
    Connection { op: &'static str, message: String },

    /// The operation did not finish within its bounded timeout (retryable)
    #[error("store {op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    /// Retries were exhausted
    #[error("store unavailable for {op} after {attempts} attempt(s): {last}")]
    Unavailable {
        op: &'static str,
        attempts: u32,
        last: String,
    },

    /// The store rejected the command itself (not retryable)
    #[error("store command {op} failed: {message}")]
    Command { op: &'static str, message: String },

    /// A stored payload could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(String),
}

impl StoreError {
    /// Returns true when retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection { .. } | StoreError::Timeout { .. })
    }

    /// Returns true for the "store unavailable" family. A timeout counts.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Connection { .. } | StoreError::Timeout { .. } | StoreError::Unavailable { .. }
        )
    }
}

// == Edge Error Enum ==
/// Unified error type for the edge layer.
#[derive(Error, Debug)]
pub enum EdgeError {
    /// Fatal at startup: the process must not run with this configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Client exceeded its request budget
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    /// Stale entries may still be served
    #[error("invalidation of {category} failed: {source}")]
    InvalidationFailed {
        category: CacheCategory,
        #[source]
        source: StoreError,
    },

    /// Invalid request data
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Nothing to act on (e.g. no live session)
    #[error("not found: {0}")]
    NotFound(String),

    /// Store failure surfaced to the caller
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for EdgeError {
    fn into_response(self) -> Response {
        let status = match &self {
            EdgeError::InvalidConfiguration(_) | EdgeError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            EdgeError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            EdgeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            EdgeError::NotFound(_) => StatusCode::NOT_FOUND,
            EdgeError::InvalidationFailed { .. } | EdgeError::Store(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };

        let retry_after = match &self {
            EdgeError::RateLimitExceeded { retry_after } => Some(retry_after_secs(*retry_after)),
            _ => None,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Whole seconds for a `Retry-After` header, rounded up and never zero.
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

// == Result Type Aliases ==
/// Convenience Result type for the edge layer.
pub type Result<T> = std::result::Result<T, EdgeError>;

/// Result type returned by store backends.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
