//! Cached Response Module
//!
//! Serialized form of a captured handler response. Only the status, the
//! content type and the body travel through the store; everything else is
//! recomputed when the response is rebuilt.

use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

// == Cached Response ==
/// A response as stored under a cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// HTTP status code
    pub status: u16,
    pub content_type: Option<String>,
    /// Raw body, base64 in the serialized form
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,
    pub stored_at: DateTime<Utc>,
    /// Informational; the store TTL is what actually expires the entry
    pub expires_at: DateTime<Utc>,
}

impl CachedResponse {
    // == Constructor ==
    /// Captures a buffered response for storage.
    ///
    /// # Arguments
    /// * `status` - Status of the handler response
    /// * `headers` - Handler response headers (only the content type is kept)
    /// * `body` - The fully buffered body
    /// * `ttl` - Category TTL the entry is written with
    pub fn capture(status: StatusCode, headers: &HeaderMap, body: &Bytes, ttl: Duration) -> Self {
        let stored_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| stored_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            status: status.as_u16(),
            content_type: headers
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            body: body.to_vec(),
            stored_at,
            expires_at,
        }
    }

    // == Codec ==
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StoreError::Codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Codec(e.to_string()))
    }

    // == Rebuild ==
    /// Rebuilds the HTTP response with the original status, content type and
    /// body bytes.
    pub fn into_response(self) -> Response {
        let status = match StatusCode::from_u16(self.status) {
            Ok(status) => status,
            Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        };

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;
        if let Some(value) = self
            .content_type
            .and_then(|content_type| HeaderValue::from_str(&content_type).ok())
        {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        response
    }
}

// == Cacheability ==
/// Only successful, non-streaming responses that do not set cookies are
/// stored.
pub fn is_cacheable(response: &Response) -> bool {
    if !response.status().is_success() {
        return false;
    }

    if response.headers().contains_key(header::SET_COOKIE) {
        return false;
    }

    !response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
