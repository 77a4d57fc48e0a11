//! Request DTOs for the edge API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::policy::CacheCategory;

/// Longest accepted invalidation pattern
pub const MAX_PATTERN_LENGTH: usize = 512;

/// Request body for `POST /cache/invalidate`
///
/// # Fields
/// - `category`: Cache category name (e.g. `analytics`)
/// - `pattern`: Path glob within the category (e.g. `/analytics/fleet/*`)
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    pub category: String,
    pub pattern: String,
}

impl InvalidateRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.category.parse::<CacheCategory>().is_err() {
            return Some(format!("Unknown cache category '{}'", self.category));
        }
        if self.pattern.is_empty() {
            return Some("Pattern cannot be empty".to_string());
        }
        if self.pattern.len() > MAX_PATTERN_LENGTH {
            return Some(format!(
                "Pattern exceeds maximum length of {MAX_PATTERN_LENGTH} characters"
            ));
        }
        if !(self.pattern.starts_with('/') || self.pattern.starts_with('*')) {
            return Some("Pattern must start with '/' or '*'".to_string());
        }
        if self.pattern.contains(':') {
            return Some("Pattern cannot contain ':'".to_string());
        }
        None
    }

    /// Parsed category. Only meaningful after [`validate`](Self::validate).
    pub fn category(&self) -> Option<CacheCategory> {
        self.category.parse().ok()
    }
}

/// Request body for `POST /sessions`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Arbitrary key/value bag stored with the session
    #[serde(default)]
    pub payload: Map<String, Value>,
}
