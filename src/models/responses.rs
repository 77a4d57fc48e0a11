//! Response DTOs for the edge API
//!
//! Defines the structure of outgoing HTTP response bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::policy::{CacheCategory, CachePolicy, KeyScope};
use crate::ratelimit::FailMode;
use crate::session::SessionContext;
use crate::stats::StatsSnapshot;

/// Response body for `POST /cache/invalidate`
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    pub category: CacheCategory,
    pub pattern: String,
    /// Number of cache entries removed
    pub removed: usize,
}

/// Response body for `POST /sessions`
#[derive(Debug, Clone, Serialize)]
pub struct SessionCreatedResponse {
    /// Opaque token to present on later requests
    pub token: String,
    pub expires_in_secs: u64,
}

/// Response body for `GET /sessions/current`
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub payload: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<SessionContext> for SessionResponse {
    fn from(context: SessionContext) -> Self {
        Self {
            payload: context.record.payload,
            created_at: context.record.created_at,
            expires_at: context.expires_at,
        }
    }
}

/// Response body for `DELETE /sessions`
#[derive(Debug, Clone, Serialize)]
pub struct SessionDestroyedResponse {
    /// Whether a live session was removed
    pub destroyed: bool,
}

/// One row of the policy table in the stats output
#[derive(Debug, Clone, Serialize)]
pub struct PolicySummary {
    pub category: CacheCategory,
    pub ttl_secs: u64,
    pub scope: KeyScope,
    pub max_keys_per_pattern: usize,
}

impl From<&CachePolicy> for PolicySummary {
    fn from(policy: &CachePolicy) -> Self {
        Self {
            category: policy.category,
            ttl_secs: policy.ttl.as_secs(),
            scope: policy.scope,
            max_keys_per_pattern: policy.max_keys_per_pattern,
        }
    }
}

/// Response body for `GET /cache/stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub counters: StatsSnapshot,
    pub backend: &'static str,
    pub rate_limit_fail_mode: FailMode,
    pub policies: Vec<PolicySummary>,
}
