//! Rate Limiter
//!
//! Fixed-window request budget per client identity. Each window is a counter
//! keyed by `identity:bucket` where the bucket is the current time truncated
//! to the window size. A client can therefore burst up to twice its limit
//! across a window boundary; that is accepted in exchange for one atomic
//! store round-trip per request.

mod identity;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::EdgeError;
use crate::stats::EdgeStats;
use crate::store::Store;

pub use identity::{AuthenticatedSubject, ClientIdentity, TrustedProxies};

// == Fail Mode ==
/// What the limiter does when the store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Allow the request; a store outage must not take the service down
    Open,
    /// Deny the request with `retry_after` equal to the window
    Closed,
}

impl FromStr for FailMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(FailMode::Open),
            "closed" => Ok(FailMode::Closed),
            other => Err(format!("expected 'open' or 'closed', got '{other}'")),
        }
    }
}

impl fmt::Display for FailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailMode::Open => "open",
            FailMode::Closed => "closed",
        })
    }
}

// == Rule ==
/// Request budget declared by a route group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit: u64,
    pub window: Duration,
}

impl RateLimitRule {
    /// A zero limit denies everything forever and a zero window has no
    /// bucket; both are configuration errors.
    pub fn validate(&self) -> Result<(), EdgeError> {
        if self.limit == 0 {
            return Err(EdgeError::InvalidConfiguration(
                "rate limit must allow at least one request".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(EdgeError::InvalidConfiguration(
                "rate limit window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// == Decision ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Zero when allowed
    pub retry_after: Duration,
}

// == Rate Limiter ==
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn Store>,
    fail_mode: FailMode,
    stats: Arc<EdgeStats>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>, fail_mode: FailMode, stats: Arc<EdgeStats>) -> Self {
        Self {
            store,
            fail_mode,
            stats,
        }
    }

    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }

    /// Counts one request for `identity` and decides whether it may proceed.
    pub async fn allow(
        &self,
        identity: &ClientIdentity,
        limit: u64,
        window: Duration,
    ) -> RateDecision {
        self.allow_at(identity, RateLimitRule { limit, window }, Utc::now())
            .await
    }

    /// Same as [`allow`](Self::allow) with an explicit wall-clock instant
    /// selecting the window bucket.
    pub async fn allow_at(
        &self,
        identity: &ClientIdentity,
        rule: RateLimitRule,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let key = bucket_key(identity, rule.window, now);

        let counter = match self.store.increment(&key, rule.window).await {
            Ok(counter) => counter,
            Err(err) => {
                self.stats.record_store_error();
                return match self.fail_mode {
                    FailMode::Open => {
                        warn!(%identity, error = %err, "rate limit store unavailable, failing open");
                        RateDecision {
                            allowed: true,
                            limit: rule.limit,
                            remaining: rule.limit,
                            retry_after: Duration::ZERO,
                        }
                    }
                    FailMode::Closed => {
                        warn!(%identity, error = %err, "rate limit store unavailable, failing closed");
                        self.stats.record_rate_limited();
                        RateDecision {
                            allowed: false,
                            limit: rule.limit,
                            remaining: 0,
                            retry_after: rule.window,
                        }
                    }
                };
            }
        };

        if counter.count <= rule.limit {
            RateDecision {
                allowed: true,
                limit: rule.limit,
                remaining: rule.limit - counter.count,
                retry_after: Duration::ZERO,
            }
        } else {
            debug!(%identity, count = counter.count, limit = rule.limit, "rate limit exceeded");
            self.stats.record_rate_limited();
            RateDecision {
                allowed: false,
                limit: rule.limit,
                remaining: 0,
                retry_after: counter.ttl.max(Duration::from_millis(1)),
            }
        }
    }
}

/// `ratelimit:{identity}:{bucket}` with the bucket counted in whole windows
/// since the Unix epoch.
fn bucket_key(identity: &ClientIdentity, window: Duration, now: DateTime<Utc>) -> String {
    let window_ms = window.as_millis().max(1) as i64;
    let bucket = now.timestamp_millis().div_euclid(window_ms);
    format!("ratelimit:{identity}:{bucket}")
}
