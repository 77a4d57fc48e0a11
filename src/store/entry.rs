//! Stored Entry Module
//!
//! A single value held by the memory backend together with its deadline.

use std::time::Duration;

use tokio::time::Instant;

// == Stored Entry ==
/// A value with an absolute expiry deadline.
///
/// Deadlines use the tokio clock so paused-time tests can step over them.
#[derive(Debug, Clone)]
pub(crate) struct StoredEntry {
    pub value: Vec<u8>,
    pub expires_at: Instant,
}

impl StoredEntry {
    // == Constructor ==
    pub fn new(value: Vec<u8>, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            expires_at: now + ttl,
        }
    }

    // == Is Expired ==
    /// An entry is expired once `now` reaches its deadline, so a TTL of
    /// `t` never serves the value at `t` or later.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    // == Time To Live ==
    /// Remaining lifetime, zero once expired.
    pub fn ttl_remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}
