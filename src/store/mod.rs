//! Store Client
//!
//! Abstraction over the remote key/value store shared by the cache, the rate
//! limiter and the session manager. Every operation is bounded in time and
//! reports failures as [`StoreError`](crate::error::StoreError); callers
//! decide whether to degrade or surface them.

mod entry;
mod memory;
mod pattern;
mod redis_store;
mod retry;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;

pub use memory::MemoryStore;
pub use pattern::glob_match;
pub use redis_store::RedisStore;
pub use retry::RetryPolicy;

// == Counter ==
/// Result of an atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Value after the increment
    pub count: u64,
    /// Time left before the counter expires
    pub ttl: Duration,
}

// == Store Trait ==
/// A key/value store with per-key TTLs.
///
/// Implementations must be safe to share across all in-flight requests.
/// Keys passed in and returned are logical keys; any namespacing is the
/// implementation's concern.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Short backend name for health output and logs.
    fn backend(&self) -> &'static str;

    /// Returns the value, or `None` when the key is missing or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Overwrites the key wholesale with a fresh TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()>;

    /// Removes the key. Returns whether it existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Resets the TTL of a live key. Returns false when the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Returns at most `limit` live keys matching a glob pattern
    /// (`*`, `?`, `[...]`, `\` escapes).
    async fn scan_pattern(&self, pattern: &str, limit: usize) -> StoreResult<Vec<String>>;

    /// Atomically increments a counter. The TTL is applied only when the
    /// increment creates the counter.
    async fn increment(&self, key: &str, window_ttl: Duration) -> StoreResult<Counter>;

    /// Round-trips to the store and returns the observed latency.
    async fn ping(&self) -> StoreResult<Duration>;
}
