//! Edge Statistics Module
//!
//! Counters for cache outcomes, store faults and rate-limit rejections,
//! shared by every middleware component.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Edge Stats ==
/// Lock-free counters updated from concurrent requests.
#[derive(Debug, Default)]
pub struct EdgeStats {
    hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
    store_errors: AtomicU64,
    writes: AtomicU64,
    writes_skipped: AtomicU64,
    invalidated: AtomicU64,
    rate_limited: AtomicU64,
    sessions_created: AtomicU64,
}

/// Point-in-time copy of [`EdgeStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Requests answered from the store
    pub hits: u64,
    /// Requests that ran the handler because nothing was cached
    pub misses: u64,
    /// Requests passed straight through because the store was unreachable
    pub bypasses: u64,
    pub store_errors: u64,
    /// Responses written back to the store
    pub writes: u64,
    /// Write-backs dropped because too many were already in flight
    pub writes_skipped: u64,
    /// Keys removed by invalidation
    pub invalidated: u64,
    pub rate_limited: u64,
    pub sessions_created: u64,
    /// hits / (hits + misses)
    pub hit_rate: f64,
}

impl EdgeStats {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypass(&self) {
        self.bypasses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_skipped(&self) {
        self.writes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidated(&self, keys: u64) {
        self.invalidated.fetch_add(keys, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    pub fn snapshot(&self) -> StatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        StatsSnapshot {
            hits,
            misses,
            bypasses: self.bypasses.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            writes_skipped: self.writes_skipped.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            hit_rate: hit_rate(hits, misses),
        }
    }
}

// == Hit Rate ==
/// Returns hits / (hits + misses), or 0.0 before any lookup.
fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
