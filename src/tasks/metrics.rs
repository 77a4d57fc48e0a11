//! Metrics Reporter Task
//!
//! Periodically logs a snapshot of the edge counters as a structured event.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::stats::EdgeStats;

/// Spawns a task that logs an [`EdgeStats`] snapshot every `interval`.
pub fn spawn_metrics_task(stats: Arc<EdgeStats>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(?interval, "starting metrics reporter");

        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let snapshot = stats.snapshot();
            info!(
                target: "freight_edge::metrics",
                hits = snapshot.hits,
                misses = snapshot.misses,
                bypasses = snapshot.bypasses,
                hit_rate = snapshot.hit_rate,
                store_errors = snapshot.store_errors,
                writes = snapshot.writes,
                writes_skipped = snapshot.writes_skipped,
                invalidated = snapshot.invalidated,
                rate_limited = snapshot.rate_limited,
                sessions_created = snapshot.sessions_created,
                "edge metrics"
            );
        }
    })
}
