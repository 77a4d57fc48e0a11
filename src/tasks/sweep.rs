//! Expiry Sweep Task
//!
//! Background task that periodically purges expired entries from the
//! in-process memory store. Expired entries are already invisible to
//! readers; the sweep only reclaims their memory.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::store::MemoryStore;

/// Spawns a background task that periodically sweeps expired entries.
///
/// # Arguments
/// * `store` - The memory store to sweep
/// * `interval` - Time between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
pub fn spawn_sweep_task(store: Arc<MemoryStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(?interval, "starting memory store sweep task");

        loop {
            tokio::time::sleep(interval).await;

            let removed = store.sweep_expired();
            if removed > 0 {
                info!(removed, remaining = store.len(), "expired entries swept");
            } else {
                debug!("sweep found no expired entries");
            }
        }
    })
}
