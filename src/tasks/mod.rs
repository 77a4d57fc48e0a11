//! Background Tasks Module
//!
//! Periodic tasks started by the binary and aborted on shutdown.
//!
//! # Tasks
//! - Metrics: logs a counter snapshot at a fixed interval
//! - Warmer: replays configured paths to keep shared cache entries warm
//! - Sweep: purges expired entries from the memory store

mod metrics;
mod sweep;
mod warmer;

pub use metrics::spawn_metrics_task;
pub use sweep::spawn_sweep_task;
pub use warmer::{spawn_warming_task, warm_once, WARMER_SUBJECT};
