//! Health Reporter
//!
//! Probes the store with a bounded ping and reports a structured status.
//! A failed probe is a result, not an error: the serving process keeps
//! running and the status says the store is degraded, and since when.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::store::Store;
use crate::sync::lock;

// == Health Status ==
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub reachable: bool,
    /// Round-trip of the probe; `None` when it failed
    pub latency_ms: Option<f64>,
    pub last_checked: DateTime<Utc>,
    /// Start of the current outage, if the store is unreachable
    pub degraded_since: Option<DateTime<Utc>>,
    pub backend: &'static str,
    /// Probe failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// == Health Reporter ==
pub struct HealthReporter {
    store: Arc<dyn Store>,
    probe_timeout: Duration,
    degraded_since: Mutex<Option<DateTime<Utc>>>,
}

impl HealthReporter {
    pub fn new(store: Arc<dyn Store>, probe_timeout: Duration) -> Self {
        Self {
            store,
            probe_timeout,
            degraded_since: Mutex::new(None),
        }
    }

    /// Pings the store and returns the resulting status.
    ///
    /// Never takes longer than the probe timeout.
    pub async fn check(&self) -> HealthStatus {
        let outcome = match tokio::time::timeout(self.probe_timeout, self.store.ping()).await {
            Ok(Ok(latency)) => Ok(latency),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!("probe timed out after {:?}", self.probe_timeout)),
        };
        let now = Utc::now();

        let mut degraded_since = lock(&self.degraded_since, "health_reporter");
        match outcome {
            Ok(latency) => {
                if let Some(since) = degraded_since.take() {
                    info!(backend = self.store.backend(), %since, "store reachable again");
                }
                HealthStatus {
                    reachable: true,
                    latency_ms: Some(latency.as_secs_f64() * 1000.0),
                    last_checked: now,
                    degraded_since: None,
                    backend: self.store.backend(),
                    error: None,
                }
            }
            Err(error) => {
                let since = *degraded_since.get_or_insert(now);
                warn!(backend = self.store.backend(), %since, %error, "store health probe failed");
                HealthStatus {
                    reachable: false,
                    latency_ms: None,
                    last_checked: now,
                    degraded_since: Some(since),
                    backend: self.store.backend(),
                    error: Some(error),
                }
            }
        }
    }
}
