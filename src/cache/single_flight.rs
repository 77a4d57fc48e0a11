//! In-process single-flight leases.
//!
//! The first miss for a key becomes the leader and computes the response;
//! concurrent misses for the same key become followers and wait for the
//! leader's lease to be released before re-reading the store. The lease is
//! released when the leader's guard drops, so a panicking or cancelled
//! leader never strands its followers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::sync::lock;

type Inflight = Arc<Mutex<HashMap<String, (u64, watch::Receiver<()>)>>>;

#[derive(Default)]
pub(crate) struct SingleFlight {
    inflight: Inflight,
    next_id: AtomicU64,
}

pub(crate) enum Flight {
    Leader(FlightGuard),
    Follower(Follower),
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lease for `key`, or joins the flight already holding it.
    pub fn begin(&self, key: &str) -> Flight {
        let mut inflight = lock(&self.inflight, "single_flight");
        if let Some((_, done)) = inflight.get(key) {
            return Flight::Follower(Follower { done: done.clone() });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(());
        inflight.insert(key.to_string(), (id, receiver));
        Flight::Leader(FlightGuard {
            key: key.to_string(),
            id,
            inflight: Arc::clone(&self.inflight),
            _done: sender,
        })
    }

    pub fn len(&self) -> usize {
        lock(&self.inflight, "single_flight").len()
    }
}

/// Held by the leader. Dropping it releases the lease and wakes followers.
pub(crate) struct FlightGuard {
    key: String,
    id: u64,
    inflight: Inflight,
    _done: watch::Sender<()>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut inflight = lock(&self.inflight, "single_flight");
        if inflight.get(&self.key).is_some_and(|(id, _)| *id == self.id) {
            inflight.remove(&self.key);
        }
    }
}

pub(crate) struct Follower {
    done: watch::Receiver<()>,
}

impl Follower {
    /// Waits for the leader to finish. Returns false when `limit` elapsed
    /// first.
    pub async fn wait(mut self, limit: Duration) -> bool {
        // The sender is never written to; `changed` resolves with an error
        // once the leader's guard drops.
        tokio::time::timeout(limit, self.done.changed()).await.is_ok()
    }
}
