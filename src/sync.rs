//! Lock helpers that survive poisoning.
//!
//! In-process state guarded by these locks is advisory (single-flight leases,
//! the memory backend, health bookkeeping); a panic in one request must not
//! take the rest of the process down with it.

use std::sync::{Mutex, MutexGuard};

use tracing::warn;

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, owner: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                owner,
                result = "poisoned_recovered",
                "Recovered from poisoned lock; state may be stale"
            );
            poisoned.into_inner()
        }
    }
}
