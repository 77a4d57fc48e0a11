//! Store doubles for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Counter, MemoryStore, Store};
use crate::error::{StoreError, StoreResult};
use crate::sync::lock;

/// Memory store that can be switched off to simulate an outage.
pub(crate) struct SwitchableStore {
    inner: MemoryStore,
    available: AtomicBool,
    /// Keys the next scan reports although they are already gone
    vanished: Mutex<Vec<String>>,
    pub sets: AtomicUsize,
}

impl SwitchableStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(1000),
            available: AtomicBool::new(true),
            vanished: Mutex::new(Vec::new()),
            sets: AtomicUsize::new(0),
        }
    }

    pub fn down() -> Self {
        let store = Self::new();
        store.set_available(false);
        store
    }

    /// Makes the next scan lead with `keys`, as if they expired between the
    /// scan and the following delete.
    pub fn vanish_on_next_scan(&self, keys: Vec<String>) {
        *lock(&self.vanished, "switchable_store") = keys;
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self, op: &'static str) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable {
                op,
                attempts: 3,
                last: "connection refused".into(),
            })
        }
    }
}

#[async_trait]
impl Store for SwitchableStore {
    fn backend(&self) -> &'static str {
        "switchable"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check("get")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        self.check("set")?;
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check("delete")?;
        self.inner.delete(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.check("expire")?;
        self.inner.expire(key, ttl).await
    }

    async fn scan_pattern(&self, pattern: &str, limit: usize) -> StoreResult<Vec<String>> {
        self.check("scan")?;
        let mut keys = std::mem::take(&mut *lock(&self.vanished, "switchable_store"));
        keys.extend(self.inner.scan_pattern(pattern, limit).await?);
        keys.truncate(limit);
        Ok(keys)
    }

    async fn increment(&self, key: &str, window_ttl: Duration) -> StoreResult<Counter> {
        self.check("increment")?;
        self.inner.increment(key, window_ttl).await
    }

    async fn ping(&self) -> StoreResult<Duration> {
        self.check("ping")?;
        self.inner.ping().await
    }
}
