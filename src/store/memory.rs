//! Memory Store Module
//!
//! Single-process [`Store`] with the same TTL, counter and scan semantics as
//! the remote backend. Used for local runs and tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::entry::StoredEntry;
use super::{glob_match, Counter, Store};
use crate::error::{StoreError, StoreResult};
use crate::sync::lock;

// == Memory Store ==
/// In-process key/value store bounded by entry count.
///
/// When full, expired entries are purged first; if that frees nothing the
/// entry closest to expiry is evicted.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
    max_entries: usize,
}

impl MemoryStore {
    // == Constructor ==
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    // == Sweep Expired ==
    /// Removes all expired entries and returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = lock(&self.entries, "memory_store");
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of stored entries, including ones that expired but were not yet swept.
    pub fn len(&self) -> usize {
        lock(&self.entries, "memory_store").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn make_room(&self, entries: &mut HashMap<String, StoredEntry>, now: Instant) {
        if entries.len() < self.max_entries {
            return;
        }
        entries.retain(|_, entry| !entry.is_expired(now));
        if entries.len() < self.max_entries {
            return;
        }
        let victim = entries
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            entries.remove(&key);
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut entries = lock(&self.entries, "memory_store");
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let now = Instant::now();
        let mut entries = lock(&self.entries, "memory_store");
        if !entries.contains_key(key) {
            self.make_room(&mut entries, now);
        }
        entries.insert(key.to_string(), StoredEntry::new(value.to_vec(), ttl, now));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let mut entries = lock(&self.entries, "memory_store");
        Ok(entries
            .remove(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let mut entries = lock(&self.entries, "memory_store");
        match entries.get_mut(key).filter(|entry| !entry.is_expired(now)) {
            Some(entry) => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn scan_pattern(&self, pattern: &str, limit: usize) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let entries = lock(&self.entries, "memory_store");
        Ok(entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .take(limit)
            .collect())
    }

    async fn increment(&self, key: &str, window_ttl: Duration) -> StoreResult<Counter> {
        let now = Instant::now();
        let mut entries = lock(&self.entries, "memory_store");

        if let Some(entry) = entries.get_mut(key).filter(|entry| !entry.is_expired(now)) {
            let current: u64 = std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|raw| raw.parse().ok())
                .ok_or_else(|| StoreError::Command {
                    op: "increment",
                    message: format!("value at '{key}' is not an integer"),
                })?;
            let count = current + 1;
            entry.value = count.to_string().into_bytes();
            return Ok(Counter {
                count,
                ttl: entry.ttl_remaining(now),
            });
        }

        if !entries.contains_key(key) {
            self.make_room(&mut entries, now);
        }
        entries.insert(
            key.to_string(),
            StoredEntry::new(b"1".to_vec(), window_ttl, now),
        );
        Ok(Counter {
            count: 1,
            ttl: window_ttl,
        })
    }

    async fn ping(&self) -> StoreResult<Duration> {
        let started = Instant::now();
        drop(lock(&self.entries, "memory_store"));
        Ok(started.elapsed())
    }
}
