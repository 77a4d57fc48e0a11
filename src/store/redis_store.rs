//! Redis-backed [`Store`].
//!
//! Connections are opened lazily into a fixed-size round-robin pool of
//! multiplexed, auto-reconnecting [`ConnectionManager`]s, so the process can
//! start and serve (degraded) while the store is down.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use tokio::sync::OnceCell;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};
use url::Url;

use super::{Counter, RetryPolicy, Store};
use crate::config::StoreSettings;
use crate::error::{EdgeError, StoreError, StoreResult};

/// `INCR`, arm the TTL only for a fresh counter, report what is left of it.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return {count, redis.call('PTTL', KEYS[1])}
"#;

const SCAN_BATCH: usize = 256;

// == Redis Store ==
pub struct RedisStore {
    client: Client,
    pool: Vec<OnceCell<ConnectionManager>>,
    next: AtomicUsize,
    prefix: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    retry: RetryPolicy,
    increment: Script,
}

impl RedisStore {
    /// Builds the client from settings. No connection is made here.
    pub fn new(settings: &StoreSettings) -> Result<Self, EdgeError> {
        let url = connection_url(settings)?;
        let client = Client::open(url.as_str())
            .map_err(|e| EdgeError::InvalidConfiguration(format!("redis client: {e}")))?;

        info!(
            host = %settings.host,
            port = settings.port,
            tls = settings.tls,
            pool_size = settings.pool_size,
            "Redis store configured"
        );

        Ok(Self {
            client,
            pool: (0..settings.pool_size.max(1)).map(|_| OnceCell::new()).collect(),
            next: AtomicUsize::new(0),
            prefix: settings.key_prefix.clone(),
            connect_timeout: settings.connect_timeout,
            read_timeout: settings.read_timeout,
            write_timeout: settings.write_timeout,
            retry: settings.retry,
            increment: Script::new(INCREMENT_SCRIPT),
        })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Picks the next pool slot, connecting it on first use.
    async fn connection(&self) -> StoreResult<ConnectionManager> {
        let slot = &self.pool[self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len()];
        let conn = slot
            .get_or_try_init(|| async {
                debug!("opening redis connection");
                match timeout(self.connect_timeout, ConnectionManager::new(self.client.clone()))
                    .await
                {
                    Ok(result) => result.map_err(|e| classify("connect", e)),
                    Err(_) => Err(StoreError::Timeout {
                        op: "connect",
                        after: self.connect_timeout,
                    }),
                }
            })
            .await?;
        Ok(conn.clone())
    }

    /// Runs one command with a per-attempt deadline under the retry policy.
    async fn run<T, F, Fut>(&self, op: &'static str, deadline: Duration, command: F) -> StoreResult<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let command = &command;
        self.retry
            .run(op, || async move {
                let conn = self.connection().await?;
                match timeout(deadline, command(conn)).await {
                    Ok(result) => result.map_err(|e| classify(op, e)),
                    Err(_) => Err(StoreError::Timeout { op, after: deadline }),
                }
            })
            .await
    }
}

#[async_trait]
impl Store for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let key = self.prefixed(key);
        self.run("get", self.read_timeout, |mut conn| {
            let key = key.as_str();
            async move { redis::cmd("GET").arg(key).query_async(&mut conn).await }
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let key = self.prefixed(key);
        let ttl_ms = ttl.as_millis().max(1) as u64;
        self.run("set", self.write_timeout, |mut conn| {
            let key = key.as_str();
            async move {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut conn)
                    .await
            }
        })
        .await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let key = self.prefixed(key);
        let removed: i64 = self
            .run("delete", self.write_timeout, |mut conn| {
                let key = key.as_str();
                async move { redis::cmd("DEL").arg(key).query_async(&mut conn).await }
            })
            .await?;
        Ok(removed > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let key = self.prefixed(key);
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let updated: i64 = self
            .run("expire", self.write_timeout, |mut conn| {
                let key = key.as_str();
                async move {
                    redis::cmd("PEXPIRE")
                        .arg(key)
                        .arg(ttl_ms)
                        .query_async(&mut conn)
                        .await
                }
            })
            .await?;
        Ok(updated == 1)
    }

    async fn scan_pattern(&self, pattern: &str, limit: usize) -> StoreResult<Vec<String>> {
        let pattern = self.prefixed(pattern);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .run("scan", self.read_timeout, |mut conn| {
                    let pattern = pattern.as_str();
                    async move {
                        redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(pattern)
                            .arg("COUNT")
                            .arg(SCAN_BATCH)
                            .query_async(&mut conn)
                            .await
                    }
                })
                .await?;

            keys.extend(
                batch
                    .into_iter()
                    .filter_map(|key| key.strip_prefix(&self.prefix).map(String::from)),
            );
            if keys.len() >= limit || next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may repeat keys across iterations.
        keys.sort();
        keys.dedup();
        keys.truncate(limit);
        Ok(keys)
    }

    async fn increment(&self, key: &str, window_ttl: Duration) -> StoreResult<Counter> {
        let key = self.prefixed(key);
        let ttl_ms = window_ttl.as_millis().max(1) as u64;
        let (count, pttl): (i64, i64) = self
            .run("increment", self.write_timeout, |mut conn| {
                let key = key.as_str();
                async move {
                    self.increment
                        .key(key)
                        .arg(ttl_ms)
                        .invoke_async(&mut conn)
                        .await
                }
            })
            .await?;

        Ok(Counter {
            count: count.max(0) as u64,
            // -1/-2 would mean no TTL or no key; fall back to the full window.
            ttl: if pttl > 0 {
                Duration::from_millis(pttl as u64)
            } else {
                window_ttl
            },
        })
    }

    async fn ping(&self) -> StoreResult<Duration> {
        let started = Instant::now();
        let mut conn = self.connection().await?;
        let probe = async {
            let reply: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
            reply
        };
        match timeout(self.read_timeout, probe).await {
            Ok(Ok(_)) => Ok(started.elapsed()),
            Ok(Err(e)) => Err(classify("ping", e)),
            Err(_) => Err(StoreError::Timeout {
                op: "ping",
                after: self.read_timeout,
            }),
        }
    }
}

/// Splits driver errors into retryable connectivity faults and command errors.
fn classify(op: &'static str, err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Connection {
            op,
            message: err.to_string(),
        }
    } else if err.is_timeout() {
        StoreError::Timeout {
            op,
            after: Duration::ZERO,
        }
    } else {
        StoreError::Command {
            op,
            message: err.to_string(),
        }
    }
}

/// Builds `redis://` or `rediss://` with percent-encoded credentials.
fn connection_url(settings: &StoreSettings) -> Result<Url, EdgeError> {
    let scheme = if settings.tls { "rediss" } else { "redis" };
    let mut url = Url::parse(&format!(
        "{scheme}://{}:{}/{}",
        settings.host, settings.port, settings.database
    ))
    .map_err(|e| EdgeError::InvalidConfiguration(format!("redis address: {e}")))?;

    let bad_credentials = |_| EdgeError::InvalidConfiguration("redis credentials".to_string());
    if let Some(username) = &settings.username {
        url.set_username(username).map_err(bad_credentials)?;
    }
    if let Some(password) = &settings.password {
        url.set_password(Some(password)).map_err(bad_credentials)?;
    }
    if settings.tls && settings.tls_insecure {
        url.set_fragment(Some("insecure"));
    }
    Ok(url)
}
