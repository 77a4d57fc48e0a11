//! Cache Module
//!
//! Response cache placed in front of expensive handlers. Keys are derived
//! from the category, the request shape and (for per-identity categories)
//! the caller; values are captured responses written with the category TTL.
//!
//! Store faults never fail a request here: a failed read degrades to
//! pass-through, a failed write is logged and dropped.

mod entry;
mod key;
mod single_flight;

#[cfg(test)]
mod property_tests;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use futures::{stream, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::CacheSettings;
use crate::error::{EdgeError, Result, StoreResult};
use crate::policy::{CacheCategory, CachePolicy, PolicyTable};
use crate::ratelimit::{ClientIdentity, TrustedProxies};
use crate::stats::EdgeStats;
use crate::store::Store;

pub use entry::{is_cacheable, CachedResponse};
pub use key::{normalize_path, sorted_query, CacheKey};

use single_flight::{Flight, SingleFlight};

// == Public Constants ==
/// Response header reporting where a response came from
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Boxed handler produced by [`ResponseCache::wrap`].
pub type BoxedHandler =
    Arc<dyn Fn(Request) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync>;

// == Cache Status ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the store
    Hit,
    /// Computed by the handler (and written back when cacheable)
    Miss,
    /// Passed through without touching the cache
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

enum Lookup {
    Hit(Response),
    Miss,
    Unavailable,
}

// == Response Cache ==
/// Shared, cheaply cloneable response cache.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    store: Arc<dyn Store>,
    policies: Arc<PolicyTable>,
    stats: Arc<EdgeStats>,
    trusted_proxies: TrustedProxies,
    flights: SingleFlight,
    /// Permits for in-flight background writes
    writes: Arc<Semaphore>,
    max_payload_bytes: usize,
    single_flight_wait: Duration,
}

impl ResponseCache {
    // == Constructor ==
    pub fn new(
        store: Arc<dyn Store>,
        policies: Arc<PolicyTable>,
        stats: Arc<EdgeStats>,
        trusted_proxies: TrustedProxies,
        settings: &CacheSettings,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                policies,
                stats,
                trusted_proxies,
                flights: SingleFlight::new(),
                writes: Arc::new(Semaphore::new(settings.max_background_writes)),
                max_payload_bytes: settings.max_payload_bytes,
                single_flight_wait: settings.single_flight_wait,
            }),
        }
    }

    pub fn policy(&self, category: CacheCategory) -> &CachePolicy {
        self.inner.policies.policy(category)
    }

    // == Wrap ==
    /// Returns `handler` with caching applied under `category`.
    pub fn wrap<H, Fut>(&self, category: CacheCategory, handler: H) -> BoxedHandler
    where
        H: Fn(Request) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let cache = self.clone();
        Arc::new(
            move |request: Request| -> Pin<Box<dyn Future<Output = Response> + Send>> {
                let cache = cache.clone();
                let handler = handler.clone();
                Box::pin(async move { cache.serve(category, request, handler).await })
            },
        )
    }

    // == Serve ==
    /// Answers `request` from the cache or by running `handler`.
    ///
    /// The response always carries an `x-cache` header of `HIT`, `MISS` or
    /// `BYPASS`.
    pub async fn serve<H, Fut>(&self, category: CacheCategory, request: Request, handler: H) -> Response
    where
        H: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let inner = &self.inner;
        let policy = inner.policies.policy(category);

        if declared_length(&request).is_some_and(|len| len > inner.max_payload_bytes) {
            debug!(%category, "request body over cache limit, bypassing");
            inner.stats.record_bypass();
            return mark(handler(request).await, CacheStatus::Bypass);
        }

        let (parts, body) = request.into_parts();
        let body = match buffer_body(body, inner.max_payload_bytes).await {
            Ok(bytes) => bytes,
            Err(replayed) => {
                debug!(%category, "streamed request body over cache limit, bypassing");
                inner.stats.record_bypass();
                let request = Request::from_parts(parts, replayed);
                return mark(handler(request).await, CacheStatus::Bypass);
            }
        };

        let identity = ClientIdentity::resolve(&parts.headers, &parts.extensions, &inner.trusted_proxies);
        let key = CacheKey::derive(
            policy,
            &identity,
            &parts.method,
            parts.uri.path(),
            parts.uri.query(),
            &body,
        );
        let request = Request::from_parts(parts, Body::from(body));

        match self.lookup(&key).await {
            Lookup::Hit(response) => return response,
            Lookup::Unavailable => {
                inner.stats.record_bypass();
                return mark(handler(request).await, CacheStatus::Bypass);
            }
            Lookup::Miss => {}
        }

        match inner.flights.begin(key.as_str()) {
            Flight::Leader(_lease) => self.compute(policy, &key, request, handler).await,
            Flight::Follower(follower) => {
                if !follower.wait(inner.single_flight_wait).await {
                    debug!(key = %key, "single-flight wait elapsed, computing independently");
                }
                match self.lookup(&key).await {
                    Lookup::Hit(response) => response,
                    Lookup::Miss => self.compute(policy, &key, request, handler).await,
                    Lookup::Unavailable => {
                        inner.stats.record_bypass();
                        mark(handler(request).await, CacheStatus::Bypass)
                    }
                }
            }
        }
    }

    async fn lookup(&self, key: &CacheKey) -> Lookup {
        let inner = &self.inner;
        match inner.store.get(key.as_str()).await {
            Ok(Some(bytes)) => match CachedResponse::decode(&bytes) {
                Ok(cached) => {
                    debug!(key = %key, outcome = "hit", "serving cached response");
                    inner.stats.record_hit();
                    Lookup::Hit(mark(cached.into_response(), CacheStatus::Hit))
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "discarding undecodable cache entry");
                    Lookup::Miss
                }
            },
            Ok(None) => Lookup::Miss,
            Err(err) => {
                warn!(key = %key, error = %err, "cache read failed, passing through");
                inner.stats.record_store_error();
                Lookup::Unavailable
            }
        }
    }

    /// Runs the handler and writes a cacheable result back. The write runs
    /// in its own task so it completes even when the caller goes away.
    async fn compute<H, Fut>(
        &self,
        policy: &CachePolicy,
        key: &CacheKey,
        request: Request,
        handler: H,
    ) -> Response
    where
        H: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let inner = &self.inner;
        inner.stats.record_miss();
        debug!(key = %key, outcome = "miss", "cache miss, executing handler");

        let response = handler(request).await;
        if !is_cacheable(&response) {
            return mark(response, CacheStatus::Miss);
        }

        let (parts, body) = response.into_parts();
        let bytes = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to buffer handler response");
                return EdgeError::Internal(format!("response body failed: {err}")).into_response();
            }
        };

        if bytes.len() <= inner.max_payload_bytes {
            let cached = CachedResponse::capture(parts.status, &parts.headers, &bytes, policy.ttl);
            self.write_back(key.clone(), cached, policy.ttl).await;
        } else {
            debug!(key = %key, size = bytes.len(), "response over cache limit, not stored");
        }

        mark(Response::from_parts(parts, Body::from(bytes)), CacheStatus::Miss)
    }

    async fn write_back(&self, key: CacheKey, cached: CachedResponse, ttl: Duration) {
        let inner = &self.inner;
        let permit = match Arc::clone(&inner.writes).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(key = %key, "too many cache writes in flight, skipping");
                inner.stats.record_write_skipped();
                return;
            }
        };

        let payload = match cached.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to encode cache entry");
                return;
            }
        };

        let store = Arc::clone(&inner.store);
        let stats = Arc::clone(&inner.stats);
        let task = tokio::spawn(async move {
            let _permit = permit;
            match store.set(key.as_str(), &payload, ttl).await {
                Ok(()) => stats.record_write(),
                Err(err) => {
                    warn!(key = %key, error = %err, "cache write failed");
                    stats.record_store_error();
                }
            }
        });

        if let Err(err) = task.await {
            warn!(error = %err, "cache write task aborted");
        }
    }

    // == Invalidate ==
    /// Deletes every cached entry of `category` whose path matches
    /// `path_pattern`. Returns how many keys were removed.
    ///
    /// Keys are swept in batches of the category's `max_keys_per_pattern`
    /// until no match remains.
    pub async fn invalidate(&self, category: CacheCategory, path_pattern: &str) -> Result<usize> {
        let pattern = CacheKey::invalidation_pattern(category, path_pattern);
        let batch = self.policy(category).max_keys_per_pattern;

        let removed = self
            .sweep(&pattern, batch)
            .await
            .map_err(|source| EdgeError::InvalidationFailed { category, source })?;

        self.inner.stats.record_invalidated(removed as u64);
        debug!(%category, pattern = %pattern, removed, "cache invalidated");
        Ok(removed)
    }

    async fn sweep(&self, pattern: &str, batch: usize) -> StoreResult<usize> {
        let store = &self.inner.store;
        let mut removed = 0;
        loop {
            let keys = store.scan_pattern(pattern, batch).await?;
            let mut deleted = 0;
            for key in &keys {
                if store.delete(key).await? {
                    deleted += 1;
                }
            }
            removed += deleted;

            // Keys that expired between the scan and the delete still fill
            // the batch, so only a short batch proves the sweep is done.
            if keys.len() < batch {
                return Ok(removed);
            }
        }
    }
}

/// Reads `body` fully when it fits within `limit`.
///
/// On overflow (or a body error) nothing is lost: the returned body replays
/// the chunks already read followed by the unread remainder.
async fn buffer_body(body: Body, limit: usize) -> std::result::Result<Bytes, Body> {
    let mut rest = body.into_data_stream();
    let mut read: Vec<Bytes> = Vec::new();
    let mut size = 0usize;

    while let Some(frame) = rest.next().await {
        let overflow = match &frame {
            Ok(chunk) => {
                size = size.saturating_add(chunk.len());
                size > limit
            }
            Err(_) => true,
        };
        if overflow {
            let replay = stream::iter(read.into_iter().map(Ok).chain(std::iter::once(frame)));
            return Err(Body::from_stream(replay.chain(rest)));
        }
        if let Ok(chunk) = frame {
            read.push(chunk);
        }
    }

    Ok(match read.len() {
        1 => read.swap_remove(0),
        _ => Bytes::from(read.concat()),
    })
}

fn declared_length(request: &Request) -> Option<usize> {
    request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

fn mark(mut response: Response, status: CacheStatus) -> Response {
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status.as_str()));
    response
}

/// Reads the `x-cache` marker back off a response.
pub fn cache_status(response: &Response) -> Option<CacheStatus> {
    match response.headers().get(CACHE_STATUS_HEADER)?.as_bytes() {
        b"HIT" => Some(CacheStatus::Hit),
        b"MISS" => Some(CacheStatus::Miss),
        b"BYPASS" => Some(CacheStatus::Bypass),
        _ => None,
    }
}
