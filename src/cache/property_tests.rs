//! Property-Based Tests for the Response Cache
//!
//! Uses proptest to check hit fidelity, key stability and invalidation over
//! generated requests.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
};
use proptest::prelude::*;

use crate::cache::{cache_status, CacheKey, CacheStatus, ResponseCache};
use crate::config::Config;
use crate::policy::{CacheCategory, PolicyTable};
use crate::ratelimit::ClientIdentity;
use crate::stats::EdgeStats;
use crate::store::{MemoryStore, Store};

// == Strategies ==
fn category_strategy() -> impl Strategy<Value = CacheCategory> {
    prop::sample::select(CacheCategory::ALL.to_vec())
}

fn segment_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9_-]{1,12}"
}

fn query_pairs_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("[a-z]{1,6}", "[a-zA-Z0-9]{0,8}"), 0..6)
}

fn new_cache() -> ResponseCache {
    let config = Config::default();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new(10_000));
    ResponseCache::new(
        store,
        Arc::new(PolicyTable::from_settings(&config.cache)),
        Arc::new(EdgeStats::new()),
        config.trusted_proxies.clone(),
        &config.cache,
    )
}

fn request(method: Method, uri: &str, body: Vec<u8>) -> Request {
    axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body))
        .unwrap()
}

fn encode_query(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // A hit replays the status, content type and body bytes of the response
    // that populated it.
    #[test]
    fn prop_hit_is_byte_identical(
        category in category_strategy(),
        segment in segment_strategy(),
        status in 200u16..=203,
        request_body in prop::collection::vec(any::<u8>(), 0..256),
        response_body in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let (miss, hit) = tokio_test::block_on(async {
            let cache = new_cache();
            let uri = format!("/{segment}");
            let produce = |body: Vec<u8>| move |_req: Request| async move {
                let status = StatusCode::from_u16(status).unwrap();
                (status, [(header::CONTENT_TYPE, "application/octet-stream")], body).into_response()
            };

            let miss = cache
                .serve(category, request(Method::POST, &uri, request_body.clone()), produce(response_body.clone()))
                .await;
            let hit = cache
                .serve(category, request(Method::POST, &uri, request_body.clone()), produce(Vec::new()))
                .await;
            (snapshot(miss).await, snapshot(hit).await)
        });

        prop_assert_eq!(miss.0, Some(CacheStatus::Miss));
        prop_assert_eq!(hit.0, Some(CacheStatus::Hit));
        prop_assert_eq!(miss.1, hit.1);
        prop_assert_eq!(miss.2, hit.2);
        prop_assert_eq!(&hit.3, &response_body);
        prop_assert_eq!(miss.3, hit.3);
    }

    // Reordering query parameters never changes the key.
    #[test]
    fn prop_key_ignores_query_order(
        category in category_strategy(),
        segment in segment_strategy(),
        pairs in query_pairs_strategy(),
    ) {
        let policy = PolicyTable::from_settings(&Config::default().cache).policy(category).clone();
        let identity = ClientIdentity::Address("203.0.113.9".into());
        let path = format!("/{segment}");

        let mut reversed = pairs.clone();
        reversed.reverse();
        let forward = encode_query(&pairs);
        let backward = encode_query(&reversed);

        let a = CacheKey::derive(&policy, &identity, &Method::GET, &path, Some(&forward), b"");
        let b = CacheKey::derive(&policy, &identity, &Method::GET, &path, Some(&backward), b"");
        prop_assert_eq!(a, b);
    }

    // After invalidating a path pattern, every previously cached request
    // under it misses, and requests outside it still hit.
    #[test]
    fn prop_invalidation_forces_miss(
        category in category_strategy(),
        inside in prop::collection::btree_set(segment_strategy(), 1..8),
        outside in prop::collection::btree_set(segment_strategy(), 1..4),
    ) {
        let outcome = tokio_test::block_on(async {
            let cache = new_cache();
            let inside: BTreeSet<String> = inside.iter().map(|s| format!("/fleet/{s}")).collect();
            let outside: BTreeSet<String> = outside.iter().map(|s| format!("/lanes/{s}")).collect();

            for uri in inside.iter().chain(outside.iter()) {
                cache.serve(category, request(Method::GET, uri, Vec::new()), ok_handler).await;
            }

            let removed = cache.invalidate(category, "/fleet/*").await.unwrap();

            let mut after_inside = Vec::new();
            for uri in &inside {
                let response = cache.serve(category, request(Method::GET, uri, Vec::new()), ok_handler).await;
                after_inside.push(cache_status(&response));
            }
            let mut after_outside = Vec::new();
            for uri in &outside {
                let response = cache.serve(category, request(Method::GET, uri, Vec::new()), ok_handler).await;
                after_outside.push(cache_status(&response));
            }
            (removed, inside.len(), after_inside, after_outside)
        });

        let (removed, expected, after_inside, after_outside) = outcome;
        prop_assert_eq!(removed, expected);
        prop_assert!(after_inside.iter().all(|s| *s == Some(CacheStatus::Miss)));
        prop_assert!(after_outside.iter().all(|s| *s == Some(CacheStatus::Hit)));
    }
}

async fn ok_handler(_request: Request) -> Response {
    (StatusCode::OK, "ok").into_response()
}

async fn snapshot(response: Response) -> (Option<CacheStatus>, StatusCode, Option<String>, Vec<u8>) {
    let status = cache_status(&response);
    let code = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec();
    (status, code, content_type, body)
}
