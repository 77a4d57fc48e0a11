//! Integration Tests for the Edge Layer
//!
//! Drives full request/response cycles through protected route groups and
//! the edge layer's own endpoints.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::ConnectInfo,
    http::{Request, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use freight_edge::{
    api::{create_router_with, AppState, RouteGroup},
    config::Config,
    error::StoreResult,
    ratelimit::TrustedProxies,
    store::{Counter, MemoryStore, Store},
    CacheCategory, StoreError,
};
use serde_json::{json, Value};
use tower::ServiceExt;

// == Helper Functions ==

struct TestApp {
    router: Router,
    route_calls: Arc<AtomicUsize>,
}

fn build_app(store: Arc<dyn Store>) -> TestApp {
    build_app_with(store, Config::default())
}

fn build_app_with(store: Arc<dyn Store>, config: Config) -> TestApp {
    let state = AppState::new(store, &config);
    let route_calls = Arc::new(AtomicUsize::new(0));

    let calls = Arc::clone(&route_calls);
    let shared = state.protect(
        Router::new().route(
            "/routes/optimal",
            get(move || {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Json(json!({ "route": ["CHI", "DEN", "SLC"], "computed": n }))
                }
            }),
        ),
        &RouteGroup::new().cached(CacheCategory::RouteOptimization),
    )
    .unwrap();

    let analytics = state.protect(
        Router::new().route(
            "/analytics/lanes",
            post(|Json(body): Json<Value>| async move {
                Json(json!({ "region": body["region"], "lanes": 12 }))
            }),
        ),
        &RouteGroup::new()
            .cached(CacheCategory::Analytics)
            .rate_limited(5, Duration::from_secs(60))
            .with_sessions(),
    )
    .unwrap();

    let routes = Router::new().merge(shared).merge(analytics);
    TestApp {
        router: create_router_with(state, routes).unwrap(),
        route_calls,
    }
}

fn memory_app() -> TestApp {
    build_app(Arc::new(MemoryStore::new(1000)))
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .extension(ConnectInfo(SocketAddr::from(([198, 51, 100, 20], 51000))))
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn lanes_from(peer: [u8; 4], forwarded_for: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/analytics/lanes")
        .header("content-type", "application/json")
        .header("x-forwarded-for", forwarded_for)
        .extension(ConnectInfo(SocketAddr::from((peer, 51000))))
        .body(Body::from(json!({"region": "north"}).to_string()))
        .unwrap()
}

fn x_cache(response: &Response) -> &str {
    response.headers()["x-cache"].to_str().unwrap()
}

/// Store whose every operation fails as unreachable.
struct UnreachableStore;

#[async_trait]
impl Store for UnreachableStore {
    fn backend(&self) -> &'static str {
        "unreachable"
    }
    async fn get(&self, _: &str) -> StoreResult<Option<Vec<u8>>> {
        Err(down("get"))
    }
    async fn set(&self, _: &str, _: &[u8], _: Duration) -> StoreResult<()> {
        Err(down("set"))
    }
    async fn delete(&self, _: &str) -> StoreResult<bool> {
        Err(down("delete"))
    }
    async fn expire(&self, _: &str, _: Duration) -> StoreResult<bool> {
        Err(down("expire"))
    }
    async fn scan_pattern(&self, _: &str, _: usize) -> StoreResult<Vec<String>> {
        Err(down("scan"))
    }
    async fn increment(&self, _: &str, _: Duration) -> StoreResult<Counter> {
        Err(down("increment"))
    }
    async fn ping(&self) -> StoreResult<Duration> {
        Err(down("ping"))
    }
}

fn down(op: &'static str) -> StoreError {
    StoreError::Unavailable {
        op,
        attempts: 3,
        last: "connection refused".into(),
    }
}

// == Cache Tests ==

#[tokio::test]
async fn test_cached_route_hit_is_byte_identical() {
    let app = memory_app();

    let first = send(&app.router, get_request("/routes/optimal")).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(x_cache(&first), "MISS");
    let first_body = axum::body::to_bytes(first.into_body(), usize::MAX).await.unwrap();

    let second = send(&app.router, get_request("/routes/optimal")).await;
    assert_eq!(x_cache(&second), "HIT");
    assert_eq!(second.headers()["content-type"], "application/json");
    let second_body = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();

    assert_eq!(first_body, second_body);
    assert_eq!(app.route_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_post_bodies_are_part_of_the_key() {
    let app = memory_app();

    let west = send(&app.router, json_request("POST", "/analytics/lanes", json!({"region": "west"}))).await;
    let east = send(&app.router, json_request("POST", "/analytics/lanes", json!({"region": "east"}))).await;
    assert_eq!(x_cache(&west), "MISS");
    assert_eq!(x_cache(&east), "MISS");
    assert_eq!(body_to_json(east.into_body()).await["region"], "east");

    let west_again = send(&app.router, json_request("POST", "/analytics/lanes", json!({"region": "west"}))).await;
    assert_eq!(x_cache(&west_again), "HIT");
    assert_eq!(body_to_json(west_again.into_body()).await["region"], "west");
}

#[tokio::test]
async fn test_streamed_body_over_cache_limit_passes_through() {
    let app = memory_app();
    let limit = Config::default().cache.max_payload_bytes;

    let padding = "x".repeat(limit);
    let chunks: Vec<std::io::Result<Bytes>> = vec![
        Ok(Bytes::from_static(br#"{"region":"west","pad":""#)),
        Ok(Bytes::from(padding)),
        Ok(Bytes::from_static(br#""}"#)),
    ];
    let request = Request::builder()
        .method("POST")
        .uri("/analytics/lanes")
        .header("content-type", "application/json")
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .unwrap();

    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(x_cache(&response), "BYPASS");
    assert_eq!(body_to_json(response.into_body()).await["region"], "west");
}

#[tokio::test]
async fn test_invalidate_endpoint_forces_miss() {
    let app = memory_app();

    send(&app.router, get_request("/routes/optimal")).await;
    let response = send(
        &app.router,
        json_request(
            "POST",
            "/cache/invalidate",
            json!({"category": "route_optimization", "pattern": "/routes/*"}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_json(response.into_body()).await["removed"], 1);

    let after = send(&app.router, get_request("/routes/optimal")).await;
    assert_eq!(x_cache(&after), "MISS");
    assert_eq!(app.route_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_first_requests_leave_one_entry() {
    let store = Arc::new(MemoryStore::new(1000));
    let app = build_app(store.clone());

    let requests: Vec<_> = (0..16)
        .map(|_| {
            let router = app.router.clone();
            tokio::spawn(async move { router.oneshot(get_request("/routes/optimal")).await.unwrap() })
        })
        .collect();
    for request in requests {
        assert_eq!(request.await.unwrap().status(), StatusCode::OK);
    }

    let keys = store
        .scan_pattern("cache:route_optimization:*", 100)
        .await
        .unwrap();
    assert_eq!(keys.len(), 1);
}

// == Rate Limit Tests ==

#[tokio::test]
async fn test_rate_limit_rejects_sixth_request() {
    let app = memory_app();

    for remaining in (0..5).rev() {
        let response = send(&app.router, json_request("POST", "/analytics/lanes", json!({"region": "n"}))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], remaining.to_string().as_str());
    }

    let rejected = send(&app.router, json_request("POST", "/analytics/lanes", json!({"region": "n"}))).await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = rejected.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));
    assert!(body_to_json(rejected.into_body()).await.get("error").is_some());
}

#[tokio::test]
async fn test_rotating_forwarded_for_does_not_reset_budget() {
    let app = memory_app();

    let mut allowed = 0;
    for i in 0..20 {
        let response = send(&app.router, lanes_from([203, 0, 113, 7], &format!("10.9.9.{i}"))).await;
        if response.status() == StatusCode::OK {
            allowed += 1;
        } else {
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        }
    }
    assert_eq!(allowed, 5);
}

#[tokio::test]
async fn test_trusted_proxy_forwards_client_address() {
    let config = Config {
        trusted_proxies: TrustedProxies::new(["10.0.0.1".parse().unwrap()]),
        ..Config::default()
    };
    let app = build_app_with(Arc::new(MemoryStore::new(1000)), config);

    // Two clients behind the same proxy get separate budgets.
    for _ in 0..5 {
        let response = send(&app.router, lanes_from([10, 0, 0, 1], "192.0.2.66, 198.51.100.1")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let exhausted = send(&app.router, lanes_from([10, 0, 0, 1], "192.0.2.99, 198.51.100.1")).await;
    assert_eq!(exhausted.status(), StatusCode::TOO_MANY_REQUESTS);

    let other = send(&app.router, lanes_from([10, 0, 0, 1], "198.51.100.2")).await;
    assert_eq!(other.status(), StatusCode::OK);
}

// == Session Tests ==

#[tokio::test]
async fn test_session_lifecycle() {
    let app = memory_app();

    let created = send(
        &app.router,
        json_request("POST", "/sessions", json!({"payload": {"user_id": 42}})),
    )
    .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    assert!(created.headers()["set-cookie"]
        .to_str()
        .unwrap()
        .starts_with("freight_session="));
    let token = body_to_json(created.into_body()).await["token"]
        .as_str()
        .unwrap()
        .to_string();

    let current = send(
        &app.router,
        Request::builder()
            .uri("/sessions/current")
            .header("x-session-token", &token)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(current.status(), StatusCode::OK);
    assert_eq!(body_to_json(current.into_body()).await["payload"]["user_id"], 42);

    let destroyed = send(
        &app.router,
        Request::builder()
            .method("DELETE")
            .uri("/sessions")
            .header("cookie", format!("freight_session={token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(destroyed.status(), StatusCode::OK);
    assert_eq!(body_to_json(destroyed.into_body()).await["destroyed"], true);

    let gone = send(
        &app.router,
        Request::builder()
            .uri("/sessions/current")
            .header("x-session-token", &token)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_destroy_without_token_is_bad_request() {
    let app = memory_app();
    let response = send(
        &app.router,
        Request::builder()
            .method("DELETE")
            .uri("/sessions")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// == Degraded Store Tests ==

#[tokio::test]
async fn test_unreachable_store_degrades_gracefully() {
    let app = build_app(Arc::new(UnreachableStore));

    let cached = send(&app.router, get_request("/routes/optimal")).await;
    assert_eq!(cached.status(), StatusCode::OK);
    assert_eq!(x_cache(&cached), "BYPASS");

    // Fail-open: the limiter lets traffic through while the store is down.
    for _ in 0..10 {
        let response = send(&app.router, json_request("POST", "/analytics/lanes", json!({}))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let health = send(&app.router, get_request("/cache/health")).await;
    assert_eq!(health.status(), StatusCode::SERVICE_UNAVAILABLE);
    let health = body_to_json(health.into_body()).await;
    assert_eq!(health["reachable"], false);
    assert!(health["degraded_since"].is_string());

    let invalidate = send(
        &app.router,
        json_request("POST", "/cache/invalidate", json!({"category": "analytics", "pattern": "*"})),
    )
    .await;
    assert_eq!(invalidate.status(), StatusCode::SERVICE_UNAVAILABLE);

    let session = send(&app.router, json_request("POST", "/sessions", json!({}))).await;
    assert_eq!(session.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// == Health and Stats Tests ==

#[tokio::test]
async fn test_health_and_stats() {
    let app = memory_app();

    let health = send(&app.router, get_request("/cache/health")).await;
    assert_eq!(health.status(), StatusCode::OK);
    let health = body_to_json(health.into_body()).await;
    assert_eq!(health["reachable"], true);
    assert_eq!(health["backend"], "memory");

    send(&app.router, get_request("/routes/optimal")).await;
    send(&app.router, get_request("/routes/optimal")).await;

    let stats = send(&app.router, get_request("/cache/stats")).await;
    let stats = body_to_json(stats.into_body()).await;
    assert_eq!(stats["hits"], 1);
    assert_eq!(stats["misses"], 1);
    assert_eq!(stats["hit_rate"], 0.5);
    assert_eq!(stats["rate_limit_fail_mode"], "open");
}

// == Real Socket Test ==

#[tokio::test]
async fn test_rate_limit_over_tcp_uses_peer_address() {
    let app = memory_app();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/analytics/lanes");
    let mut statuses = Vec::new();
    for _ in 0..6 {
        let response = client
            .post(&url)
            .json(&json!({"region": "tcp"}))
            .send()
            .await
            .unwrap();
        statuses.push(response.status().as_u16());
    }

    assert_eq!(statuses, vec![200, 200, 200, 200, 200, 429]);
    server.abort();
}
