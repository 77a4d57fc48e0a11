//! API Handlers
//!
//! Application state and the handlers for the edge layer's own endpoints:
//! store health, counters, cache invalidation and session lifecycle.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use tracing::info;

use super::middleware::{session_cookie, session_token, CLEAR_SESSION_COOKIE};
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::error::{EdgeError, Result};
use crate::health::{HealthReporter, HealthStatus};
use crate::models::{
    CreateSessionRequest, InvalidateRequest, InvalidateResponse, PolicySummary,
    SessionCreatedResponse, SessionDestroyedResponse, SessionResponse, StatsResponse,
};
use crate::policy::{CacheCategory, PolicyTable};
use crate::ratelimit::{RateLimitRule, RateLimiter, TrustedProxies};
use crate::session::{SessionContext, SessionManager};
use crate::stats::EdgeStats;
use crate::store::Store;

/// Application state shared across all handlers and middleware.
///
/// Every component is built once here and handed out by reference; nothing
/// in the edge layer reaches for a global.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub policies: Arc<PolicyTable>,
    pub cache: ResponseCache,
    pub limiter: RateLimiter,
    pub sessions: SessionManager,
    pub health: Arc<HealthReporter>,
    pub stats: Arc<EdgeStats>,
    /// Peers allowed to report client addresses
    pub trusted_proxies: TrustedProxies,
    /// Budget applied to groups that do not declare their own
    pub default_rate_limit: RateLimitRule,
}

impl AppState {
    /// Wires every component around one shared store.
    pub fn new(store: Arc<dyn Store>, config: &Config) -> Self {
        let stats = Arc::new(EdgeStats::new());
        let policies = Arc::new(PolicyTable::from_settings(&config.cache));
        let cache = ResponseCache::new(
            Arc::clone(&store),
            Arc::clone(&policies),
            Arc::clone(&stats),
            config.trusted_proxies.clone(),
            &config.cache,
        );
        let limiter = RateLimiter::new(
            Arc::clone(&store),
            config.rate_limit.fail_mode,
            Arc::clone(&stats),
        );
        let sessions = SessionManager::new(
            Arc::clone(&store),
            policies.policy(CacheCategory::Session).ttl,
            Arc::clone(&stats),
        );
        let health = Arc::new(HealthReporter::new(
            Arc::clone(&store),
            config.health_probe_timeout,
        ));

        Self {
            store,
            policies,
            cache,
            limiter,
            sessions,
            health,
            stats,
            trusted_proxies: config.trusted_proxies.clone(),
            default_rate_limit: RateLimitRule {
                limit: config.rate_limit.limit,
                window: config.rate_limit.window,
            },
        }
    }
}

/// Handler for GET /cache/health
///
/// 200 with the status body when the store answers, 503 otherwise.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let status = state.health.check().await;
    let code = if status.reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

/// Handler for GET /cache/stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        counters: state.stats.snapshot(),
        backend: state.store.backend(),
        rate_limit_fail_mode: state.limiter.fail_mode(),
        policies: state.policies.iter().map(PolicySummary::from).collect(),
    })
}

/// Handler for POST /cache/invalidate
///
/// Store failures surface as 503: a silently skipped invalidation would
/// keep serving stale data.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(EdgeError::InvalidRequest(error_msg));
    }
    let category = req
        .category()
        .ok_or_else(|| EdgeError::InvalidRequest(format!("Unknown cache category '{}'", req.category)))?;

    let removed = state.cache.invalidate(category, &req.pattern).await?;
    info!(%category, pattern = %req.pattern, removed, "cache invalidated via api");

    Ok(Json(InvalidateResponse {
        category,
        pattern: req.pattern,
        removed,
    }))
}

/// Handler for POST /sessions
///
/// Returns the token in the body and as an HttpOnly cookie.
pub async fn create_session_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Response> {
    let token = state.sessions.create(req.payload).await?;
    let ttl = state.sessions.ttl();

    let mut response = (
        StatusCode::CREATED,
        Json(SessionCreatedResponse {
            token: token.clone(),
            expires_in_secs: ttl.as_secs(),
        }),
    )
        .into_response();
    if let Ok(cookie) = HeaderValue::from_str(&session_cookie(&token, ttl)) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    Ok(response)
}

/// Handler for DELETE /sessions
pub async fn destroy_session_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response> {
    let token = session_token(&headers)
        .ok_or_else(|| EdgeError::InvalidRequest("No session token presented".to_string()))?;
    let destroyed = state.sessions.destroy(&token).await?;

    let mut response = Json(SessionDestroyedResponse { destroyed }).into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, HeaderValue::from_static(CLEAR_SESSION_COOKIE));
    Ok(response)
}

/// Handler for GET /sessions/current
///
/// Reads the context attached by the session layer.
pub async fn current_session_handler(
    session: Option<Extension<SessionContext>>,
) -> Result<Json<SessionResponse>> {
    match session {
        Some(Extension(context)) => Ok(Json(SessionResponse::from(context))),
        None => Err(EdgeError::NotFound("No active session".to_string())),
    }
}
