//! Request middleware
//!
//! The three layers a protected route group can stack, outermost first:
//! rate limiting, session attachment and response caching.

use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::cache::ResponseCache;
use crate::error::EdgeError;
use crate::policy::CacheCategory;
use crate::ratelimit::{ClientIdentity, RateDecision, RateLimitRule, RateLimiter, TrustedProxies};
use crate::session::SessionManager;

/// Header carrying a session token
pub const SESSION_HEADER: &str = "x-session-token";
/// Cookie carrying a session token
pub const SESSION_COOKIE: &str = "freight_session";
pub(crate) const CLEAR_SESSION_COOKIE: &str =
    "freight_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0";

const RATE_LIMIT_HEADER: &str = "x-ratelimit-limit";
const RATE_REMAINING_HEADER: &str = "x-ratelimit-remaining";

// == Rate Limit ==
#[derive(Clone)]
pub struct RateLimitGuard {
    pub limiter: RateLimiter,
    pub rule: RateLimitRule,
    pub trusted_proxies: TrustedProxies,
}

pub async fn rate_limit_layer(
    State(guard): State<RateLimitGuard>,
    request: Request,
    next: Next,
) -> Response {
    let identity = ClientIdentity::resolve(
        request.headers(),
        request.extensions(),
        &guard.trusted_proxies,
    );
    let decision = guard
        .limiter
        .allow(&identity, guard.rule.limit, guard.rule.window)
        .await;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        debug!(%identity, path = %request.uri().path(), "request rejected by rate limit");
        EdgeError::RateLimitExceeded {
            retry_after: decision.retry_after,
        }
        .into_response()
    };
    apply_rate_headers(&mut response, &decision);
    response
}

fn apply_rate_headers(response: &mut Response, decision: &RateDecision) {
    let headers = response.headers_mut();
    headers.insert(RATE_LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(RATE_REMAINING_HEADER, HeaderValue::from(decision.remaining));
}

// == Session ==
/// Attaches a [`SessionContext`](crate::session::SessionContext) for
/// requests presenting a live token and slides its expiry. Store faults
/// degrade to "no session".
pub async fn session_layer(
    State(sessions): State<SessionManager>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = session_token(request.headers()) {
        match sessions.touch(&token).await {
            Ok(Some(context)) => {
                request.extensions_mut().insert(context);
            }
            Ok(None) => debug!("presented session not found"),
            Err(err) => warn!(error = %err, "session store unavailable, continuing without session"),
        }
    }
    next.run(request).await
}

/// Token from the `x-session-token` header, else the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = from_header {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

pub(crate) fn session_cookie(token: &str, ttl: Duration) -> String {
    format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        ttl.as_secs()
    )
}

// == Cache ==
#[derive(Clone)]
pub struct CacheGuard {
    pub cache: ResponseCache,
    pub category: CacheCategory,
}

pub async fn cache_layer(State(guard): State<CacheGuard>, request: Request, next: Next) -> Response {
    guard
        .cache
        .serve(guard.category, request, |request| next.run(request))
        .await
}
