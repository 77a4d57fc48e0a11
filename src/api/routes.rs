//! API Routes
//!
//! Configures the Axum router with the edge layer's endpoints.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::groups::RouteGroup;
use crate::error::Result;
use super::handlers::{
    create_session_handler, current_session_handler, destroy_session_handler, health_handler,
    invalidate_handler, stats_handler, AppState,
};

/// Creates the router with the edge layer's own endpoints.
///
/// # Endpoints
/// - `GET /cache/health` - Store health (200 reachable, 503 otherwise)
/// - `GET /cache/stats` - Counters and the policy table
/// - `POST /cache/invalidate` - Drop cached entries by category and path glob
/// - `POST /sessions` - Create a session
/// - `DELETE /sessions` - Destroy the presented session
/// - `GET /sessions/current` - Read the presented session
pub fn create_router(state: AppState) -> Result<Router> {
    create_router_with(state, Router::new())
}

/// Same as [`create_router`], merged with application routes that were
/// already wrapped through [`AppState::protect`].
///
/// Fails when the default rate limit carried by `state` is invalid.
pub fn create_router_with(state: AppState, app_routes: Router<AppState>) -> Result<Router> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let sessions = state.protect(
        Router::new()
            .route(
                "/sessions",
                post(create_session_handler).delete(destroy_session_handler),
            )
            .route("/sessions/current", get(current_session_handler)),
        &RouteGroup::new()
            .with_rule(state.default_rate_limit)
            .with_sessions(),
    )?;

    Ok(Router::new()
        .route("/cache/health", get(health_handler))
        .route("/cache/stats", get(stats_handler))
        .route("/cache/invalidate", post(invalidate_handler))
        .merge(sessions)
        .merge(app_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
