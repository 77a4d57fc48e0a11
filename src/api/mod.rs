//! API Module
//!
//! HTTP surface of the edge layer: shared state, middleware, route groups
//! and the edge layer's own endpoints.
//!
//! # Endpoints
//! - `GET /cache/health` - Store health
//! - `GET /cache/stats` - Counters and policy table
//! - `POST /cache/invalidate` - Invalidate by category and path glob
//! - `POST /sessions`, `DELETE /sessions`, `GET /sessions/current` - Sessions

pub mod groups;
pub mod handlers;
pub mod middleware;
pub mod routes;

pub use groups::RouteGroup;
pub use handlers::*;
pub use middleware::{session_token, SESSION_COOKIE, SESSION_HEADER};
pub use routes::{create_router, create_router_with};
