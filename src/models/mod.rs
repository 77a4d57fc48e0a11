//! Request and Response models for the edge API
//!
//! DTOs used for serializing/deserializing HTTP request and response
//! bodies of the cache, session and health endpoints.

pub mod requests;
pub mod responses;

pub use requests::{CreateSessionRequest, InvalidateRequest};
pub use responses::{
    InvalidateResponse, PolicySummary, SessionCreatedResponse, SessionDestroyedResponse,
    SessionResponse, StatsResponse,
};
