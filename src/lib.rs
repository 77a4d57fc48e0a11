//! Freight Edge - caching, rate limiting and sessions for the freight API
//!
//! Middleware layer placed in front of the domain handlers. It serves
//! category-scoped cached responses, enforces a per-client request budget,
//! keeps server-side sessions and reports the health of the backing store.
//! Every component shares one [`Store`](store::Store) and degrades instead
//! of failing when that store is unreachable.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod policy;
pub mod ratelimit;
pub mod session;
pub mod stats;
pub mod store;
pub mod tasks;

mod sync;

pub use api::{create_router, create_router_with, AppState, RouteGroup};
pub use cache::{CacheStatus, ResponseCache};
pub use config::Config;
pub use error::{EdgeError, StoreError};
pub use policy::{CacheCategory, PolicyTable};
pub use ratelimit::{AuthenticatedSubject, ClientIdentity, FailMode, RateLimiter, TrustedProxies};
pub use session::SessionManager;
pub use store::{MemoryStore, RedisStore, Store};
