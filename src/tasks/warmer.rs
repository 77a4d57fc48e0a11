//! Cache Warming Task
//!
//! Replays `GET` requests for configured paths through the full router so
//! cacheable responses are repopulated before users ask for them. Requests
//! are attributed to a fixed subject, so warming is only useful for shared
//! categories.

use std::time::Duration;

use axum::{body::Body, Router};
use tokio::task::JoinHandle;
use tower::util::ServiceExt;
use tracing::{debug, info, warn};

use crate::cache::{cache_status, CacheStatus};
use crate::ratelimit::AuthenticatedSubject;

/// Subject the warmer's requests are attributed to
pub const WARMER_SUBJECT: &str = "cache-warmer";

/// Spawns a task replaying `paths` every `interval`.
pub fn spawn_warming_task(router: Router, paths: Vec<String>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(?interval, paths = paths.len(), "starting cache warmer");

        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let populated = warm_once(&router, &paths).await;
            debug!(populated, "cache warming pass finished");
        }
    })
}

/// Runs one warming pass. Returns how many paths were freshly populated.
pub async fn warm_once(router: &Router, paths: &[String]) -> usize {
    let mut populated = 0;

    for path in paths {
        let request = match axum::http::Request::get(path.as_str())
            .extension(AuthenticatedSubject(WARMER_SUBJECT.to_string()))
            .body(Body::empty())
        {
            Ok(request) => request,
            Err(err) => {
                warn!(%path, error = %err, "skipping unwarmable path");
                continue;
            }
        };

        let response = match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        if !response.status().is_success() {
            warn!(%path, status = %response.status(), "warming request failed");
            continue;
        }
        if cache_status(&response) == Some(CacheStatus::Miss) {
            populated += 1;
        }
    }

    populated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{create_router_with, AppState, RouteGroup};
    use crate::config::Config;
    use crate::policy::CacheCategory;
    use crate::store::MemoryStore;
    use axum::routing::get;
    use std::sync::Arc;

    fn router() -> Router {
        let state = AppState::new(Arc::new(MemoryStore::new(100)), &Config::default());
        let routes = state.protect(
            Router::new().route("/routes/optimal", get(|| async { "route-plan" })),
            &RouteGroup::new().cached(CacheCategory::RouteOptimization),
        )
        .unwrap();
        create_router_with(state, routes).unwrap()
    }

    #[tokio::test]
    async fn test_warm_once_populates_then_hits() {
        let router = router();
        let paths = vec!["/routes/optimal".to_string(), "/missing".to_string()];

        assert_eq!(warm_once(&router, &paths).await, 1);
        assert_eq!(warm_once(&router, &paths).await, 0);
    }
}
