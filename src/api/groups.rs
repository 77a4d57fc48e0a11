//! Route groups
//!
//! A route group declares, at registration time, which cache category and
//! request budget apply to its routes and whether it needs sessions.
//! [`AppState::protect`] turns that declaration into middleware; routes
//! themselves stay unaware of the edge layer.

use std::time::Duration;

use axum::{middleware::from_fn_with_state, Router};

use super::handlers::AppState;
use super::middleware::{cache_layer, rate_limit_layer, session_layer, CacheGuard, RateLimitGuard};
use crate::error::Result;
use crate::policy::CacheCategory;
use crate::ratelimit::RateLimitRule;

// == Route Group ==
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteGroup {
    pub cache: Option<CacheCategory>,
    pub rate_limit: Option<RateLimitRule>,
    pub session: bool,
}

impl RouteGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caches the group's responses under `category`.
    pub fn cached(mut self, category: CacheCategory) -> Self {
        self.cache = Some(category);
        self
    }

    pub fn rate_limited(mut self, limit: u64, window: Duration) -> Self {
        self.rate_limit = Some(RateLimitRule { limit, window });
        self
    }

    pub fn with_rule(mut self, rule: RateLimitRule) -> Self {
        self.rate_limit = Some(rule);
        self
    }

    /// Loads and refreshes the caller's session on every request.
    pub fn with_sessions(mut self) -> Self {
        self.session = true;
        self
    }

    /// Rejects a declared budget that could never admit a request.
    pub fn validate(&self) -> Result<()> {
        match &self.rate_limit {
            Some(rule) => rule.validate(),
            None => Ok(()),
        }
    }
}

impl AppState {
    /// Applies a group's declared layers to `router`.
    ///
    /// Request order is rate limit, then session, then cache, then the
    /// route's handler. A group with an invalid rate limit is
    /// [`EdgeError::InvalidConfiguration`](crate::error::EdgeError), so a
    /// misdeclared router never gets served.
    pub fn protect<S>(&self, router: Router<S>, group: &RouteGroup) -> Result<Router<S>>
    where
        S: Clone + Send + Sync + 'static,
    {
        group.validate()?;
        let mut router = router;

        if let Some(category) = group.cache {
            let guard = CacheGuard {
                cache: self.cache.clone(),
                category,
            };
            router = router.route_layer(from_fn_with_state(guard, cache_layer));
        }

        if group.session {
            router = router.route_layer(from_fn_with_state(self.sessions.clone(), session_layer));
        }

        if let Some(rule) = group.rate_limit {
            let guard = RateLimitGuard {
                limiter: self.limiter.clone(),
                rule,
                trusted_proxies: self.trusted_proxies.clone(),
            };
            router = router.route_layer(from_fn_with_state(guard, rate_limit_layer));
        }

        Ok(router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EdgeError;

    #[test]
    fn builder_sets_every_field() {
        let group = RouteGroup::new()
            .cached(CacheCategory::Analytics)
            .rate_limited(10, Duration::from_secs(1))
            .with_sessions();

        assert_eq!(group.cache, Some(CacheCategory::Analytics));
        assert_eq!(
            group.rate_limit,
            Some(RateLimitRule {
                limit: 10,
                window: Duration::from_secs(1)
            })
        );
        assert!(group.session);
    }

    fn state() -> AppState {
        AppState::new(
            std::sync::Arc::new(crate::store::MemoryStore::new(10)),
            &crate::config::Config::default(),
        )
    }

    #[test]
    fn zero_limit_group_is_rejected() {
        let group = RouteGroup::new().rate_limited(0, Duration::from_secs(60));
        let err = state().protect(Router::<()>::new(), &group).err();
        assert!(matches!(err, Some(EdgeError::InvalidConfiguration(_))));
    }

    #[test]
    fn zero_window_group_is_rejected() {
        let group = RouteGroup::new()
            .cached(CacheCategory::Analytics)
            .rate_limited(10, Duration::ZERO);
        let err = state().protect(Router::<()>::new(), &group).err();
        assert!(matches!(err, Some(EdgeError::InvalidConfiguration(_))));
    }

    #[test]
    fn valid_group_is_accepted() {
        let group = RouteGroup::new()
            .cached(CacheCategory::Analytics)
            .rate_limited(10, Duration::from_secs(1))
            .with_sessions();
        let routes = || Router::<()>::new().route("/kpi", axum::routing::get(|| async { "ok" }));
        assert!(state().protect(routes(), &group).is_ok());
        assert!(state().protect(routes(), &RouteGroup::new()).is_ok());
    }

    #[test]
    fn default_group_is_unprotected() {
        assert_eq!(RouteGroup::new(), RouteGroup::default());
        assert!(RouteGroup::new().cache.is_none());
    }
}
