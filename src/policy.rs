//! Category Policy Table
//!
//! Maps each cache category to its freshness and key-scoping rule. The set of
//! categories is closed: a category name that does not parse is rejected at
//! startup, and every variant has exactly one policy.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::CacheSettings;
use crate::error::EdgeError;

// == Cache Category ==
/// A class of cacheable endpoints sharing one TTL and invalidation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    Analytics,
    RouteOptimization,
    MlPredictions,
    ExternalApi,
    Realtime,
    Session,
}

impl CacheCategory {
    /// Every category, in declaration order.
    pub const ALL: [CacheCategory; 6] = [
        CacheCategory::Analytics,
        CacheCategory::RouteOptimization,
        CacheCategory::MlPredictions,
        CacheCategory::ExternalApi,
        CacheCategory::Realtime,
        CacheCategory::Session,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::Analytics => "analytics",
            CacheCategory::RouteOptimization => "route_optimization",
            CacheCategory::MlPredictions => "ml_predictions",
            CacheCategory::ExternalApi => "external_api",
            CacheCategory::Realtime => "realtime",
            CacheCategory::Session => "session",
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheCategory {
    type Err = EdgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CacheCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| EdgeError::InvalidConfiguration(format!("unknown cache category '{s}'")))
    }
}

// == Key Scope ==
/// Whether cached responses are shared between clients or kept per identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScope {
    Shared,
    PerIdentity,
}

// == Cache Policy ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachePolicy {
    pub category: CacheCategory,
    pub ttl: Duration,
    pub scope: KeyScope,
    /// Soft cap on keys touched by one invalidation sweep
    pub max_keys_per_pattern: usize,
}

// == Policy Table ==
/// Exhaustive category → policy table, built once at startup.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: [CachePolicy; 6],
}

impl PolicyTable {
    pub fn from_settings(settings: &CacheSettings) -> Self {
        let policies = CacheCategory::ALL.map(|category| CachePolicy {
            category,
            ttl: settings.ttls.get(category),
            scope: scope_for(category),
            max_keys_per_pattern: settings.max_keys_per_pattern,
        });
        Self { policies }
    }

    /// Returns the policy for a category. Infallible because the enum is closed.
    pub fn policy(&self, category: CacheCategory) -> &CachePolicy {
        &self.policies[index_of(category)]
    }

    pub fn iter(&self) -> impl Iterator<Item = &CachePolicy> {
        self.policies.iter()
    }
}

fn scope_for(category: CacheCategory) -> KeyScope {
    match category {
        CacheCategory::Analytics | CacheCategory::Realtime | CacheCategory::Session => {
            KeyScope::PerIdentity
        }
        CacheCategory::RouteOptimization
        | CacheCategory::MlPredictions
        | CacheCategory::ExternalApi => KeyScope::Shared,
    }
}

fn index_of(category: CacheCategory) -> usize {
    match category {
        CacheCategory::Analytics => 0,
        CacheCategory::RouteOptimization => 1,
        CacheCategory::MlPredictions => 2,
        CacheCategory::ExternalApi => 3,
        CacheCategory::Realtime => 4,
        CacheCategory::Session => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_category_round_trips_through_name() {
        for category in CacheCategory::ALL {
            assert_eq!(category.as_str().parse::<CacheCategory>().unwrap(), category);
        }
    }

    #[test]
    fn test_unknown_category_is_a_configuration_error() {
        let err = "weather".parse::<CacheCategory>().unwrap_err();
        assert!(matches!(err, EdgeError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_table_covers_every_category_once() {
        let config = Config::default();
        let table = PolicyTable::from_settings(&config.cache);

        for category in CacheCategory::ALL {
            assert_eq!(table.policy(category).category, category);
        }
        assert_eq!(table.iter().count(), CacheCategory::ALL.len());
    }

    #[test]
    fn test_table_uses_configured_ttls() {
        let config = Config::default();
        let table = PolicyTable::from_settings(&config.cache);

        assert_eq!(
            table.policy(CacheCategory::Analytics).ttl,
            Duration::from_secs(300)
        );
        assert_eq!(
            table.policy(CacheCategory::Realtime).ttl,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_scopes() {
        let table = PolicyTable::from_settings(&Config::default().cache);
        assert_eq!(table.policy(CacheCategory::Analytics).scope, KeyScope::PerIdentity);
        assert_eq!(table.policy(CacheCategory::ExternalApi).scope, KeyScope::Shared);
    }

    #[test]
    fn test_serde_names_match_display() {
        let json = serde_json::to_string(&CacheCategory::MlPredictions).unwrap();
        assert_eq!(json, "\"ml_predictions\"");
    }
}
