//! Cache key derivation.
//!
//! Keys are structured rather than fully hashed so that invalidation can
//! target a category and a path glob:
//!
//! ```text
//! cache:{category}:{scope}:{METHOD}:{path}:{fingerprint}
//! ```
//!
//! `scope` is `shared` or `id-<digest>` for per-identity policies, and
//! `fingerprint` digests the sorted query pairs plus the request body so that
//! two POSTs to the same analytics endpoint with different bodies never
//! collide.

use std::fmt;

use axum::http::Method;
use sha2::{Digest, Sha256};

use crate::policy::{CacheCategory, CachePolicy, KeyScope};
use crate::ratelimit::ClientIdentity;

/// Hex characters kept from each digest.
const DIGEST_HEX_LEN: usize = 32;

// == Cache Key ==
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for one request under a category policy.
    pub fn derive(
        policy: &CachePolicy,
        identity: &ClientIdentity,
        method: &Method,
        path: &str,
        query: Option<&str>,
        body: &[u8],
    ) -> Self {
        let scope = match policy.scope {
            KeyScope::Shared => "shared".to_string(),
            KeyScope::PerIdentity => format!("id-{}", digest(identity.to_string().as_bytes())),
        };

        let mut hasher = Sha256::new();
        for (name, value) in sorted_query(query) {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"&");
        }
        hasher.update(b"\0");
        hasher.update(body);
        let fingerprint = truncated_hex(&hasher.finalize());

        CacheKey(format!(
            "cache:{}:{}:{}:{}:{}",
            policy.category,
            scope,
            method.as_str(),
            normalize_path(path),
            fingerprint
        ))
    }

    /// Store glob covering every key of `category` whose path matches
    /// `path_pattern`.
    pub fn invalidation_pattern(category: CacheCategory, path_pattern: &str) -> String {
        format!("cache:{category}:*:*:{path_pattern}:*")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collapses repeated slashes and drops a trailing slash (root stays `/`).
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Decoded query pairs sorted by name, then value.
pub fn sorted_query(query: Option<&str>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default();
    pairs.sort();
    pairs
}

fn digest(bytes: &[u8]) -> String {
    truncated_hex(&Sha256::digest(bytes))
}

fn truncated_hex(bytes: &[u8]) -> String {
    let mut encoded = hex::encode(bytes);
    encoded.truncate(DIGEST_HEX_LEN);
    encoded
}
