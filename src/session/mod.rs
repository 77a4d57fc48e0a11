//! Session Manager
//!
//! Server-side sessions keyed by an opaque token. The record lives in the
//! store under the session category TTL; expiry is owned by the store, and
//! every authenticated request slides it forward with an atomic TTL reset.
//!
//! A missing, expired or malformed token all look the same to callers: no
//! session.

pub mod token;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::stats::EdgeStats;
use crate::store::Store;

// == Session Record ==
/// Stored session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub payload: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

// == Session Context ==
/// Request extension attached for requests presenting a live session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub token: String,
    pub record: SessionRecord,
    /// Expiry after the refresh performed for this request
    pub expires_at: DateTime<Utc>,
}

// == Session Manager ==
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn Store>,
    ttl: Duration,
    stats: Arc<EdgeStats>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>, ttl: Duration, stats: Arc<EdgeStats>) -> Self {
        Self { store, ttl, stats }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores a new session and returns its token.
    pub async fn create(&self, payload: Map<String, Value>) -> StoreResult<String> {
        let token = token::generate();
        let record = SessionRecord {
            payload,
            created_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&record).map_err(|e| StoreError::Codec(e.to_string()))?;

        self.store
            .set(&token::storage_key(&token), &bytes, self.ttl)
            .await?;
        self.stats.record_session_created();
        debug!("session created");
        Ok(token)
    }

    /// Returns the session for `token`, or `None` when there is none.
    pub async fn load(&self, token: &str) -> StoreResult<Option<SessionRecord>> {
        if !token::is_well_formed(token) {
            return Ok(None);
        }

        let Some(bytes) = self.store.get(&token::storage_key(token)).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(error = %err, "discarding undecodable session record");
                Ok(None)
            }
        }
    }

    /// Extends the session's lifetime to a full TTL from now. Returns false
    /// when the session does not exist.
    pub async fn refresh(&self, token: &str) -> StoreResult<bool> {
        if !token::is_well_formed(token) {
            return Ok(false);
        }
        self.store.expire(&token::storage_key(token), self.ttl).await
    }

    /// Removes the session. Returns whether it existed.
    pub async fn destroy(&self, token: &str) -> StoreResult<bool> {
        if !token::is_well_formed(token) {
            return Ok(false);
        }
        self.store.delete(&token::storage_key(token)).await
    }

    /// Refreshes and loads in one step, as done for every request that
    /// presents a token.
    pub async fn touch(&self, token: &str) -> StoreResult<Option<SessionContext>> {
        if !self.refresh(token).await? {
            return Ok(None);
        }
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Ok(self.load(token).await?.map(|record| SessionContext {
            token: token.to_string(),
            record,
            expires_at,
        }))
    }
}
