//! In-process list of revoked sessions.
//!
//! Access tokens are verified without touching the credential store, so a
//! revoked session's outstanding access tokens would otherwise stay usable
//! until they expire. Entries only need to live as long as the longest access
//! token that could have been minted for the session.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use tollgate_core::SessionId;

#[derive(Debug, Default)]
pub struct RevokedSessions {
    inner: RwLock<HashMap<SessionId, DateTime<Utc>>>,
}

impl RevokedSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revoke `session` until `until`. Expired entries are pruned on the way.
    pub fn revoke(&self, session: SessionId, until: DateTime<Utc>, now: DateTime<Utc>) {
        let mut map = self.inner.write().unwrap_or_else(|p| p.into_inner());
        map.retain(|_, expires| *expires > now);
        let entry = map.entry(session).or_insert(until);
        if *entry < until {
            *entry = until;
        }
    }

    pub fn is_revoked(&self, session: SessionId, now: DateTime<Utc>) -> bool {
        let map = self.inner.read().unwrap_or_else(|p| p.into_inner());
        map.get(&session).is_some_and(|until| *until > now)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
