//! Credential pairs and their persisted form.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use tollgate_core::{IdentityId, SessionId};

use crate::refresh::{RefreshToken, RefreshTokenHash};

/// A freshly issued access/refresh pair, ready to hand to the transport.
#[derive(Debug, Clone)]
pub struct CredentialPair {
    pub identity: IdentityId,
    pub session_id: SessionId,
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: RefreshToken,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Persisted state of one identity's session.
///
/// # Invariants
/// - Exactly one active refresh digest.
/// - `generation` increases by one per rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub identity: IdentityId,
    pub session_id: SessionId,
    pub active_refresh: RefreshTokenHash,
    pub generation: u64,
    pub issued_at: DateTime<Utc>,
    pub rotated_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Record for a brand-new session.
    pub fn issue(
        identity: IdentityId,
        session_id: SessionId,
        active_refresh: RefreshTokenHash,
        now: DateTime<Utc>,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            identity,
            session_id,
            active_refresh,
            generation: 0,
            issued_at: now,
            rotated_at: now,
            refresh_expires_at: now + refresh_ttl,
        }
    }

    /// Successor record after rotating to `next_refresh`.
    ///
    /// Refresh expiry slides forward from `now`. The store turns the current
    /// active digest into a [`ConsumedRefresh`] when it commits the swap.
    pub fn rotated(
        &self,
        next_refresh: RefreshTokenHash,
        now: DateTime<Utc>,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            identity: self.identity,
            session_id: self.session_id,
            active_refresh: next_refresh,
            generation: self.generation + 1,
            issued_at: self.issued_at,
            rotated_at: now,
            refresh_expires_at: now + refresh_ttl,
        }
    }

    pub fn is_refresh_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_expires_at
    }

    /// Tombstone for the active digest once it has been rotated away.
    pub fn consume_active(&self) -> ConsumedRefresh {
        ConsumedRefresh {
            identity: self.identity,
            session_id: self.session_id,
            expires_at: self.refresh_expires_at,
        }
    }
}

/// A refresh digest that was rotated away.
///
/// Kept until `expires_at`, the refresh expiry the digest was issued with,
/// whether or not its session still exists. Presenting it before then is a
/// replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedRefresh {
    pub identity: IdentityId,
    pub session_id: SessionId,
    pub expires_at: DateTime<Utc>,
}

impl ConsumedRefresh {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
