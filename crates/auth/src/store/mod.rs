//! Credential store boundary.
//!
//! Records are keyed by identity; refresh tokens are looked up by digest.
//! Implementations must make `rotate` a single atomic compare-and-swap.
//!
//! A rotated-away digest stays resolvable as [`RefreshLookup::Consumed`] until
//! its own refresh expiry, even after its session is replaced or removed.

pub mod in_memory;

pub use in_memory::InMemoryCredentialStore;

use std::sync::Arc;

use thiserror::Error;

use tollgate_core::{IdentityId, SessionId};

use crate::credential::{ConsumedRefresh, CredentialRecord};
use crate::refresh::RefreshTokenHash;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialStoreError {
    /// Backing storage could not be reached or failed mid-operation.
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded.
    #[error("corrupt credential record: {0}")]
    Corrupt(String),
}

/// Result of looking up a presented refresh digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshLookup {
    /// Digest is the identity's current active refresh token.
    Active(CredentialRecord),
    /// Digest was active once and has since been rotated away.
    Consumed(ConsumedRefresh),
    /// Never issued, active in a session that no longer exists, or a
    /// consumed digest past its expiry that has been pruned.
    Unknown,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The swap committed: `next` is now the active record.
    Committed,
    /// The active digest no longer matched `expected`; nothing was written.
    Conflict,
}

#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, identity: IdentityId) -> Result<Option<CredentialRecord>, CredentialStoreError>;

    /// Insert or replace the record for `record.identity`.
    ///
    /// Replacing forgets the previous record's active digest. Its consumed
    /// digests are kept.
    async fn put(&self, record: CredentialRecord) -> Result<(), CredentialStoreError>;

    /// Remove the identity's record iff it still belongs to `session_id`;
    /// returns what was removed. Consumed digests are kept.
    async fn invalidate(
        &self,
        identity: IdentityId,
        session_id: SessionId,
    ) -> Result<Option<CredentialRecord>, CredentialStoreError>;

    async fn lookup_refresh(
        &self,
        hash: &RefreshTokenHash,
    ) -> Result<RefreshLookup, CredentialStoreError>;

    /// Atomically replace the identity's record with `next` iff its active
    /// digest is still `expected` and its session is `next.session_id`.
    ///
    /// On commit `expected` becomes consumed, and consumed digests of the
    /// identity whose expiry is at or before `next.rotated_at` are dropped.
    async fn rotate(
        &self,
        identity: IdentityId,
        expected: &RefreshTokenHash,
        next: CredentialRecord,
    ) -> Result<RotateOutcome, CredentialStoreError>;
}

#[async_trait::async_trait]
impl<S> CredentialStore for Arc<S>
where
    S: CredentialStore + ?Sized,
{
    async fn get(&self, identity: IdentityId) -> Result<Option<CredentialRecord>, CredentialStoreError> {
        (**self).get(identity).await
    }

    async fn put(&self, record: CredentialRecord) -> Result<(), CredentialStoreError> {
        (**self).put(record).await
    }

    async fn invalidate(
        &self,
        identity: IdentityId,
        session_id: SessionId,
    ) -> Result<Option<CredentialRecord>, CredentialStoreError> {
        (**self).invalidate(identity, session_id).await
    }

    async fn lookup_refresh(
        &self,
        hash: &RefreshTokenHash,
    ) -> Result<RefreshLookup, CredentialStoreError> {
        (**self).lookup_refresh(hash).await
    }

    async fn rotate(
        &self,
        identity: IdentityId,
        expected: &RefreshTokenHash,
        next: CredentialRecord,
    ) -> Result<RotateOutcome, CredentialStoreError> {
        (**self).rotate(identity, expected, next).await
    }
}
