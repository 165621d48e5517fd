use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tollgate_core::{IdentityId, SessionId};

use super::{CredentialStore, CredentialStoreError, RefreshLookup, RotateOutcome};
use crate::credential::{ConsumedRefresh, CredentialRecord};
use crate::refresh::RefreshTokenHash;

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<IdentityId, CredentialRecord>,
    /// Active digest of each live record, to its owner.
    active: HashMap<RefreshTokenHash, IdentityId>,
    /// Rotated-away digests; outlive the record they came from.
    consumed: HashMap<RefreshTokenHash, ConsumedRefresh>,
}

impl Inner {
    fn remove_record(&mut self, identity: IdentityId) -> Option<CredentialRecord> {
        let record = self.records.remove(&identity)?;
        self.active.remove(&record.active_refresh);
        Some(record)
    }

    fn insert_record(&mut self, record: CredentialRecord) {
        self.active.insert(record.active_refresh.clone(), record.identity);
        self.records.insert(record.identity, record);
    }
}

/// In-memory credential store for tests/dev.
///
/// All mutations happen inside one short write-locked critical section, so a
/// rotation is never observable half-applied.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    inner: RwLock<Inner>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, CredentialStoreError> {
        self.inner
            .read()
            .map_err(|_| CredentialStoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, CredentialStoreError> {
        self.inner
            .write()
            .map_err(|_| CredentialStoreError::Unavailable("lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, identity: IdentityId) -> Result<Option<CredentialRecord>, CredentialStoreError> {
        Ok(self.read()?.records.get(&identity).cloned())
    }

    async fn put(&self, record: CredentialRecord) -> Result<(), CredentialStoreError> {
        let mut inner = self.write()?;
        inner.remove_record(record.identity);
        inner.insert_record(record);
        Ok(())
    }

    async fn invalidate(
        &self,
        identity: IdentityId,
        session_id: SessionId,
    ) -> Result<Option<CredentialRecord>, CredentialStoreError> {
        let mut inner = self.write()?;
        let same_session = inner
            .records
            .get(&identity)
            .is_some_and(|record| record.session_id == session_id);
        if !same_session {
            return Ok(None);
        }
        Ok(inner.remove_record(identity))
    }

    async fn lookup_refresh(
        &self,
        hash: &RefreshTokenHash,
    ) -> Result<RefreshLookup, CredentialStoreError> {
        let inner = self.read()?;
        if let Some(consumed) = inner.consumed.get(hash) {
            return Ok(RefreshLookup::Consumed(*consumed));
        }

        let record = inner
            .active
            .get(hash)
            .and_then(|identity| inner.records.get(identity))
            .filter(|record| &record.active_refresh == hash);
        match record {
            Some(record) => Ok(RefreshLookup::Active(record.clone())),
            None => Ok(RefreshLookup::Unknown),
        }
    }

    async fn rotate(
        &self,
        identity: IdentityId,
        expected: &RefreshTokenHash,
        next: CredentialRecord,
    ) -> Result<RotateOutcome, CredentialStoreError> {
        let mut inner = self.write()?;

        let current = match inner.records.get(&identity) {
            Some(r) if &r.active_refresh == expected && r.session_id == next.session_id => r.clone(),
            _ => return Ok(RotateOutcome::Conflict),
        };

        let rotated_at = next.rotated_at;
        inner
            .consumed
            .retain(|_, c| c.identity != identity || c.expires_at > rotated_at);
        inner.consumed.insert(expected.clone(), current.consume_active());
        inner.remove_record(identity);
        inner.insert_record(next);
        Ok(RotateOutcome::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::RefreshToken;
    use chrono::{Duration, Utc};
    use tollgate_core::SessionId;

    fn issue(identity: IdentityId) -> (CredentialRecord, RefreshToken) {
        let token = RefreshToken::generate();
        let record = CredentialRecord::issue(
            identity,
            SessionId::new(),
            token.digest(),
            Utc::now(),
            Duration::days(30),
        );
        (record, token)
    }

    #[tokio::test]
    async fn put_then_lookup_active() {
        let store = InMemoryCredentialStore::new();
        let identity = IdentityId::new();
        let (record, token) = issue(identity);
        store.put(record.clone()).await.unwrap();

        assert_eq!(store.get(identity).await.unwrap(), Some(record.clone()));
        assert_eq!(
            store.lookup_refresh(&token.digest()).await.unwrap(),
            RefreshLookup::Active(record)
        );
    }

    #[tokio::test]
    async fn rotate_marks_old_value_consumed() {
        let store = InMemoryCredentialStore::new();
        let identity = IdentityId::new();
        let (record, r1) = issue(identity);
        store.put(record.clone()).await.unwrap();

        let r2 = RefreshToken::generate();
        let next = record.rotated(r2.digest(), Utc::now(), Duration::days(30));
        let outcome = store.rotate(identity, &r1.digest(), next.clone()).await.unwrap();

        assert_eq!(outcome, RotateOutcome::Committed);
        assert_eq!(
            store.lookup_refresh(&r1.digest()).await.unwrap(),
            RefreshLookup::Consumed(ConsumedRefresh {
                identity,
                session_id: record.session_id,
                expires_at: record.refresh_expires_at,
            })
        );
        assert_eq!(
            store.lookup_refresh(&r2.digest()).await.unwrap(),
            RefreshLookup::Active(next)
        );
    }

    #[tokio::test]
    async fn rotate_with_stale_expectation_conflicts_without_writing() {
        let store = InMemoryCredentialStore::new();
        let identity = IdentityId::new();
        let (record, r1) = issue(identity);
        store.put(record.clone()).await.unwrap();

        let first = record.rotated(RefreshToken::generate().digest(), Utc::now(), Duration::days(30));
        let second = record.rotated(RefreshToken::generate().digest(), Utc::now(), Duration::days(30));

        assert_eq!(
            store.rotate(identity, &r1.digest(), first.clone()).await.unwrap(),
            RotateOutcome::Committed
        );
        assert_eq!(
            store.rotate(identity, &r1.digest(), second).await.unwrap(),
            RotateOutcome::Conflict
        );
        assert_eq!(store.get(identity).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn invalidate_keeps_consumed_digests_and_forgets_the_active_one() {
        let store = InMemoryCredentialStore::new();
        let identity = IdentityId::new();
        let (record, r1) = issue(identity);
        store.put(record.clone()).await.unwrap();
        let r2 = RefreshToken::generate();
        let next = record.rotated(r2.digest(), Utc::now(), Duration::days(30));
        store.rotate(identity, &r1.digest(), next).await.unwrap();

        let removed = store.invalidate(identity, record.session_id).await.unwrap();

        assert!(removed.is_some());
        assert_eq!(store.get(identity).await.unwrap(), None);
        assert!(matches!(
            store.lookup_refresh(&r1.digest()).await.unwrap(),
            RefreshLookup::Consumed(c) if c.identity == identity
        ));
        assert_eq!(store.lookup_refresh(&r2.digest()).await.unwrap(), RefreshLookup::Unknown);
    }

    #[tokio::test]
    async fn invalidate_ignores_a_different_session() {
        let store = InMemoryCredentialStore::new();
        let identity = IdentityId::new();
        let (old, _) = issue(identity);
        let (current, token) = issue(identity);
        store.put(current.clone()).await.unwrap();

        let removed = store.invalidate(identity, old.session_id).await.unwrap();

        assert_eq!(removed, None);
        assert_eq!(
            store.lookup_refresh(&token.digest()).await.unwrap(),
            RefreshLookup::Active(current)
        );
    }

    #[tokio::test]
    async fn consumed_digests_survive_a_new_login() {
        let store = InMemoryCredentialStore::new();
        let identity = IdentityId::new();
        let (record, r1) = issue(identity);
        store.put(record.clone()).await.unwrap();
        let next = record.rotated(RefreshToken::generate().digest(), Utc::now(), Duration::days(30));
        store.rotate(identity, &r1.digest(), next).await.unwrap();

        let (fresh, _) = issue(identity);
        store.put(fresh).await.unwrap();

        assert!(matches!(
            store.lookup_refresh(&r1.digest()).await.unwrap(),
            RefreshLookup::Consumed(c) if c.session_id == record.session_id
        ));
    }

    #[tokio::test]
    async fn rotation_prunes_consumed_digests_past_their_own_expiry() {
        let store = InMemoryCredentialStore::new();
        let identity = IdentityId::new();
        let start = Utc::now();
        let r1 = RefreshToken::generate();
        let record = CredentialRecord::issue(identity, SessionId::new(), r1.digest(), start, Duration::hours(1));
        store.put(record.clone()).await.unwrap();

        let r2 = RefreshToken::generate();
        let second = record.rotated(r2.digest(), start + Duration::minutes(30), Duration::hours(1));
        store.rotate(identity, &r1.digest(), second.clone()).await.unwrap();

        // r1 was issued to expire at start + 1h; this rotation happens after that.
        let third = second.rotated(RefreshToken::generate().digest(), start + Duration::minutes(61), Duration::hours(1));
        store.rotate(identity, &r2.digest(), third).await.unwrap();

        assert_eq!(store.lookup_refresh(&r1.digest()).await.unwrap(), RefreshLookup::Unknown);
        assert!(matches!(
            store.lookup_refresh(&r2.digest()).await.unwrap(),
            RefreshLookup::Consumed(_)
        ));
    }

    #[tokio::test]
    async fn identities_are_isolated() {
        let store = InMemoryCredentialStore::new();
        let (a, ra) = issue(IdentityId::new());
        let (b, _) = issue(IdentityId::new());
        store.put(a.clone()).await.unwrap();
        store.put(b.clone()).await.unwrap();

        store.invalidate(b.identity, b.session_id).await.unwrap();

        assert_eq!(
            store.lookup_refresh(&ra.digest()).await.unwrap(),
            RefreshLookup::Active(a)
        );
    }
}
