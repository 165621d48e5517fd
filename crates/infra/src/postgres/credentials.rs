//! Postgres-backed credential store.
//!
//! One row per identity in `credential_sessions`. Every refresh digest handed
//! out lives in `refresh_tokens`, with `consumed_at` set once it has been
//! rotated away. Consumed rows are not tied to the session row: they stay until
//! a later rotation of the identity finds them past their `expires_at`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use tollgate_auth::{
    ConsumedRefresh, CredentialRecord, CredentialStore, CredentialStoreError, RefreshLookup,
    RefreshTokenHash, RotateOutcome,
};
use tollgate_core::{IdentityId, SessionId};

use super::is_decode_error;

/// Credential store on a shared connection pool.
///
/// `rotate` is a conditional `UPDATE` on the active digest inside a
/// transaction, so of several concurrent rotations of the same digest at most
/// one matches a row.
#[derive(Debug, Clone)]
pub struct PostgresCredentialStore {
    pool: Arc<PgPool>,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn load(
        &self,
        identity: IdentityId,
    ) -> Result<Option<CredentialRecord>, CredentialStoreError> {
        let row = sqlx::query(
            r#"
            SELECT identity_id, session_id, active_refresh_hash, generation,
                   issued_at, rotated_at, refresh_expires_at
            FROM credential_sessions
            WHERE identity_id = $1
            "#,
        )
        .bind(identity.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_session", e))?;

        row.as_ref().map(record_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl CredentialStore for PostgresCredentialStore {
    #[instrument(skip(self), fields(identity = %identity), err)]
    async fn get(&self, identity: IdentityId) -> Result<Option<CredentialRecord>, CredentialStoreError> {
        self.load(identity).await
    }

    #[instrument(skip(self, record), fields(identity = %record.identity), err)]
    async fn put(&self, record: CredentialRecord) -> Result<(), CredentialStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("DELETE FROM credential_sessions WHERE identity_id = $1")
            .bind(record.identity.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_session", e))?;

        sqlx::query("DELETE FROM refresh_tokens WHERE identity_id = $1 AND consumed_at IS NULL")
            .bind(record.identity.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_active_refresh", e))?;

        insert_session(&mut tx, &record).await?;
        insert_active_token(&mut tx, &record).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(identity = %identity, session = %session_id), err)]
    async fn invalidate(
        &self,
        identity: IdentityId,
        session_id: SessionId,
    ) -> Result<Option<CredentialRecord>, CredentialStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(
            r#"
            DELETE FROM credential_sessions
            WHERE identity_id = $1 AND session_id = $2
            RETURNING identity_id, session_id, active_refresh_hash, generation,
                      issued_at, rotated_at, refresh_expires_at
            "#,
        )
        .bind(identity.as_uuid())
        .bind(session_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("invalidate", e))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(None);
        };
        let removed = record_from_row(&row)?;

        sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE identity_id = $1 AND session_id = $2 AND consumed_at IS NULL
            "#,
        )
        .bind(identity.as_uuid())
        .bind(session_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("delete_active_refresh", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(Some(removed))
    }

    #[instrument(skip(self, hash), fields(refresh = %hash), err)]
    async fn lookup_refresh(
        &self,
        hash: &RefreshTokenHash,
    ) -> Result<RefreshLookup, CredentialStoreError> {
        let row = sqlx::query(
            r#"
            SELECT identity_id, session_id, expires_at, consumed_at
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(hash.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("lookup_refresh", e))?;

        let Some(row) = row else {
            return Ok(RefreshLookup::Unknown);
        };

        let get_err = |e| map_sqlx_error("lookup_refresh", e);
        let identity = IdentityId::from_uuid(row.try_get::<Uuid, _>("identity_id").map_err(get_err)?);
        let session_id = SessionId::from_uuid(row.try_get::<Uuid, _>("session_id").map_err(get_err)?);
        let expires_at: DateTime<Utc> = row.try_get("expires_at").map_err(get_err)?;
        let consumed_at: Option<DateTime<Utc>> = row.try_get("consumed_at").map_err(get_err)?;

        if consumed_at.is_some() {
            return Ok(RefreshLookup::Consumed(ConsumedRefresh {
                identity,
                session_id,
                expires_at,
            }));
        }

        match self.load(identity).await? {
            Some(record) if &record.active_refresh == hash && record.session_id == session_id => {
                Ok(RefreshLookup::Active(record))
            }
            _ => Ok(RefreshLookup::Unknown),
        }
    }

    #[instrument(skip(self, expected, next), fields(identity = %identity, generation = next.generation), err)]
    async fn rotate(
        &self,
        identity: IdentityId,
        expected: &RefreshTokenHash,
        next: CredentialRecord,
    ) -> Result<RotateOutcome, CredentialStoreError> {
        let generation = generation_to_db(next.generation)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let swapped = sqlx::query(
            r#"
            UPDATE credential_sessions
            SET active_refresh_hash = $4,
                generation = $5,
                rotated_at = $6,
                refresh_expires_at = $7
            WHERE identity_id = $1 AND active_refresh_hash = $2 AND session_id = $3
            "#,
        )
        .bind(identity.as_uuid())
        .bind(expected.as_str())
        .bind(next.session_id.as_uuid())
        .bind(next.active_refresh.as_str())
        .bind(generation)
        .bind(next.rotated_at)
        .bind(next.refresh_expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("swap_active_refresh", e))?;

        if swapped.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            debug!("rotation lost the compare-and-swap");
            return Ok(RotateOutcome::Conflict);
        }

        sqlx::query("UPDATE refresh_tokens SET consumed_at = $2 WHERE token_hash = $1")
            .bind(expected.as_str())
            .bind(next.rotated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("consume_refresh", e))?;

        insert_active_token(&mut tx, &next).await?;

        sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE identity_id = $1
              AND consumed_at IS NOT NULL
              AND expires_at <= $2
            "#,
        )
        .bind(identity.as_uuid())
        .bind(next.rotated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("prune_consumed", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(RotateOutcome::Committed)
    }
}

async fn insert_session(
    tx: &mut Transaction<'_, Postgres>,
    record: &CredentialRecord,
) -> Result<(), CredentialStoreError> {
    sqlx::query(
        r#"
        INSERT INTO credential_sessions (
            identity_id, session_id, active_refresh_hash, generation,
            issued_at, rotated_at, refresh_expires_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(record.identity.as_uuid())
    .bind(record.session_id.as_uuid())
    .bind(record.active_refresh.as_str())
    .bind(generation_to_db(record.generation)?)
    .bind(record.issued_at)
    .bind(record.rotated_at)
    .bind(record.refresh_expires_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_session", e))?;
    Ok(())
}

async fn insert_active_token(
    tx: &mut Transaction<'_, Postgres>,
    record: &CredentialRecord,
) -> Result<(), CredentialStoreError> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (token_hash, identity_id, session_id, created_at, expires_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(record.active_refresh.as_str())
    .bind(record.identity.as_uuid())
    .bind(record.session_id.as_uuid())
    .bind(record.rotated_at)
    .bind(record.refresh_expires_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_refresh_token", e))?;
    Ok(())
}

fn record_from_row(row: &PgRow) -> Result<CredentialRecord, CredentialStoreError> {
    let get_err = |e| map_sqlx_error("decode_session", e);

    let identity: Uuid = row.try_get("identity_id").map_err(get_err)?;
    let session: Uuid = row.try_get("session_id").map_err(get_err)?;
    let active: String = row.try_get("active_refresh_hash").map_err(get_err)?;
    let generation: i64 = row.try_get("generation").map_err(get_err)?;
    let generation = u64::try_from(generation)
        .map_err(|_| CredentialStoreError::Corrupt(format!("negative generation {generation}")))?;

    Ok(CredentialRecord {
        identity: IdentityId::from_uuid(identity),
        session_id: SessionId::from_uuid(session),
        active_refresh: RefreshTokenHash::from_stored(active),
        generation,
        issued_at: row.try_get("issued_at").map_err(get_err)?,
        rotated_at: row.try_get("rotated_at").map_err(get_err)?,
        refresh_expires_at: row.try_get("refresh_expires_at").map_err(get_err)?,
    })
}

fn generation_to_db(generation: u64) -> Result<i64, CredentialStoreError> {
    i64::try_from(generation)
        .map_err(|_| CredentialStoreError::Corrupt(format!("generation {generation} out of range")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> CredentialStoreError {
    if is_decode_error(&err) {
        return CredentialStoreError::Corrupt(format!("{operation}: {err}"));
    }
    match err {
        sqlx::Error::Database(db_err) => {
            CredentialStoreError::Unavailable(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            CredentialStoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        other => CredentialStoreError::Unavailable(format!("sqlx error in {operation}: {other}")),
    }
}
