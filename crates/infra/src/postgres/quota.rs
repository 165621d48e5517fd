//! Postgres-backed quota ledger.
//!
//! Admission is a single conditional `UPDATE ... WHERE remaining > 0`, so the
//! row lock taken by Postgres serializes concurrent consumers of one license
//! and leaves other licenses alone.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use tollgate_core::{IdentityId, LicenseId};
use tollgate_quota::{ConsumeOutcome, LedgerError, License, QuotaBucket, QuotaLedger};

use super::is_decode_error;

#[derive(Debug, Clone)]
pub struct PostgresQuotaLedger {
    pool: Arc<PgPool>,
}

impl PostgresQuotaLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl QuotaLedger for PostgresQuotaLedger {
    #[instrument(skip(self, license), fields(license = %license.license_id), err)]
    async fn provision(&self, license: License, now: DateTime<Utc>) -> Result<QuotaBucket, LedgerError> {
        let capacity = i32::try_from(license.quota_capacity).map_err(|_| {
            LedgerError::Corrupt(format!("capacity {} out of range", license.quota_capacity))
        })?;
        let interval = i64::try_from(license.replenish_interval_secs).map_err(|_| {
            LedgerError::Corrupt(format!(
                "replenish interval {} out of range",
                license.replenish_interval_secs
            ))
        })?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO licenses (license_id, owner_identity_id, quota_capacity, replenish_interval_secs)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (license_id) DO NOTHING
            "#,
        )
        .bind(license.license_id.as_str())
        .bind(license.owner.as_uuid())
        .bind(capacity)
        .bind(interval)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_license", e))?;

        if inserted.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(LedgerError::AlreadyProvisioned(license.license_id));
        }

        sqlx::query(
            r#"
            INSERT INTO quota_buckets (license_id, remaining, last_replenished_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(license.license_id.as_str())
        .bind(capacity)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_bucket", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(QuotaBucket::full(&license, now))
    }

    #[instrument(skip(self), err)]
    async fn license(&self, license_id: &LicenseId) -> Result<Option<License>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT license_id, owner_identity_id, quota_capacity, replenish_interval_secs
            FROM licenses
            WHERE license_id = $1
            "#,
        )
        .bind(license_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_license", e))?;

        row.as_ref().map(license_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn bucket(&self, license_id: &LicenseId) -> Result<Option<QuotaBucket>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT b.license_id, b.remaining, b.last_replenished_at, l.quota_capacity
            FROM quota_buckets b
            JOIN licenses l ON l.license_id = b.license_id
            WHERE b.license_id = $1
            "#,
        )
        .bind(license_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_bucket", e))?;

        row.as_ref().map(bucket_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn try_consume(&self, license_id: &LicenseId) -> Result<ConsumeOutcome, LedgerError> {
        let row = sqlx::query(
            r#"
            UPDATE quota_buckets b
            SET remaining = b.remaining - 1
            FROM licenses l
            WHERE b.license_id = $1
              AND l.license_id = b.license_id
              AND b.remaining > 0
            RETURNING b.remaining, l.quota_capacity
            "#,
        )
        .bind(license_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("consume", e))?;

        if let Some(row) = row {
            let remaining = to_u32(row.try_get("remaining"), "remaining")?;
            let capacity = to_u32(row.try_get("quota_capacity"), "quota_capacity")?;
            return Ok(ConsumeOutcome::Admitted { remaining, capacity });
        }

        match self.license(license_id).await? {
            Some(license) => Ok(ConsumeOutcome::Exhausted {
                capacity: license.quota_capacity,
            }),
            None => Ok(ConsumeOutcome::NoSuchLicense),
        }
    }

    #[instrument(skip(self), err)]
    async fn replenish(
        &self,
        license_id: &LicenseId,
        now: DateTime<Utc>,
    ) -> Result<Option<QuotaBucket>, LedgerError> {
        let row = sqlx::query(
            r#"
            UPDATE quota_buckets b
            SET remaining = l.quota_capacity,
                last_replenished_at = $2
            FROM licenses l
            WHERE b.license_id = $1
              AND l.license_id = b.license_id
            RETURNING b.license_id, b.remaining, b.last_replenished_at, l.quota_capacity
            "#,
        )
        .bind(license_id.as_str())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("replenish", e))?;

        row.as_ref().map(bucket_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn due_for_replenishment(&self, now: DateTime<Utc>) -> Result<Vec<LicenseId>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT b.license_id
            FROM quota_buckets b
            JOIN licenses l ON l.license_id = b.license_id
            WHERE b.last_replenished_at + (l.replenish_interval_secs * INTERVAL '1 second') <= $1
            ORDER BY b.license_id ASC
            "#,
        )
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("due_for_replenishment", e))?;

        rows.iter()
            .map(|row| {
                let raw: String = row
                    .try_get("license_id")
                    .map_err(|e| map_sqlx_error("due_for_replenishment", e))?;
                LicenseId::parse(raw).map_err(|e| LedgerError::Corrupt(e.to_string()))
            })
            .collect()
    }
}

fn license_from_row(row: &PgRow) -> Result<License, LedgerError> {
    let raw_id: String = row
        .try_get("license_id")
        .map_err(|e| map_sqlx_error("decode_license", e))?;
    let owner: Uuid = row
        .try_get("owner_identity_id")
        .map_err(|e| map_sqlx_error("decode_license", e))?;
    let capacity = to_u32(row.try_get("quota_capacity"), "quota_capacity")?;
    let interval: i64 = row
        .try_get("replenish_interval_secs")
        .map_err(|e| map_sqlx_error("decode_license", e))?;
    let interval = u64::try_from(interval)
        .map_err(|_| LedgerError::Corrupt(format!("negative replenish interval {interval}")))?;

    let license_id = LicenseId::parse(raw_id).map_err(|e| LedgerError::Corrupt(e.to_string()))?;
    License::new(license_id, IdentityId::from_uuid(owner), capacity, interval)
        .map_err(|e| LedgerError::Corrupt(e.to_string()))
}

fn bucket_from_row(row: &PgRow) -> Result<QuotaBucket, LedgerError> {
    let raw_id: String = row
        .try_get("license_id")
        .map_err(|e| map_sqlx_error("decode_bucket", e))?;
    let last_replenished_at: DateTime<Utc> = row
        .try_get("last_replenished_at")
        .map_err(|e| map_sqlx_error("decode_bucket", e))?;
    let capacity = to_u32(row.try_get("quota_capacity"), "quota_capacity")?;
    let remaining = to_u32(row.try_get("remaining"), "remaining")?;

    let license_id = LicenseId::parse(raw_id).map_err(|e| LedgerError::Corrupt(e.to_string()))?;
    Ok(QuotaBucket::restore(license_id, capacity, remaining, last_replenished_at))
}

fn to_u32(value: Result<i32, sqlx::Error>, column: &str) -> Result<u32, LedgerError> {
    let value = value.map_err(|e| map_sqlx_error(column, e))?;
    u32::try_from(value).map_err(|_| LedgerError::Corrupt(format!("negative {column}: {value}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    if is_decode_error(&err) {
        return LedgerError::Corrupt(format!("{operation}: {err}"));
    }
    match err {
        sqlx::Error::Database(db_err) => {
            LedgerError::Unavailable(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => LedgerError::Unavailable(format!("connection pool closed in {operation}")),
        other => LedgerError::Unavailable(format!("sqlx error in {operation}: {other}")),
    }
}
