//! Postgres-backed credential store and quota ledger.
//!
//! ## Error Mapping
//!
//! | SQLx Error | Store error | Scenario |
//! |------------|-------------|----------|
//! | ColumnDecode / Decode / ColumnNotFound | `Corrupt` | Row does not match the expected schema |
//! | Anything else | `Unavailable` | Pool closed, network failure, timeouts, constraint failures |
//!
//! `Unavailable` is what callers fail closed on; it is never swallowed.

pub mod credentials;
pub mod quota;

pub use credentials::PostgresCredentialStore;
pub use quota::PostgresQuotaLedger;

use sqlx::PgPool;

/// Schema, one statement per entry. Every statement is idempotent.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS credential_sessions (
        identity_id         UUID PRIMARY KEY,
        session_id          UUID NOT NULL,
        active_refresh_hash TEXT NOT NULL,
        generation          BIGINT NOT NULL CHECK (generation >= 0),
        issued_at           TIMESTAMPTZ NOT NULL,
        rotated_at          TIMESTAMPTZ NOT NULL,
        refresh_expires_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS refresh_tokens (
        token_hash  TEXT PRIMARY KEY,
        identity_id UUID NOT NULL,
        session_id  UUID NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL,
        expires_at  TIMESTAMPTZ NOT NULL,
        consumed_at TIMESTAMPTZ NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS refresh_tokens_identity_idx
        ON refresh_tokens (identity_id, consumed_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS licenses (
        license_id              TEXT PRIMARY KEY,
        owner_identity_id       UUID NOT NULL,
        quota_capacity          INTEGER NOT NULL CHECK (quota_capacity > 0),
        replenish_interval_secs BIGINT NOT NULL CHECK (replenish_interval_secs > 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS quota_buckets (
        license_id          TEXT PRIMARY KEY REFERENCES licenses (license_id) ON DELETE CASCADE,
        remaining           INTEGER NOT NULL CHECK (remaining >= 0),
        last_replenished_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// Create the tables this crate needs if they do not exist yet.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

fn is_decode_error(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_)
    )
}
