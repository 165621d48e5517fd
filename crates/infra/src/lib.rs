//! Infrastructure layer: Postgres persistence and background replenishment.

/// Postgres-backed credential store and quota ledger, plus schema setup.
pub mod postgres;

/// Scheduled quota replenishment.
pub mod replenish;

pub use postgres::{PostgresCredentialStore, PostgresQuotaLedger, migrate};
pub use replenish::{ReplenishmentScheduler, ReplenishmentSchedulerHandle, TickReport};
