//! Quota ledger boundary.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use tollgate_core::LicenseId;

use crate::bucket::QuotaBucket;
use crate::license::License;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Backing storage could not be reached or failed mid-operation.
    #[error("quota ledger unavailable: {0}")]
    Unavailable(String),

    #[error("license already provisioned: {0}")]
    AlreadyProvisioned(LicenseId),

    /// Stored data could not be decoded.
    #[error("corrupt ledger entry: {0}")]
    Corrupt(String),
}

/// Result of an atomic check-and-decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Admitted { remaining: u32, capacity: u32 },
    Exhausted { capacity: u32 },
    NoSuchLicense,
}

/// Per-license quota storage.
///
/// `try_consume` must be linearizable per license: two concurrent calls never
/// both succeed when a single unit remains. Calls for different licenses must
/// not serialize on each other.
#[async_trait::async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Register a license and create its bucket at full capacity.
    async fn provision(&self, license: License, now: DateTime<Utc>) -> Result<QuotaBucket, LedgerError>;

    async fn license(&self, license_id: &LicenseId) -> Result<Option<License>, LedgerError>;

    async fn bucket(&self, license_id: &LicenseId) -> Result<Option<QuotaBucket>, LedgerError>;

    async fn try_consume(&self, license_id: &LicenseId) -> Result<ConsumeOutcome, LedgerError>;

    /// Refill to capacity and stamp `now`. `None` if the license is unknown.
    async fn replenish(
        &self,
        license_id: &LicenseId,
        now: DateTime<Utc>,
    ) -> Result<Option<QuotaBucket>, LedgerError>;

    /// Licenses whose last replenishment is at least one interval before `now`.
    async fn due_for_replenishment(&self, now: DateTime<Utc>) -> Result<Vec<LicenseId>, LedgerError>;
}

#[async_trait::async_trait]
impl<L> QuotaLedger for Arc<L>
where
    L: QuotaLedger + ?Sized,
{
    async fn provision(&self, license: License, now: DateTime<Utc>) -> Result<QuotaBucket, LedgerError> {
        (**self).provision(license, now).await
    }

    async fn license(&self, license_id: &LicenseId) -> Result<Option<License>, LedgerError> {
        (**self).license(license_id).await
    }

    async fn bucket(&self, license_id: &LicenseId) -> Result<Option<QuotaBucket>, LedgerError> {
        (**self).bucket(license_id).await
    }

    async fn try_consume(&self, license_id: &LicenseId) -> Result<ConsumeOutcome, LedgerError> {
        (**self).try_consume(license_id).await
    }

    async fn replenish(
        &self,
        license_id: &LicenseId,
        now: DateTime<Utc>,
    ) -> Result<Option<QuotaBucket>, LedgerError> {
        (**self).replenish(license_id, now).await
    }

    async fn due_for_replenishment(&self, now: DateTime<Utc>) -> Result<Vec<LicenseId>, LedgerError> {
        (**self).due_for_replenishment(now).await
    }
}
