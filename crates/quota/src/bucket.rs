use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tollgate_core::LicenseId;

use crate::license::License;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("quota exhausted")]
pub struct QuotaExhausted;

/// Remaining quota of one license.
///
/// # Invariants
/// - `0 <= remaining <= capacity`
/// - A decrement at zero is rejected, never clamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaBucket {
    license_id: LicenseId,
    capacity: u32,
    remaining: u32,
    last_replenished_at: DateTime<Utc>,
}

impl QuotaBucket {
    /// A full bucket for a newly provisioned license.
    pub fn full(license: &License, now: DateTime<Utc>) -> Self {
        Self {
            license_id: license.license_id.clone(),
            capacity: license.quota_capacity,
            remaining: license.quota_capacity,
            last_replenished_at: now,
        }
    }

    /// Rebuild from persisted fields; `remaining` is clamped into range.
    pub fn restore(
        license_id: LicenseId,
        capacity: u32,
        remaining: u32,
        last_replenished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            license_id,
            capacity,
            remaining: remaining.min(capacity),
            last_replenished_at,
        }
    }

    pub fn license_id(&self) -> &LicenseId {
        &self.license_id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn last_replenished_at(&self) -> DateTime<Utc> {
        self.last_replenished_at
    }

    /// Take one unit. Returns the post-decrement remaining count.
    pub fn try_consume(&mut self) -> Result<u32, QuotaExhausted> {
        if self.remaining == 0 {
            return Err(QuotaExhausted);
        }
        self.remaining -= 1;
        Ok(self.remaining)
    }

    /// Refill to capacity. Missed intervals are not compensated.
    pub fn replenish(&mut self, now: DateTime<Utc>) {
        self.remaining = self.capacity;
        self.last_replenished_at = now;
    }

    pub fn is_due(&self, license: &License, now: DateTime<Utc>) -> bool {
        self.last_replenished_at + license.replenish_interval() <= now
    }
}
