use chrono::Duration;
use serde::{Deserialize, Serialize};

use tollgate_core::{DomainError, DomainResult, IdentityId, LicenseId};

/// A provisioned license. Read-only to this workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub license_id: LicenseId,
    pub owner: IdentityId,
    pub quota_capacity: u32,
    pub replenish_interval_secs: u64,
}

impl License {
    pub fn new(
        license_id: LicenseId,
        owner: IdentityId,
        quota_capacity: u32,
        replenish_interval_secs: u64,
    ) -> DomainResult<Self> {
        if quota_capacity == 0 {
            return Err(DomainError::validation("quota capacity must be at least 1"));
        }
        if replenish_interval_secs == 0 {
            return Err(DomainError::validation(
                "replenish interval must be at least one second",
            ));
        }
        // chrono::Duration is bounded to i64 milliseconds.
        if replenish_interval_secs > (i64::MAX / 1000) as u64 {
            return Err(DomainError::validation("replenish interval is out of range"));
        }
        Ok(Self {
            license_id,
            owner,
            quota_capacity,
            replenish_interval_secs,
        })
    }

    pub fn replenish_interval(&self) -> Duration {
        Duration::seconds(self.replenish_interval_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lid() -> LicenseId {
        LicenseId::parse("L1").unwrap()
    }

    #[test]
    fn valid_license() {
        let lic = License::new(lid(), IdentityId::new(), 5, 3600).unwrap();
        assert_eq!(lic.replenish_interval(), Duration::hours(1));
    }

    #[test]
    fn zero_capacity_or_interval_is_rejected() {
        assert!(License::new(lid(), IdentityId::new(), 0, 60).is_err());
        assert!(License::new(lid(), IdentityId::new(), 5, 0).is_err());
        assert!(License::new(lid(), IdentityId::new(), 5, u64::MAX).is_err());
    }
}
