//! Request-time admission decisions.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use tollgate_core::{IdentityId, LicenseId};

use crate::ledger::{ConsumeOutcome, LedgerError, QuotaLedger};

/// A request was admitted and consumed one unit of quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admitted {
    pub license_id: LicenseId,
    /// Remaining quota after this admission.
    pub remaining: u32,
    pub capacity: u32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("no such license: {0}")]
    NoSuchLicense(LicenseId),

    #[error("quota exhausted for license {0}")]
    QuotaExhausted(LicenseId),

    /// The ledger could not be consulted; the request is denied.
    #[error("quota ledger unavailable: {0}")]
    StoreUnavailable(String),
}

/// Decides whether a license-gated operation may run.
///
/// Fails closed: if the ledger cannot be reached the request is rejected.
#[derive(Clone)]
pub struct AdmissionGate {
    ledger: Arc<dyn QuotaLedger>,
}

impl core::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AdmissionGate").finish_non_exhaustive()
    }
}

impl AdmissionGate {
    pub fn new(ledger: Arc<dyn QuotaLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<dyn QuotaLedger> {
        &self.ledger
    }

    /// Atomically take one unit of `license_id`'s quota.
    pub async fn try_admit(&self, license_id: &LicenseId) -> Result<Admitted, AdmissionError> {
        let outcome = self
            .ledger
            .try_consume(license_id)
            .await
            .map_err(|e| unavailable(license_id, e))?;

        match outcome {
            ConsumeOutcome::Admitted { remaining, capacity } => {
                debug!(license = %license_id, remaining, "admitted");
                Ok(Admitted {
                    license_id: license_id.clone(),
                    remaining,
                    capacity,
                })
            }
            ConsumeOutcome::Exhausted { .. } => {
                debug!(license = %license_id, "quota exhausted");
                Err(AdmissionError::QuotaExhausted(license_id.clone()))
            }
            ConsumeOutcome::NoSuchLicense => Err(AdmissionError::NoSuchLicense(license_id.clone())),
        }
    }

    /// Like [`try_admit`](Self::try_admit), on behalf of `identity`.
    ///
    /// A license owned by someone else is reported as `NoSuchLicense` and is
    /// left untouched.
    pub async fn try_admit_as(
        &self,
        identity: IdentityId,
        license_id: &LicenseId,
    ) -> Result<Admitted, AdmissionError> {
        let license = self
            .ledger
            .license(license_id)
            .await
            .map_err(|e| unavailable(license_id, e))?;

        match license {
            Some(license) if license.owner == identity => self.try_admit(license_id).await,
            _ => Err(AdmissionError::NoSuchLicense(license_id.clone())),
        }
    }
}

fn unavailable(license_id: &LicenseId, e: LedgerError) -> AdmissionError {
    error!(license = %license_id, error = %e, "quota ledger unavailable; denying admission");
    AdmissionError::StoreUnavailable(e.to_string())
}
