use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};

use tollgate_core::LicenseId;

use crate::bucket::{QuotaBucket, QuotaExhausted};
use crate::ledger::{ConsumeOutcome, LedgerError, QuotaLedger};
use crate::license::License;

#[derive(Debug)]
struct Entry {
    license: License,
    bucket: Mutex<QuotaBucket>,
}

impl Entry {
    fn lock(&self) -> Result<MutexGuard<'_, QuotaBucket>, LedgerError> {
        self.bucket
            .lock()
            .map_err(|_| LedgerError::Unavailable(format!("bucket lock poisoned: {}", self.license.license_id)))
    }
}

/// In-memory quota ledger for tests/dev.
///
/// The map lock is only held to find an entry; each bucket has its own mutex,
/// so unrelated licenses never contend.
#[derive(Debug, Default)]
pub struct InMemoryQuotaLedger {
    entries: RwLock<HashMap<LicenseId, Arc<Entry>>>,
}

impl InMemoryQuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, license_id: &LicenseId) -> Result<Option<Arc<Entry>>, LedgerError> {
        let map = self
            .entries
            .read()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))?;
        Ok(map.get(license_id).cloned())
    }

    fn snapshot(&self) -> Result<Vec<Arc<Entry>>, LedgerError> {
        let map = self
            .entries
            .read()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))?;
        Ok(map.values().cloned().collect())
    }
}

#[async_trait::async_trait]
impl QuotaLedger for InMemoryQuotaLedger {
    async fn provision(&self, license: License, now: DateTime<Utc>) -> Result<QuotaBucket, LedgerError> {
        let mut map = self
            .entries
            .write()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))?;
        if map.contains_key(&license.license_id) {
            return Err(LedgerError::AlreadyProvisioned(license.license_id));
        }

        let bucket = QuotaBucket::full(&license, now);
        map.insert(
            license.license_id.clone(),
            Arc::new(Entry {
                license,
                bucket: Mutex::new(bucket.clone()),
            }),
        );
        Ok(bucket)
    }

    async fn license(&self, license_id: &LicenseId) -> Result<Option<License>, LedgerError> {
        Ok(self.entry(license_id)?.map(|e| e.license.clone()))
    }

    async fn bucket(&self, license_id: &LicenseId) -> Result<Option<QuotaBucket>, LedgerError> {
        match self.entry(license_id)? {
            Some(entry) => Ok(Some(entry.lock()?.clone())),
            None => Ok(None),
        }
    }

    async fn try_consume(&self, license_id: &LicenseId) -> Result<ConsumeOutcome, LedgerError> {
        let Some(entry) = self.entry(license_id)? else {
            return Ok(ConsumeOutcome::NoSuchLicense);
        };
        let mut bucket = entry.lock()?;
        let capacity = bucket.capacity();
        Ok(match bucket.try_consume() {
            Ok(remaining) => ConsumeOutcome::Admitted { remaining, capacity },
            Err(QuotaExhausted) => ConsumeOutcome::Exhausted { capacity },
        })
    }

    async fn replenish(
        &self,
        license_id: &LicenseId,
        now: DateTime<Utc>,
    ) -> Result<Option<QuotaBucket>, LedgerError> {
        let Some(entry) = self.entry(license_id)? else {
            return Ok(None);
        };
        let mut bucket = entry.lock()?;
        bucket.replenish(now);
        Ok(Some(bucket.clone()))
    }

    async fn due_for_replenishment(&self, now: DateTime<Utc>) -> Result<Vec<LicenseId>, LedgerError> {
        let mut due = Vec::new();
        for entry in self.snapshot()? {
            if entry.lock()?.is_due(&entry.license, now) {
                due.push(entry.license.license_id.clone());
            }
        }
        due.sort();
        Ok(due)
    }
}
