//! `tollgate-quota`: per-license request quotas.
//!
//! A [`QuotaLedger`] holds one [`QuotaBucket`] per provisioned [`License`].
//! Request handling only ever decrements through the [`AdmissionGate`];
//! refilling is the replenishment scheduler's job.

pub mod admission;
pub mod bucket;
pub mod in_memory;
pub mod ledger;
pub mod license;

pub use admission::{AdmissionError, AdmissionGate, Admitted};
pub use bucket::{QuotaBucket, QuotaExhausted};
pub use in_memory::InMemoryQuotaLedger;
pub use ledger::{ConsumeOutcome, LedgerError, QuotaLedger};
pub use license::License;
