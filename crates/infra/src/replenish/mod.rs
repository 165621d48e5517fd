//! Scheduled quota replenishment.
//!
//! ## Design
//!
//! - One background task per process, owned through a handle (no globals)
//! - Fixed cadence, independent of request traffic; the first pass runs at startup
//! - Each pass refills every license whose interval has elapsed, once,
//!   regardless of how many intervals were missed
//! - Licenses are refilled concurrently with a per-license timeout, so one slow
//!   or failing license never stalls the pass; it is retried next tick

pub mod scheduler;

pub use scheduler::{ReplenishmentScheduler, ReplenishmentSchedulerHandle, TickReport};
