//! `tollgate-core`: identifiers, time and error primitives shared by the
//! authentication and quota crates.
//!
//! This crate contains no IO.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{IdentityId, LicenseId, SessionId};
