//! Bounded, insertion-ordered storage for captured portal credentials.
//!
//! The store never refuses a capture: capacity is a soft threshold that
//! raises a flush trigger rather than a hard limit that drops records.
//! Draining is snapshot-based so a delivery pass can run while new
//! submissions keep arriving.

mod record;
mod store;

pub use record::{CapturedCredential, CollectorPayload};
pub use store::{CredentialStore, FlushTrigger, DEFAULT_CAPACITY, FLUSH_STRIDE};
