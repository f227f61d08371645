//! Intent Store Service
//!
//! The durable source of truth for "what did we ask the ledger to do and did
//! it finish". Every lifecycle step of every ledger-bound intent is appended
//! to a checksummed journal BEFORE the in-memory view changes, so a crash at
//! any point recovers to the exact pre-crash lifecycle state.
//!
//! **Key invariants:**
//! - An intent record is durable before any network call references it
//! - Lifecycle transitions are monotonic; invalid transitions are errors
//! - At most one non-terminal intent exists per order/lot entity
//! - A corrupt or truncated journal tail is cut, never misread

pub mod journal;
pub mod recovery;
pub mod store;

pub use store::{IntentStore, IntentStoreError};
