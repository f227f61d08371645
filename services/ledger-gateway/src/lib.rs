//! Ledger Gateway Service
//!
//! The only component that performs network calls to the external ledger.
//! Exposes a small idempotent operation set (submit, confirm, probe, query)
//! and owns retry/backoff and confirmation polling. No business logic lives
//! here; untyped ledger payloads never leak past this boundary.
//!
//! **Key invariants:**
//! - Every submission presents the intent id as idempotency token
//! - Transient failures retry with exponential backoff, but NEVER after the
//!   ledger has acknowledged receipt — from then on, only polling
//! - Confirmation polling has a hard ceiling; past it the answer is UNKNOWN,
//!   never an inferred success or failure

pub mod client;
pub mod config;
pub mod gateway;
pub mod mock;

pub use client::{LedgerClient, OperationDescriptor, OperationStatus, SubmitAck};
pub use config::GatewayConfig;
pub use gateway::{ConfirmOutcome, GatewayError, LedgerGateway};
pub use mock::MockLedger;
