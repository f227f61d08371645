//! Settlement Service
//!
//! Turns match proposals and direct mint/transfer/retire requests into
//! exactly one durable, idempotent outcome each. The orchestrator writes an
//! intent durably BEFORE any network call, drives it through the ledger
//! gateway, and applies confirmed results to order/asset records as one
//! local unit.
//!
//! **Key invariants:**
//! - Intent-before-action: no ledger call without a durable PENDING intent
//! - At most one outstanding intent per order and per asset lot
//! - Local balances change only on CONFIRMED intents
//! - UNKNOWN is never treated as success or failure here; only the
//!   reconciler resolves it

pub mod certificate;
pub mod locks;
pub mod orchestrator;
pub mod service;
pub mod store;

pub use certificate::RetirementCertificate;
pub use orchestrator::{
    MintRequest, RetireRequest, SettlementError, SettlementOrchestrator, SettlementOutcome,
    TransferRequest,
};
pub use service::{MarketService, PlaceOrder};
pub use store::MemoryStore;
