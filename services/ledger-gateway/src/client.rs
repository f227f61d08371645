//! Remote ledger endpoint contract
//!
//! The external ledger accepts operation descriptors keyed by a
//! client-supplied idempotency id and exposes a status query by reference.
//! Payloads crossing this seam are opaque and versioned; they are decoded
//! into the typed results below and nothing rawer escapes the gateway.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::ids::{AccountId, IntentId, LedgerTxRef};
use types::intent::{Intent, IntentKind};
use types::numeric::Quantity;

/// Transport-level failures from the remote endpoint.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Connection-level failure; the request may or may not have arrived.
    #[error("network error: {0}")]
    Network(String),

    /// The endpoint answered with something this version cannot decode.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Versioned, opaque operation descriptor shipped to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub kind: IntentKind,
    pub schema_version: u32,
    /// Serialized intent payload; the ledger treats this as opaque content.
    pub body: serde_json::Value,
}

impl OperationDescriptor {
    pub const SCHEMA_VERSION: u32 = 1;

    pub fn from_intent(intent: &Intent) -> Result<Self, ClientError> {
        let body = serde_json::to_value(&intent.payload)
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        Ok(Self {
            kind: intent.kind,
            schema_version: Self::SCHEMA_VERSION,
            body,
        })
    }
}

/// Ledger's answer to a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubmitAck {
    /// Newly accepted; the ledger assigned a reference.
    Accepted { tx_ref: LedgerTxRef },
    /// An operation with this idempotency id already exists.
    Duplicate { tx_ref: LedgerTxRef },
    /// Terminally refused; resubmitting the same id will not help.
    Rejected { reason: String },
}

/// Ledger's answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    FinalizedSuccess,
    FinalizedFailure { reason: String },
    /// The ledger has no record of this reference.
    Unknown,
}

/// One holding as reported by the ledger, for reconciliation reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerHolding {
    pub token_ref: LedgerTxRef,
    pub amount: Quantity,
}

/// The remote ledger endpoint.
///
/// Implementations perform the actual network I/O. The in-process
/// [`crate::mock::MockLedger`] implements this for tests.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Look up an existing operation by idempotency id, if the ledger has
    /// accepted one. Side-effect-free.
    async fn lookup(&self, idempotency_key: IntentId) -> Result<Option<LedgerTxRef>, ClientError>;

    /// Submit an operation keyed by `idempotency_key`.
    async fn submit_operation(
        &self,
        idempotency_key: IntentId,
        descriptor: &OperationDescriptor,
    ) -> Result<SubmitAck, ClientError>;

    /// Query finalization status by ledger reference. Side-effect-free.
    async fn operation_status(&self, tx_ref: &LedgerTxRef) -> Result<OperationStatus, ClientError>;

    /// Ledger-reported holdings for an account. Side-effect-free.
    async fn query_holdings(&self, account: &AccountId) -> Result<Vec<LedgerHolding>, ClientError>;
}
