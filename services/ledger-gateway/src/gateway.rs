//! Ledger gateway
//!
//! Drives submissions and confirmation polling against a [`LedgerClient`].
//! Explicitly constructed and passed to the components that need it; owns no
//! global state.

use std::sync::Arc;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use types::ids::{AccountId, IntentId, LedgerTxRef};
use types::intent::Intent;

use crate::client::{
    ClientError, LedgerClient, LedgerHolding, OperationDescriptor, OperationStatus, SubmitAck,
};
use crate::config::GatewayConfig;

/// Failure taxonomy surfaced to the orchestrator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Retries exhausted without the ledger acknowledging receipt.
    #[error("transient network failure after {attempts} attempts: {reason}")]
    TransientNetworkError { attempts: u32, reason: String },

    /// The ledger terminally refused the operation.
    #[error("rejected by ledger: {reason}")]
    RejectedByLedger { reason: String },

    /// No answer within the configured ceiling; neither success nor failure.
    #[error("timed out waiting for the ledger")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result of confirmation polling. UNKNOWN is a first-class outcome: the
/// caller must treat it as neither success nor failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    Confirmed,
    Failed { reason: String },
    Unknown,
}

/// Adapter owning all network interaction with the external ledger.
pub struct LedgerGateway {
    client: Arc<dyn LedgerClient>,
    config: GatewayConfig,
}

impl LedgerGateway {
    pub fn new(client: Arc<dyn LedgerClient>, config: GatewayConfig) -> Self {
        Self { client, config }
    }

    /// Submit an intent, presenting its id as the idempotency token.
    ///
    /// A lookup runs first: if the ledger already accepted an operation with
    /// this id (a previous process instance got further than its crash
    /// suggested), the existing reference is reused and nothing is resent.
    /// Transient failures retry with exponential backoff; once the ledger
    /// acknowledges receipt this method returns and only polling is
    /// permitted afterwards.
    pub async fn submit(&self, intent: &Intent) -> Result<LedgerTxRef, GatewayError> {
        let key = intent.intent_id;

        match self.client.lookup(key).await {
            Ok(Some(tx_ref)) => {
                debug!(intent_id = %key, %tx_ref, "ledger already holds this operation");
                return Ok(tx_ref);
            }
            Ok(None) => {}
            Err(e) => {
                // The submission path dedupes on its own; a failed lookup
                // only costs us the shortcut.
                debug!(intent_id = %key, error = %e, "pre-submit lookup failed");
            }
        }

        let descriptor = OperationDescriptor::from_intent(intent)
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;

        let mut delay = self.config.submit_base_delay;
        let mut last_error = String::new();
        for attempt in 1..=self.config.max_submit_attempts {
            match self.client.submit_operation(key, &descriptor).await {
                Ok(SubmitAck::Accepted { tx_ref }) => {
                    debug!(intent_id = %key, %tx_ref, attempt, "ledger accepted operation");
                    return Ok(tx_ref);
                }
                Ok(SubmitAck::Duplicate { tx_ref }) => {
                    debug!(intent_id = %key, %tx_ref, attempt, "ledger deduplicated operation");
                    return Ok(tx_ref);
                }
                Ok(SubmitAck::Rejected { reason }) => {
                    warn!(intent_id = %key, %reason, "ledger rejected operation");
                    return Err(GatewayError::RejectedByLedger { reason });
                }
                Err(ClientError::Network(reason)) => {
                    warn!(
                        intent_id = %key,
                        attempt,
                        max_attempts = self.config.max_submit_attempts,
                        %reason,
                        "transient submission failure"
                    );
                    last_error = reason;
                    if attempt < self.config.max_submit_attempts {
                        sleep(delay).await;
                        delay *= self.config.submit_backoff_factor;
                    }
                }
                Err(ClientError::Protocol(reason)) => {
                    return Err(GatewayError::Protocol(reason));
                }
            }
        }

        Err(GatewayError::TransientNetworkError {
            attempts: self.config.max_submit_attempts,
            reason: last_error,
        })
    }

    /// Poll the ledger until the operation finalizes or the configured
    /// ceiling elapses. Network hiccups during polling are absorbed — the
    /// poll is read-only and repeating it is free.
    pub async fn confirm(&self, tx_ref: &LedgerTxRef) -> ConfirmOutcome {
        let deadline = Instant::now() + self.config.confirm_timeout;
        loop {
            match self.client.operation_status(tx_ref).await {
                Ok(OperationStatus::FinalizedSuccess) => {
                    debug!(%tx_ref, "ledger finalized success");
                    return ConfirmOutcome::Confirmed;
                }
                Ok(OperationStatus::FinalizedFailure { reason }) => {
                    debug!(%tx_ref, %reason, "ledger finalized failure");
                    return ConfirmOutcome::Failed { reason };
                }
                Ok(OperationStatus::Pending) | Ok(OperationStatus::Unknown) => {}
                Err(e) => {
                    debug!(%tx_ref, error = %e, "status poll failed, will retry");
                }
            }

            if Instant::now() >= deadline {
                warn!(%tx_ref, "confirmation ceiling reached, outcome UNKNOWN");
                return ConfirmOutcome::Unknown;
            }
            sleep(self.config.confirm_poll_interval).await;
        }
    }

    /// One-shot status probe by reference, for the reconciler.
    pub async fn probe(&self, tx_ref: &LedgerTxRef) -> Result<OperationStatus, GatewayError> {
        self.client
            .operation_status(tx_ref)
            .await
            .map_err(map_client_error)
    }

    /// Look up an operation by idempotency id, for reconciling intents that
    /// were journaled but whose submission outcome is unrecorded.
    pub async fn lookup(&self, key: IntentId) -> Result<Option<LedgerTxRef>, GatewayError> {
        self.client.lookup(key).await.map_err(map_client_error)
    }

    /// Read-only holdings query, side-effect-free.
    pub async fn query(&self, account: &AccountId) -> Result<Vec<LedgerHolding>, GatewayError> {
        self.client
            .query_holdings(account)
            .await
            .map_err(map_client_error)
    }
}

fn map_client_error(e: ClientError) -> GatewayError {
    match e {
        ClientError::Network(reason) => GatewayError::TransientNetworkError {
            attempts: 1,
            reason,
        },
        ClientError::Protocol(reason) => GatewayError::Protocol(reason),
    }
}
