//! Deterministic in-process ledger
//!
//! Implements [`LedgerClient`] entirely in memory with scriptable failure
//! modes: transient submission failures, terminal rejections, delayed
//! finalization, operations that never finalize, and acknowledged
//! submissions the ledger later has no record of. Used by gateway,
//! orchestrator, and reconciler tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use types::ids::{AccountId, IntentId, LedgerTxRef};

use crate::client::{
    ClientError, LedgerClient, LedgerHolding, OperationDescriptor, OperationStatus, SubmitAck,
};

/// How an accepted operation eventually behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    /// Finalizes successfully after the configured number of polls.
    Success,
    /// Finalizes as a failure after the configured number of polls.
    Failure,
    /// Stays pending forever — drives confirmation into UNKNOWN.
    NeverFinalize,
    /// Acknowledged at submission, but status and lookup afterwards act as
    /// if the ledger never saw it — drives the reconciler abandon path.
    VanishAfterAck,
}

#[derive(Debug)]
struct MockOp {
    tx_ref: LedgerTxRef,
    polls: u32,
    finalize_after: u32,
    outcome: MockOutcome,
}

#[derive(Debug)]
struct MockInner {
    ops: HashMap<IntentId, MockOp>,
    by_ref: HashMap<LedgerTxRef, IntentId>,
    next_ref: u64,
    transient_submit_failures: u32,
    transient_status_failures: u32,
    reject_reason: Option<String>,
    finalize_after: u32,
    outcome: MockOutcome,
    submit_calls: u64,
    effects: u64,
}

/// Scriptable in-memory ledger.
pub struct MockLedger {
    inner: Mutex<MockInner>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockInner {
                ops: HashMap::new(),
                by_ref: HashMap::new(),
                next_ref: 1,
                transient_submit_failures: 0,
                transient_status_failures: 0,
                reject_reason: None,
                finalize_after: 0,
                outcome: MockOutcome::Success,
                submit_calls: 0,
                effects: 0,
            }),
        }
    }

    /// Fail the next `n` submission calls with a network error.
    pub fn fail_submissions(&self, n: u32) {
        self.lock().transient_submit_failures = n;
    }

    /// Fail the next `n` status queries with a network error.
    pub fn fail_status_queries(&self, n: u32) {
        self.lock().transient_status_failures = n;
    }

    /// Terminally reject the next submission.
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.lock().reject_reason = Some(reason.into());
    }

    /// Newly accepted operations stay pending for `n` polls.
    pub fn finalize_after_polls(&self, n: u32) {
        self.lock().finalize_after = n;
    }

    /// Outcome applied to operations accepted from now on.
    pub fn set_outcome(&self, outcome: MockOutcome) {
        self.lock().outcome = outcome;
    }

    /// Finalize an existing operation out-of-band, as the real ledger would
    /// while nobody was polling. For reconciler tests.
    pub fn resolve(&self, key: IntentId, success: bool) {
        let mut inner = self.lock();
        if let Some(op) = inner.ops.get_mut(&key) {
            op.outcome = if success {
                MockOutcome::Success
            } else {
                MockOutcome::Failure
            };
            op.finalize_after = 0;
        }
    }

    /// Total submission calls, including failed ones.
    pub fn submit_calls(&self) -> u64 {
        self.lock().submit_calls
    }

    /// Count of distinct operations the ledger accepted. The idempotence
    /// law: this never exceeds the number of distinct intent ids submitted.
    pub fn effects(&self) -> u64 {
        self.lock().effects
    }

    /// The reference assigned to an accepted operation, if any.
    pub fn tx_ref_for(&self, key: IntentId) -> Option<LedgerTxRef> {
        self.lock().ops.get(&key).map(|op| op.tx_ref.clone())
    }

    /// Whether a reference belongs to an accepted operation.
    pub fn has_operation_ref(&self, tx_ref: &LedgerTxRef) -> bool {
        self.lock().by_ref.contains_key(tx_ref)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().expect("mock ledger mutex poisoned")
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn lookup(&self, idempotency_key: IntentId) -> Result<Option<LedgerTxRef>, ClientError> {
        let inner = self.lock();
        Ok(inner.ops.get(&idempotency_key).and_then(|op| {
            if op.outcome == MockOutcome::VanishAfterAck {
                None
            } else {
                Some(op.tx_ref.clone())
            }
        }))
    }

    async fn submit_operation(
        &self,
        idempotency_key: IntentId,
        _descriptor: &OperationDescriptor,
    ) -> Result<SubmitAck, ClientError> {
        let mut inner = self.lock();
        inner.submit_calls += 1;

        if inner.transient_submit_failures > 0 {
            inner.transient_submit_failures -= 1;
            return Err(ClientError::Network("connection reset".to_string()));
        }
        if let Some(reason) = inner.reject_reason.take() {
            return Ok(SubmitAck::Rejected { reason });
        }

        if let Some(op) = inner.ops.get(&idempotency_key) {
            return Ok(SubmitAck::Duplicate {
                tx_ref: op.tx_ref.clone(),
            });
        }

        let tx_ref = LedgerTxRef::new(format!("mock-tx-{:06}", inner.next_ref));
        inner.next_ref += 1;
        inner.effects += 1;
        let op = MockOp {
            tx_ref: tx_ref.clone(),
            polls: 0,
            finalize_after: inner.finalize_after,
            outcome: inner.outcome,
        };
        inner.by_ref.insert(tx_ref.clone(), idempotency_key);
        inner.ops.insert(idempotency_key, op);
        Ok(SubmitAck::Accepted { tx_ref })
    }

    async fn operation_status(&self, tx_ref: &LedgerTxRef) -> Result<OperationStatus, ClientError> {
        let mut inner = self.lock();
        if inner.transient_status_failures > 0 {
            inner.transient_status_failures -= 1;
            return Err(ClientError::Network("connection reset".to_string()));
        }

        let Some(key) = inner.by_ref.get(tx_ref).copied() else {
            return Ok(OperationStatus::Unknown);
        };
        let op = inner.ops.get_mut(&key).expect("by_ref points at ops");

        match op.outcome {
            MockOutcome::VanishAfterAck => Ok(OperationStatus::Unknown),
            MockOutcome::NeverFinalize => Ok(OperationStatus::Pending),
            MockOutcome::Success | MockOutcome::Failure => {
                op.polls += 1;
                if op.polls > op.finalize_after {
                    if op.outcome == MockOutcome::Success {
                        Ok(OperationStatus::FinalizedSuccess)
                    } else {
                        Ok(OperationStatus::FinalizedFailure {
                            reason: "ledger contract refused operation".to_string(),
                        })
                    }
                } else {
                    Ok(OperationStatus::Pending)
                }
            }
        }
    }

    async fn query_holdings(&self, _account: &AccountId) -> Result<Vec<LedgerHolding>, ClientError> {
        // Holdings projection is not modeled; reconciliation works from
        // operation status and idempotency lookups.
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::LotId;
    use types::intent::{Intent, IntentPayload};
    use types::numeric::Quantity;

    fn descriptor() -> OperationDescriptor {
        let intent = Intent::new(
            IntentPayload::Retire {
                lot_id: LotId::new(),
                account_id: AccountId::new(),
                amount: Quantity::from_str("1.0").unwrap(),
            },
            100,
        );
        OperationDescriptor::from_intent(&intent).unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_submission_no_second_effect() {
        let ledger = MockLedger::new();
        let key = IntentId::new();
        let d = descriptor();

        let first = ledger.submit_operation(key, &d).await.unwrap();
        let second = ledger.submit_operation(key, &d).await.unwrap();

        let (SubmitAck::Accepted { tx_ref: a }, SubmitAck::Duplicate { tx_ref: b }) =
            (first, second)
        else {
            panic!("expected Accepted then Duplicate");
        };
        assert_eq!(a, b);
        assert_eq!(ledger.effects(), 1);
    }

    #[tokio::test]
    async fn test_unknown_ref_status() {
        let ledger = MockLedger::new();
        let status = ledger
            .operation_status(&LedgerTxRef::new("no-such-ref"))
            .await
            .unwrap();
        assert_eq!(status, OperationStatus::Unknown);
    }

    #[tokio::test]
    async fn test_vanish_after_ack() {
        let ledger = MockLedger::new();
        ledger.set_outcome(MockOutcome::VanishAfterAck);
        let key = IntentId::new();

        let ack = ledger.submit_operation(key, &descriptor()).await.unwrap();
        let SubmitAck::Accepted { tx_ref } = ack else {
            panic!("expected acceptance");
        };

        // The ledger now claims it never saw the operation
        assert_eq!(ledger.lookup(key).await.unwrap(), None);
        assert_eq!(
            ledger.operation_status(&tx_ref).await.unwrap(),
            OperationStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_out_of_band_resolution() {
        let ledger = MockLedger::new();
        ledger.set_outcome(MockOutcome::NeverFinalize);
        let key = IntentId::new();
        ledger.submit_operation(key, &descriptor()).await.unwrap();
        let tx_ref = ledger.tx_ref_for(key).unwrap();

        assert_eq!(
            ledger.operation_status(&tx_ref).await.unwrap(),
            OperationStatus::Pending
        );

        ledger.resolve(key, true);
        assert_eq!(
            ledger.operation_status(&tx_ref).await.unwrap(),
            OperationStatus::FinalizedSuccess
        );
    }
}
