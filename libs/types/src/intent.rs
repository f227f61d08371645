//! Ledger intent lifecycle
//!
//! An intent is the durable record of one requested ledger mutation and its
//! confirmation lifecycle. The intent id is the idempotency token presented
//! to the ledger; the intent record is written durably BEFORE any network
//! call so retries and crash recovery are safe.

use crate::asset::{CreditStandard, CreditType};
use crate::errors::IntentError;
use crate::ids::{AccountId, IntentId, LedgerTxRef, LotId, OrderId, TradeId};
use crate::numeric::{Price, Quantity};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of ledger mutation an intent requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentKind {
    Mint,
    Transfer,
    Retire,
    RecordTrade,
}

/// Intent state machine.
///
/// PENDING → SUBMITTED → {CONFIRMED | FAILED} monotonically. UNKNOWN is
/// reachable from SUBMITTED only after confirmation polling exhausts, and is
/// resolved only by the reconciler (to CONFIRMED or FAILED). PENDING →
/// FAILED covers submissions the ledger never acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentState {
    Pending,
    Submitted,
    Confirmed,
    Failed,
    Unknown,
}

impl IntentState {
    /// CONFIRMED and FAILED are terminal; UNKNOWN is not — it awaits
    /// reconciliation and must never be treated as either outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentState::Confirmed | IntentState::Failed)
    }
}

/// Typed payload of a ledger mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum IntentPayload {
    Mint {
        account_id: AccountId,
        credit_type: CreditType,
        vintage: u16,
        standard: CreditStandard,
        amount: Quantity,
        price: Price,
    },
    Transfer {
        lot_id: LotId,
        from_account: AccountId,
        to_account: AccountId,
        amount: Quantity,
    },
    Retire {
        lot_id: LotId,
        account_id: AccountId,
        amount: Quantity,
    },
    RecordTrade {
        trade_id: TradeId,
        buy_order_id: OrderId,
        sell_order_id: OrderId,
        buyer_account_id: AccountId,
        seller_account_id: AccountId,
        lot_id: LotId,
        amount: Quantity,
        clearing_price: Price,
    },
}

impl IntentPayload {
    pub fn kind(&self) -> IntentKind {
        match self {
            IntentPayload::Mint { .. } => IntentKind::Mint,
            IntentPayload::Transfer { .. } => IntentKind::Transfer,
            IntentPayload::Retire { .. } => IntentKind::Retire,
            IntentPayload::RecordTrade { .. } => IntentKind::RecordTrade,
        }
    }

    /// Entities this intent operates on, for the at-most-one-outstanding-
    /// intent-per-entity rule. Mint creates a fresh lot, so it touches none.
    pub fn entity_ids(&self) -> Vec<Uuid> {
        match self {
            IntentPayload::Mint { .. } => vec![],
            IntentPayload::Transfer { lot_id, .. } => vec![*lot_id.as_uuid()],
            IntentPayload::Retire { lot_id, .. } => vec![*lot_id.as_uuid()],
            IntentPayload::RecordTrade {
                buy_order_id,
                sell_order_id,
                lot_id,
                ..
            } => vec![
                *buy_order_id.as_uuid(),
                *sell_order_id.as_uuid(),
                *lot_id.as_uuid(),
            ],
        }
    }
}

/// Durable record of one ledger-bound operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Service-generated id, presented to the ledger as idempotency token.
    pub intent_id: IntentId,
    pub kind: IntentKind,
    pub payload: IntentPayload,
    pub state: IntentState,
    /// Ledger-assigned reference; None until SUBMITTED.
    pub ledger_tx_ref: Option<LedgerTxRef>,
    pub attempts: u32,
    pub created_at: i64, // Unix nanos
    pub last_attempt_at: Option<i64>,
    pub terminal_at: Option<i64>,
}

impl Intent {
    pub fn new(payload: IntentPayload, timestamp: i64) -> Self {
        Self {
            intent_id: IntentId::new(),
            kind: payload.kind(),
            payload,
            state: IntentState::Pending,
            ledger_tx_ref: None,
            attempts: 0,
            created_at: timestamp,
            last_attempt_at: None,
            terminal_at: None,
        }
    }

    fn transition(&mut self, to: IntentState) -> Result<(), IntentError> {
        let allowed = matches!(
            (self.state, to),
            (IntentState::Pending, IntentState::Submitted)
                | (IntentState::Pending, IntentState::Failed)
                | (IntentState::Submitted, IntentState::Confirmed)
                | (IntentState::Submitted, IntentState::Failed)
                | (IntentState::Submitted, IntentState::Unknown)
                | (IntentState::Unknown, IntentState::Confirmed)
                | (IntentState::Unknown, IntentState::Failed)
        );
        if !allowed {
            return Err(IntentError::InvalidTransition {
                intent_id: self.intent_id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Record one submission attempt.
    pub fn record_attempt(&mut self, timestamp: i64) {
        self.attempts += 1;
        self.last_attempt_at = Some(timestamp);
    }

    /// Ledger acknowledged receipt; only polling is permitted from here on.
    pub fn mark_submitted(
        &mut self,
        tx_ref: LedgerTxRef,
        timestamp: i64,
    ) -> Result<(), IntentError> {
        self.transition(IntentState::Submitted)?;
        self.ledger_tx_ref = Some(tx_ref);
        self.last_attempt_at = Some(timestamp);
        Ok(())
    }

    pub fn mark_confirmed(&mut self, timestamp: i64) -> Result<(), IntentError> {
        self.transition(IntentState::Confirmed)?;
        self.terminal_at = Some(timestamp);
        Ok(())
    }

    pub fn mark_failed(&mut self, timestamp: i64) -> Result<(), IntentError> {
        self.transition(IntentState::Failed)?;
        self.terminal_at = Some(timestamp);
        Ok(())
    }

    /// Confirmation polling exhausted without a terminal answer.
    pub fn mark_unknown(&mut self, timestamp: i64) -> Result<(), IntentError> {
        self.transition(IntentState::Unknown)?;
        self.last_attempt_at = Some(timestamp);
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Nanoseconds since the last lifecycle activity on this intent.
    pub fn idle_nanos(&self, now: i64) -> i64 {
        now - self.last_attempt_at.unwrap_or(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retire_intent() -> Intent {
        Intent::new(
            IntentPayload::Retire {
                lot_id: LotId::new(),
                account_id: AccountId::new(),
                amount: Quantity::from_str("5.0").unwrap(),
            },
            1_700_000_000_000_000_000,
        )
    }

    #[test]
    fn test_new_intent_is_pending() {
        let intent = retire_intent();
        assert_eq!(intent.state, IntentState::Pending);
        assert_eq!(intent.kind, IntentKind::Retire);
        assert!(intent.ledger_tx_ref.is_none());
        assert!(!intent.is_terminal());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut intent = retire_intent();
        intent.mark_submitted(LedgerTxRef::new("tx-1"), 1).unwrap();
        assert_eq!(intent.state, IntentState::Submitted);
        assert_eq!(intent.ledger_tx_ref, Some(LedgerTxRef::new("tx-1")));

        intent.mark_confirmed(2).unwrap();
        assert!(intent.is_terminal());
        assert_eq!(intent.terminal_at, Some(2));
    }

    #[test]
    fn test_unknown_resolution_by_reconciler() {
        let mut intent = retire_intent();
        intent.mark_submitted(LedgerTxRef::new("tx-1"), 1).unwrap();
        intent.mark_unknown(2).unwrap();
        assert!(!intent.is_terminal(), "UNKNOWN is not terminal");

        intent.mark_failed(3).unwrap();
        assert!(intent.is_terminal());
    }

    #[test]
    fn test_pending_can_fail_without_submission() {
        let mut intent = retire_intent();
        intent.mark_failed(1).unwrap();
        assert_eq!(intent.state, IntentState::Failed);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut intent = retire_intent();
        intent.mark_submitted(LedgerTxRef::new("tx-1"), 1).unwrap();
        intent.mark_confirmed(2).unwrap();

        let err = intent.mark_failed(3).unwrap_err();
        assert!(matches!(err, IntentError::InvalidTransition { .. }));
        assert_eq!(intent.state, IntentState::Confirmed);
    }

    #[test]
    fn test_unknown_unreachable_from_pending() {
        let mut intent = retire_intent();
        assert!(intent.mark_unknown(1).is_err());
    }

    #[test]
    fn test_confirm_unreachable_from_pending() {
        let mut intent = retire_intent();
        assert!(intent.mark_confirmed(1).is_err());
    }

    #[test]
    fn test_record_trade_entities() {
        let buy = OrderId::new();
        let sell = OrderId::new();
        let lot = LotId::new();
        let payload = IntentPayload::RecordTrade {
            trade_id: TradeId::new(),
            buy_order_id: buy,
            sell_order_id: sell,
            buyer_account_id: AccountId::new(),
            seller_account_id: AccountId::new(),
            lot_id: lot,
            amount: Quantity::from_u64(10),
            clearing_price: Price::from_u64(9),
        };
        let entities = payload.entity_ids();
        assert_eq!(entities.len(), 3);
        assert!(entities.contains(buy.as_uuid()));
        assert!(entities.contains(sell.as_uuid()));
        assert!(entities.contains(lot.as_uuid()));
    }

    #[test]
    fn test_attempt_tracking() {
        let mut intent = retire_intent();
        intent.record_attempt(10);
        intent.record_attempt(20);
        assert_eq!(intent.attempts, 2);
        assert_eq!(intent.last_attempt_at, Some(20));
        assert_eq!(intent.idle_nanos(25), 5);
    }
}
