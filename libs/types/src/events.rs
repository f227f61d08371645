//! Terminal-outcome events
//!
//! Broadcast to notification/indexing collaborators whenever an order, trade,
//! or intent reaches an outcome worth reporting. Nothing is silently dropped:
//! every intent that leaves PENDING eventually produces a confirmed, failed,
//! or reported-unknown event.

use crate::ids::{AccountId, IntentId, LedgerTxRef, LotId, OrderId, TradeId};
use crate::numeric::{Price, Quantity};
use crate::order::OrderState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event on the terminal-outcome stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub event_id: Uuid,
    pub timestamp: i64, // Unix nanos
    pub payload: OutcomePayload,
}

impl OutcomeEvent {
    pub fn new(payload: OutcomePayload, timestamp: i64) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            timestamp,
            payload,
        }
    }

    /// Event type as a string label for logging.
    pub fn event_type_label(&self) -> &'static str {
        match &self.payload {
            OutcomePayload::TradeSettled { .. } => "TradeSettled",
            OutcomePayload::TradeFailed { .. } => "TradeFailed",
            OutcomePayload::OrderFilled { .. } => "OrderFilled",
            OutcomePayload::OrderPartiallyFilled { .. } => "OrderPartiallyFilled",
            OutcomePayload::OrderCancelled { .. } => "OrderCancelled",
            OutcomePayload::OrderExpired { .. } => "OrderExpired",
            OutcomePayload::IntentFailed { .. } => "IntentFailed",
            OutcomePayload::IntentUnknown { .. } => "IntentUnknown",
            OutcomePayload::IntentAbandoned { .. } => "IntentAbandoned",
            OutcomePayload::LotMinted { .. } => "LotMinted",
            OutcomePayload::LotTransferred { .. } => "LotTransferred",
            OutcomePayload::LotRetired { .. } => "LotRetired",
            OutcomePayload::CertificateIssued { .. } => "CertificateIssued",
        }
    }
}

/// Event-specific payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum OutcomePayload {
    TradeSettled {
        trade_id: TradeId,
        buy_order_id: OrderId,
        sell_order_id: OrderId,
        amount: Quantity,
        clearing_price: Price,
        ledger_tx_ref: LedgerTxRef,
    },

    TradeFailed {
        trade_id: TradeId,
        buy_order_id: OrderId,
        sell_order_id: OrderId,
        reason: String,
    },

    OrderFilled {
        order_id: OrderId,
        account_id: AccountId,
    },

    OrderPartiallyFilled {
        order_id: OrderId,
        account_id: AccountId,
        remaining: Quantity,
    },

    OrderCancelled {
        order_id: OrderId,
        account_id: AccountId,
        remaining: Quantity,
    },

    OrderExpired {
        order_id: OrderId,
        account_id: AccountId,
        remaining: Quantity,
    },

    IntentFailed {
        intent_id: IntentId,
        reason: String,
    },

    /// Confirmation polling exhausted; awaiting reconciliation.
    IntentUnknown {
        intent_id: IntentId,
        ledger_tx_ref: Option<LedgerTxRef>,
    },

    /// Reconciler gave up on an intent with no ledger record; held amounts
    /// were released. Operator-visible, never silent.
    IntentAbandoned {
        intent_id: IntentId,
        idle_nanos: i64,
    },

    LotMinted {
        lot_id: LotId,
        owner: AccountId,
        amount: Quantity,
        ledger_tx_ref: LedgerTxRef,
    },

    LotTransferred {
        source_lot_id: LotId,
        target_lot_id: LotId,
        from_account: AccountId,
        to_account: AccountId,
        amount: Quantity,
    },

    LotRetired {
        lot_id: LotId,
        owner: AccountId,
        amount: Quantity,
    },

    CertificateIssued {
        certificate_id: Uuid,
        lot_id: LotId,
        owner: AccountId,
        amount: Quantity,
        content_hash: String,
    },
}

/// Helper for order-state events emitted after a confirmed fill.
pub fn order_outcome(order_id: OrderId, account_id: AccountId, state: OrderState, remaining: Quantity) -> Option<OutcomePayload> {
    match state {
        OrderState::Filled => Some(OutcomePayload::OrderFilled { order_id, account_id }),
        OrderState::PartiallyFilled => Some(OutcomePayload::OrderPartiallyFilled {
            order_id,
            account_id,
            remaining,
        }),
        _ => None,
    }
}
