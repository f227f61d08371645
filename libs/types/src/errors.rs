//! Error taxonomy shared across registry services
//!
//! Synchronous validation errors (InvalidOrder, NotFound, Forbidden,
//! AlreadyTerminal) are returned immediately with no side effects.
//! Post-submission failures are resolved asynchronously and surface through
//! intent states and the event stream, never by failing the original call.

use crate::ids::{AccountId, IntentId, LotId, OrderId};
use crate::intent::IntentState;
use crate::order::OrderState;
use thiserror::Error;
use uuid::Uuid;

/// Order validation and lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("invalid order: {reason}")]
    InvalidOrder { reason: String },

    #[error("order not found: {order_id}")]
    NotFound { order_id: OrderId },

    #[error("account {account_id} does not own order {order_id}")]
    Forbidden {
        order_id: OrderId,
        account_id: AccountId,
    },

    #[error("order {order_id} already terminal: {state:?}")]
    AlreadyTerminal {
        order_id: OrderId,
        state: OrderState,
    },

    #[error("order {order_id} has matched quantity awaiting settlement")]
    SettlementInFlight { order_id: OrderId },
}

/// Asset lot errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LotError {
    #[error("lot not found: {lot_id}")]
    NotFound { lot_id: LotId },

    #[error("account {account_id} does not own lot {lot_id}")]
    OwnershipMismatch {
        lot_id: LotId,
        account_id: AccountId,
    },

    #[error("lot {lot_id}: requested {requested}, available {available}")]
    InsufficientAmount {
        lot_id: LotId,
        requested: String,
        available: String,
    },
}

/// Intent lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntentError {
    #[error("intent not found: {intent_id}")]
    NotFound { intent_id: IntentId },

    #[error("intent {intent_id}: invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        intent_id: IntentId,
        from: IntentState,
        to: IntentState,
    },

    #[error("intent {intent_id} already recorded")]
    Duplicate { intent_id: IntentId },

    #[error("entity {entity_id} already has a non-terminal intent {intent_id}")]
    EntityBusy {
        entity_id: Uuid,
        intent_id: IntentId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_error_display() {
        let err = OrderError::InvalidOrder {
            reason: "non-positive amount".to_string(),
        };
        assert_eq!(err.to_string(), "invalid order: non-positive amount");
    }

    #[test]
    fn test_lot_error_display() {
        let lot_id = LotId::new();
        let err = LotError::InsufficientAmount {
            lot_id,
            requested: "5".to_string(),
            available: "3".to_string(),
        };
        assert!(err.to_string().contains("requested 5"));
        assert!(err.to_string().contains("available 3"));
    }

    #[test]
    fn test_intent_error_display() {
        let intent_id = IntentId::new();
        let err = IntentError::InvalidTransition {
            intent_id,
            from: IntentState::Confirmed,
            to: IntentState::Failed,
        };
        assert!(err.to_string().contains("Confirmed"));
    }
}
