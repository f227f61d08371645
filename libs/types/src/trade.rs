//! Trade records produced by matching
//!
//! A trade pairs one buy and one sell order for some quantity at a clearing
//! price. Immutable once created apart from its settlement outcome.

use crate::ids::{AccountId, IntentId, LotId, OrderId, TradeId};
use crate::numeric::{Price, Quantity};
use serde::{Deserialize, Serialize};

/// Settlement outcome of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeState {
    /// Created from a match; settlement intent in flight
    PENDING,
    /// Ledger confirmed; balances applied (terminal)
    SETTLED,
    /// Ledger rejected or submission failed (terminal)
    FAILED,
}

/// Result of matching one buy and one sell order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_account_id: AccountId,
    pub seller_account_id: AccountId,
    /// Lot the sell side draws from.
    pub lot_id: LotId,
    pub amount: Quantity,
    pub clearing_price: Price,
    pub created_at: i64, // Unix nanos
    /// The RECORD_TRADE intent driving settlement.
    pub settlement_intent_id: Option<IntentId>,
    pub settled_at: Option<i64>,
    pub state: TradeState,
}

impl Trade {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buy_order_id: OrderId,
        sell_order_id: OrderId,
        buyer_account_id: AccountId,
        seller_account_id: AccountId,
        lot_id: LotId,
        amount: Quantity,
        clearing_price: Price,
        timestamp: i64,
    ) -> Self {
        Self {
            trade_id: TradeId::new(),
            buy_order_id,
            sell_order_id,
            buyer_account_id,
            seller_account_id,
            lot_id,
            amount,
            clearing_price,
            created_at: timestamp,
            settlement_intent_id: None,
            settled_at: None,
            state: TradeState::PENDING,
        }
    }

    /// Mark the trade settled after ledger confirmation.
    pub fn settle(&mut self, timestamp: i64) {
        self.state = TradeState::SETTLED;
        self.settled_at = Some(timestamp);
    }

    /// Mark the trade failed after ledger rejection.
    pub fn fail(&mut self, timestamp: i64) {
        self.state = TradeState::FAILED;
        self.settled_at = Some(timestamp);
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.state, TradeState::SETTLED)
    }

    /// Total value exchanged (amount × clearing price).
    pub fn trade_value(&self) -> rust_decimal::Decimal {
        self.amount.as_decimal() * self.clearing_price.as_decimal()
    }

    /// A buyer never trades with themselves.
    pub fn validate_no_self_trade(&self) -> bool {
        self.buyer_account_id != self.seller_account_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn trade() -> Trade {
        Trade::new(
            OrderId::new(),
            OrderId::new(),
            AccountId::new(),
            AccountId::new(),
            LotId::new(),
            Quantity::from_str("0.5").unwrap(),
            Price::from_u64(12),
            1_700_000_000_000_000_000,
        )
    }

    #[test]
    fn test_trade_creation() {
        let t = trade();
        assert_eq!(t.state, TradeState::PENDING);
        assert!(!t.is_settled());
        assert!(t.validate_no_self_trade());
        assert!(t.settlement_intent_id.is_none());
    }

    #[test]
    fn test_trade_settlement() {
        let mut t = trade();
        t.settle(42);
        assert!(t.is_settled());
        assert_eq!(t.settled_at, Some(42));
    }

    #[test]
    fn test_trade_failure() {
        let mut t = trade();
        t.fail(42);
        assert_eq!(t.state, TradeState::FAILED);
        assert!(!t.is_settled());
    }

    #[test]
    fn test_trade_value() {
        let t = trade();
        assert_eq!(t.trade_value(), Decimal::from(6));
    }
}
