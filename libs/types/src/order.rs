//! Order lifecycle types and matching filters

use crate::ids::{AccountId, LotId, OrderId};
use crate::numeric::{Price, Quantity};
use crate::asset::{CreditStandard, CreditType};
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    BUY,
    /// Sell order (ask)
    SELL,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::BUY => Side::SELL,
            Side::SELL => Side::BUY,
        }
    }
}

/// Order state machine
///
/// OPEN → PARTIALLY_FILLED → FILLED is driven by confirmed settlements only;
/// CANCELLED and EXPIRED orders never resume matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
}

impl OrderState {
    /// Check if state is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Expired
        )
    }
}

/// Optional compatibility constraints on what an order will match against.
///
/// Matching treats filters as a conjunction of all non-null fields on both
/// sides: a `None` field constrains nothing; a `Some` field must equal the
/// counterparty lot/filter value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderFilters {
    pub credit_type: Option<CreditType>,
    pub vintage: Option<u16>,
    pub location: Option<String>,
    pub standard: Option<CreditStandard>,
}

impl OrderFilters {
    /// No constraints; matches any counterparty.
    pub fn any() -> Self {
        Self::default()
    }

    /// Conjunction compatibility: every field that is `Some` on either side
    /// must be `Some` and equal on comparison, fields where one side is
    /// `None` pass.
    pub fn compatible(&self, other: &OrderFilters) -> bool {
        fn field_ok<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
            match (a, b) {
                (Some(x), Some(y)) => x == y,
                _ => true,
            }
        }

        field_ok(&self.credit_type, &other.credit_type)
            && field_ok(&self.vintage, &other.vintage)
            && field_ok(&self.location, &other.location)
            && field_ok(&self.standard, &other.standard)
    }
}

/// A resting buy or sell instruction.
///
/// A SELL order references the asset lot it draws from; a BUY order
/// references no lot until matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub side: Side,
    /// Original order size.
    pub amount: Quantity,
    /// Unfilled portion; decreases only via confirmed settlements.
    pub remaining: Quantity,
    pub price_per_unit: Price,
    pub filters: OrderFilters,
    /// Source lot for SELL orders; None for BUY orders.
    pub lot_id: Option<LotId>,
    pub created_at: i64, // Unix nanos
    pub expires_at: Option<i64>,
    pub state: OrderState,
    pub updated_at: i64,
    pub version: u64, // Optimistic locking
}

impl Order {
    /// Create a new open BUY order.
    pub fn new_buy(
        account_id: AccountId,
        amount: Quantity,
        price_per_unit: Price,
        filters: OrderFilters,
        expires_at: Option<i64>,
        timestamp: i64,
    ) -> Self {
        Self {
            order_id: OrderId::new(),
            account_id,
            side: Side::BUY,
            amount,
            remaining: amount,
            price_per_unit,
            filters,
            lot_id: None,
            created_at: timestamp,
            expires_at,
            state: OrderState::Open,
            updated_at: timestamp,
            version: 0,
        }
    }

    /// Create a new open SELL order drawing from `lot_id`.
    pub fn new_sell(
        account_id: AccountId,
        lot_id: LotId,
        amount: Quantity,
        price_per_unit: Price,
        filters: OrderFilters,
        expires_at: Option<i64>,
        timestamp: i64,
    ) -> Self {
        Self {
            order_id: OrderId::new(),
            account_id,
            side: Side::SELL,
            amount,
            remaining: amount,
            price_per_unit,
            filters,
            lot_id: Some(lot_id),
            created_at: timestamp,
            expires_at,
            state: OrderState::Open,
            updated_at: timestamp,
            version: 0,
        }
    }

    /// Check quantity invariant: remaining ≤ amount, FILLED ⇔ remaining = 0.
    pub fn check_invariant(&self) -> bool {
        self.remaining <= self.amount
            && ((self.state == OrderState::Filled) == self.remaining.is_zero())
    }

    pub fn is_filled(&self) -> bool {
        self.remaining.is_zero()
    }

    /// Whether the order is past its expiry deadline.
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }

    /// Reduce the remaining amount by a confirmed fill and adjust state.
    ///
    /// # Panics
    /// Panics if the fill exceeds the remaining amount; the matcher never
    /// proposes more than `remaining` and settlement applies at most once.
    pub fn apply_fill(&mut self, fill: Quantity, timestamp: i64) {
        let remaining = self
            .remaining
            .checked_sub(fill)
            .expect("fill exceeds remaining amount");
        self.remaining = remaining;
        self.state = if remaining.is_zero() {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };
        self.updated_at = timestamp;
        self.version += 1;

        assert!(self.check_invariant(), "invariant violated after fill");
    }

    /// Cancel the order.
    ///
    /// # Panics
    /// Panics if the order is already terminal; callers check first.
    pub fn cancel(&mut self, timestamp: i64) {
        assert!(!self.state.is_terminal(), "cannot cancel terminal order");
        self.state = OrderState::Cancelled;
        self.updated_at = timestamp;
        self.version += 1;
    }

    /// Expire the order.
    ///
    /// # Panics
    /// Panics if the order is already terminal; callers check first.
    pub fn expire(&mut self, timestamp: i64) {
        assert!(!self.state.is_terminal(), "cannot expire terminal order");
        self.state = OrderState::Expired;
        self.updated_at = timestamp;
        self.version += 1;
    }
}
