//! Local store
//!
//! Reference implementation of the persistence collaborator: durable truth
//! for order, lot, trade, and certificate records, with multi-row settlement
//! application performed atomically under one lock. Also tracks lot
//! reservations so credits backing open sell orders or in-flight operations
//! can never be promised twice.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

use order_book::LotView;
use types::asset::{AssetLot, CreditStandard, CreditType};
use types::errors::LotError;
use types::ids::{AccountId, LedgerTxRef, LotId, OrderId, TradeId};
use types::numeric::{Price, Quantity};
use types::order::Order;
use types::trade::Trade;

use crate::certificate::RetirementCertificate;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error(transparent)]
    Lot(#[from] LotError),

    #[error("trade not found: {trade_id}")]
    TradeNotFound { trade_id: TradeId },
}

#[derive(Default)]
struct StoreInner {
    orders: HashMap<OrderId, Order>,
    lots: HashMap<LotId, AssetLot>,
    trades: HashMap<TradeId, Trade>,
    /// Reserved lot quantity: open sell orders plus in-flight operations.
    lot_holds: HashMap<LotId, Quantity>,
    certificates: HashMap<uuid::Uuid, RetirementCertificate>,
}

/// In-memory durable-store stand-in shared by all settlement components.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Orders ──────────────────────────────────────────────────────

    pub fn insert_order(&self, order: Order) {
        self.lock().orders.insert(order.order_id, order);
    }

    pub fn update_order(&self, order: Order) {
        self.lock().orders.insert(order.order_id, order);
    }

    pub fn order(&self, order_id: &OrderId) -> Option<Order> {
        self.lock().orders.get(order_id).cloned()
    }

    /// Orders eligible to re-enter the book on restart.
    pub fn open_orders(&self) -> Vec<Order> {
        self.lock()
            .orders
            .values()
            .filter(|o| !o.state.is_terminal())
            .cloned()
            .collect()
    }

    // ── Lots ────────────────────────────────────────────────────────

    pub fn insert_lot(&self, lot: AssetLot) {
        self.lock().lots.insert(lot.lot_id, lot);
    }

    pub fn lot(&self, lot_id: &LotId) -> Option<AssetLot> {
        self.lock().lots.get(lot_id).cloned()
    }

    pub fn lots_owned_by(&self, account_id: &AccountId) -> Vec<AssetLot> {
        self.lock()
            .lots
            .values()
            .filter(|l| l.owner == *account_id)
            .cloned()
            .collect()
    }

    /// Reserve lot quantity for an open order or in-flight operation.
    pub fn hold_lot(&self, lot_id: &LotId, amount: Quantity) -> Result<(), LotError> {
        let mut inner = self.lock();
        let available = inner.available_of(lot_id)?;
        if available < amount {
            return Err(LotError::InsufficientAmount {
                lot_id: *lot_id,
                requested: amount.to_string(),
                available: available.to_string(),
            });
        }
        let held = inner.lot_holds.entry(*lot_id).or_insert_with(Quantity::zero);
        *held = *held + amount;
        Ok(())
    }

    /// Release a reservation that will not be consumed.
    pub fn release_lot_hold(&self, lot_id: &LotId, amount: Quantity) {
        let mut inner = self.lock();
        if let Some(held) = inner.lot_holds.get_mut(lot_id) {
            *held = held.saturating_sub(amount);
            if held.is_zero() {
                inner.lot_holds.remove(lot_id);
            }
        }
    }

    /// Drop all lot reservations. Used when rebuilding service state from
    /// durable records, which re-derive every hold.
    pub fn reset_holds(&self) {
        self.lock().lot_holds.clear();
    }

    pub fn held_for_lot(&self, lot_id: &LotId) -> Quantity {
        self.lock()
            .lot_holds
            .get(lot_id)
            .copied()
            .unwrap_or_else(Quantity::zero)
    }

    // ── Trades ──────────────────────────────────────────────────────

    pub fn insert_trade(&self, trade: Trade) {
        self.lock().trades.insert(trade.trade_id, trade);
    }

    pub fn trade(&self, trade_id: &TradeId) -> Option<Trade> {
        self.lock().trades.get(trade_id).cloned()
    }

    /// Mark a trade failed after a rejected or abandoned settlement.
    pub fn fail_trade(&self, trade_id: &TradeId, now: i64) -> Result<Trade, StoreError> {
        let mut inner = self.lock();
        let trade = inner
            .trades
            .get_mut(trade_id)
            .ok_or(StoreError::TradeNotFound { trade_id: *trade_id })?;
        trade.fail(now);
        Ok(trade.clone())
    }

    /// Apply a confirmed trade settlement as one local unit.
    ///
    /// Debits the seller lot (consuming its reservation), credits a new or
    /// merged buyer lot, persists the updated order records, and marks the
    /// trade settled — all under a single lock, so no reader observes a
    /// half-applied settlement.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_trade_settlement(
        &self,
        trade_id: &TradeId,
        updated_buy: Order,
        updated_sell: Order,
        lot_id: &LotId,
        buyer: &AccountId,
        amount: Quantity,
        clearing_price: Price,
        tx_ref: &LedgerTxRef,
        now: i64,
    ) -> Result<(Trade, AssetLot), StoreError> {
        let mut inner = self.lock();

        if !inner.trades.contains_key(trade_id) {
            return Err(StoreError::TradeNotFound { trade_id: *trade_id });
        }

        let (credit_type, vintage, standard) = {
            let seller_lot = inner
                .lots
                .get_mut(lot_id)
                .ok_or(LotError::NotFound { lot_id: *lot_id })?;
            seller_lot.debit(amount, now)?;
            (
                seller_lot.credit_type.clone(),
                seller_lot.vintage,
                seller_lot.standard,
            )
        };
        inner.consume_hold(lot_id, amount);

        let buyer_lot = inner.credit_or_merge(
            buyer,
            credit_type,
            vintage,
            standard,
            amount,
            clearing_price,
            tx_ref.clone(),
            now,
        );

        inner.orders.insert(updated_buy.order_id, updated_buy);
        inner.orders.insert(updated_sell.order_id, updated_sell);

        let trade = inner
            .trades
            .get_mut(trade_id)
            .expect("presence checked above");
        trade.settle(now);
        let trade = trade.clone();

        debug!(%trade_id, %amount, "trade settlement applied locally");
        Ok((trade, buyer_lot))
    }

    /// Apply a confirmed transfer: debit the source lot, credit or merge a
    /// lot for the recipient.
    pub fn apply_transfer(
        &self,
        lot_id: &LotId,
        to_account: &AccountId,
        amount: Quantity,
        tx_ref: &LedgerTxRef,
        now: i64,
    ) -> Result<(AssetLot, AssetLot), StoreError> {
        let mut inner = self.lock();

        let (credit_type, vintage, standard, price, source) = {
            let lot = inner
                .lots
                .get_mut(lot_id)
                .ok_or(LotError::NotFound { lot_id: *lot_id })?;
            lot.debit(amount, now)?;
            (
                lot.credit_type.clone(),
                lot.vintage,
                lot.standard,
                lot.current_price,
                lot.clone(),
            )
        };
        inner.consume_hold(lot_id, amount);

        let target = inner.credit_or_merge(
            to_account,
            credit_type,
            vintage,
            standard,
            amount,
            price,
            tx_ref.clone(),
            now,
        );
        Ok((source, target))
    }

    /// Apply a confirmed retirement: permanently remove credits.
    pub fn apply_retire(
        &self,
        lot_id: &LotId,
        amount: Quantity,
        now: i64,
    ) -> Result<AssetLot, StoreError> {
        let mut inner = self.lock();
        let lot = inner
            .lots
            .get_mut(lot_id)
            .ok_or(LotError::NotFound { lot_id: *lot_id })?;
        lot.debit(amount, now)?;
        let lot = lot.clone();
        inner.consume_hold(lot_id, amount);
        Ok(lot)
    }

    // ── Certificates ────────────────────────────────────────────────

    pub fn add_certificate(&self, certificate: RetirementCertificate) {
        self.lock()
            .certificates
            .insert(certificate.certificate_id, certificate);
    }

    pub fn certificates_for(&self, account_id: &AccountId) -> Vec<RetirementCertificate> {
        self.lock()
            .certificates
            .values()
            .filter(|c| c.account_id == *account_id)
            .cloned()
            .collect()
    }

    // ── Audit helpers ───────────────────────────────────────────────

    /// Total amount of one credit type across all accounts; invariant across
    /// trades and transfers (conservation).
    pub fn total_amount(&self, credit_type: &CreditType) -> Quantity {
        self.lock()
            .lots
            .values()
            .filter(|l| l.credit_type == *credit_type)
            .fold(Quantity::zero(), |acc, l| acc + l.amount)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("store mutex poisoned")
    }
}

impl StoreInner {
    fn available_of(&self, lot_id: &LotId) -> Result<Quantity, LotError> {
        let lot = self
            .lots
            .get(lot_id)
            .ok_or(LotError::NotFound { lot_id: *lot_id })?;
        let held = self
            .lot_holds
            .get(lot_id)
            .copied()
            .unwrap_or_else(Quantity::zero);
        Ok(lot.amount.saturating_sub(held))
    }

    fn consume_hold(&mut self, lot_id: &LotId, amount: Quantity) {
        if let Some(held) = self.lot_holds.get_mut(lot_id) {
            *held = held.saturating_sub(amount);
            if held.is_zero() {
                self.lot_holds.remove(lot_id);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn credit_or_merge(
        &mut self,
        owner: &AccountId,
        credit_type: CreditType,
        vintage: u16,
        standard: CreditStandard,
        amount: Quantity,
        price: Price,
        tx_ref: LedgerTxRef,
        now: i64,
    ) -> AssetLot {
        let existing = self
            .lots
            .values_mut()
            .find(|l| l.accepts(owner, &credit_type, vintage, standard));
        match existing {
            Some(lot) => {
                lot.credit(amount, now);
                lot.clone()
            }
            None => {
                let lot = AssetLot::new(
                    *owner,
                    credit_type,
                    vintage,
                    standard,
                    amount,
                    price,
                    tx_ref,
                    now,
                );
                self.lots.insert(lot.lot_id, lot.clone());
                lot
            }
        }
    }
}

impl LotView for MemoryStore {
    fn lot(&self, lot_id: &LotId) -> Option<AssetLot> {
        MemoryStore::lot(self, lot_id)
    }

    fn lot_available(&self, lot_id: &LotId) -> Quantity {
        self.lock()
            .available_of(lot_id)
            .unwrap_or_else(|_| Quantity::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot_for(store: &MemoryStore, owner: AccountId, amount: &str) -> LotId {
        let lot = AssetLot::new(
            owner,
            CreditType::new("forestry"),
            2023,
            CreditStandard::Verra,
            Quantity::from_str(amount).unwrap(),
            Price::from_u64(10),
            LedgerTxRef::new("token"),
            0,
        );
        let id = lot.lot_id;
        store.insert_lot(lot);
        id
    }

    #[test]
    fn test_hold_respects_availability() {
        let store = MemoryStore::new();
        let owner = AccountId::new();
        let lot = lot_for(&store, owner, "10");

        store.hold_lot(&lot, Quantity::from_u64(6)).unwrap();
        assert_eq!(store.lot_available(&lot), Quantity::from_u64(4));

        // Second hold larger than the remainder fails, state unchanged
        assert!(store.hold_lot(&lot, Quantity::from_u64(5)).is_err());
        assert_eq!(store.held_for_lot(&lot), Quantity::from_u64(6));

        store.release_lot_hold(&lot, Quantity::from_u64(6));
        assert_eq!(store.lot_available(&lot), Quantity::from_u64(10));
    }

    #[test]
    fn test_transfer_moves_amount_and_conserves_total() {
        let store = MemoryStore::new();
        let from = AccountId::new();
        let to = AccountId::new();
        let lot = lot_for(&store, from, "10");
        let credit_type = CreditType::new("forestry");

        store.hold_lot(&lot, Quantity::from_u64(4)).unwrap();
        let (source, target) = store
            .apply_transfer(&lot, &to, Quantity::from_u64(4), &LedgerTxRef::new("tx"), 1)
            .unwrap();

        assert_eq!(source.amount, Quantity::from_u64(6));
        assert_eq!(target.owner, to);
        assert_eq!(target.amount, Quantity::from_u64(4));
        assert_eq!(store.held_for_lot(&lot), Quantity::zero());
        assert_eq!(store.total_amount(&credit_type), Quantity::from_u64(10));
    }

    #[test]
    fn test_transfer_merges_into_matching_lot() {
        let store = MemoryStore::new();
        let from = AccountId::new();
        let to = AccountId::new();
        let source = lot_for(&store, from, "10");
        let existing = lot_for(&store, to, "3");

        store.hold_lot(&source, Quantity::from_u64(2)).unwrap();
        let (_, target) = store
            .apply_transfer(&source, &to, Quantity::from_u64(2), &LedgerTxRef::new("tx"), 1)
            .unwrap();

        assert_eq!(target.lot_id, existing, "same classification merges");
        assert_eq!(target.amount, Quantity::from_u64(5));
    }

    #[test]
    fn test_retire_reduces_amount() {
        let store = MemoryStore::new();
        let owner = AccountId::new();
        let lot = lot_for(&store, owner, "10");

        store.hold_lot(&lot, Quantity::from_u64(10)).unwrap();
        let updated = store.apply_retire(&lot, Quantity::from_u64(10), 1).unwrap();
        assert_eq!(updated.amount, Quantity::zero());
        assert_eq!(store.held_for_lot(&lot), Quantity::zero());
    }

    #[test]
    fn test_retire_more_than_held_amount_fails() {
        let store = MemoryStore::new();
        let owner = AccountId::new();
        let lot = lot_for(&store, owner, "5");

        let err = store.apply_retire(&lot, Quantity::from_u64(6), 1).unwrap_err();
        assert!(matches!(err, StoreError::Lot(LotError::InsufficientAmount { .. })));
        assert_eq!(store.lot(&lot).unwrap().amount, Quantity::from_u64(5));
    }
}
