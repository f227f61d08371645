//! Order book core
//!
//! Holds all open orders in a price-time priority structure and produces
//! match proposals. The book never talks to the network: it is rebuilt from
//! durable order records on restart and mutated only by this component.

pub mod ask_book;
pub mod bid_book;
pub mod price_level;

use std::collections::HashMap;

use tracing::{debug, info};
use types::asset::AssetLot;
use types::errors::OrderError;
use types::ids::{AccountId, LotId, OrderId};
use types::numeric::Quantity;
use types::order::{Order, OrderState, Side};

use crate::matching::{crossing, TradeProposal};
use ask_book::AskBook;
use bid_book::BidBook;

/// Read access to asset lots, implemented by the local store.
///
/// The book validates sell-side backing through this seam without owning lot
/// state.
pub trait LotView {
    fn lot(&self, lot_id: &LotId) -> Option<AssetLot>;
    /// Lot amount not already reserved by open sell orders or in-flight
    /// operations.
    fn lot_available(&self, lot_id: &LotId) -> Quantity;
}

/// Price-time priority order book over all carbon credit orders.
///
/// Compatibility is decided by order filters, not by trading symbols, so a
/// single book serves the whole registry.
#[derive(Debug, Default)]
pub struct OrderBook {
    orders: HashMap<OrderId, Order>,
    bids: BidBook,
    asks: AskBook,
    /// Soft-held quantity per order: matched but not yet settled.
    holds: HashMap<OrderId, Quantity>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the in-memory structure from durable order records.
    ///
    /// Only OPEN and PARTIALLY_FILLED orders re-enter the book; terminal
    /// records are ignored.
    pub fn rebuild(records: impl IntoIterator<Item = Order>) -> Self {
        let mut book = Self::new();
        let mut restored = 0usize;
        for order in records {
            if order.state.is_terminal() {
                continue;
            }
            book.insert_into_side(&order);
            book.orders.insert(order.order_id, order);
            restored += 1;
        }
        info!(restored, "order book rebuilt from durable records");
        book
    }

    /// Accept an order into the book.
    ///
    /// Enforces business invariants only — format validation happened
    /// upstream. A SELL order must draw on a lot owned by the submitter with
    /// enough unreserved amount; its filters are normalized to the lot's
    /// classification so filter conjunction can never cross asset kinds.
    pub fn submit(&mut self, mut order: Order, lots: &dyn LotView) -> Result<OrderId, OrderError> {
        if !order.remaining.is_positive() {
            return Err(OrderError::InvalidOrder {
                reason: "amount must be positive".to_string(),
            });
        }
        if !order.price_per_unit.is_positive() {
            return Err(OrderError::InvalidOrder {
                reason: "price must be positive".to_string(),
            });
        }
        if order.state != OrderState::Open {
            return Err(OrderError::InvalidOrder {
                reason: format!("order must be OPEN on submission, got {:?}", order.state),
            });
        }

        match order.side {
            Side::BUY => {
                if order.lot_id.is_some() {
                    return Err(OrderError::InvalidOrder {
                        reason: "buy orders must not reference a lot".to_string(),
                    });
                }
            }
            Side::SELL => {
                let lot_id = order.lot_id.ok_or_else(|| OrderError::InvalidOrder {
                    reason: "sell orders must reference a lot".to_string(),
                })?;
                let lot = lots.lot(&lot_id).ok_or_else(|| OrderError::InvalidOrder {
                    reason: format!("lot {lot_id} not found"),
                })?;
                if lot.owner != order.account_id {
                    return Err(OrderError::InvalidOrder {
                        reason: format!("lot {lot_id} not owned by submitter"),
                    });
                }
                if lots.lot_available(&lot_id) < order.remaining {
                    return Err(OrderError::InvalidOrder {
                        reason: format!(
                            "lot {lot_id} has insufficient unreserved amount for order"
                        ),
                    });
                }
                normalize_sell_filters(&mut order, &lot)?;
            }
        }

        let order_id = order.order_id;
        self.insert_into_side(&order);
        self.orders.insert(order_id, order);
        debug!(%order_id, "order accepted into book");
        Ok(order_id)
    }

    /// Cancel an order on behalf of its owner.
    ///
    /// Returns the cancelled record for persistence. The caller releases the
    /// lot reservation backing a cancelled SELL order. Quantity under a live
    /// soft-hold cannot be cancelled mid-settlement.
    pub fn cancel(
        &mut self,
        order_id: &OrderId,
        account_id: &AccountId,
        now: i64,
    ) -> Result<Order, OrderError> {
        let order = self
            .orders
            .get(order_id)
            .ok_or(OrderError::NotFound { order_id: *order_id })?;
        if order.account_id != *account_id {
            return Err(OrderError::Forbidden {
                order_id: *order_id,
                account_id: *account_id,
            });
        }
        if order.state.is_terminal() {
            return Err(OrderError::AlreadyTerminal {
                order_id: *order_id,
                state: order.state,
            });
        }
        if self.held(order_id).is_positive() {
            return Err(OrderError::SettlementInFlight { order_id: *order_id });
        }

        let mut order = self.take_out(order_id).expect("presence checked above");
        order.cancel(now);
        info!(%order_id, "order cancelled");
        Ok(order)
    }

    /// Transition orders past their expiry deadline to EXPIRED and remove
    /// them from the book. Orders with a live soft-hold are skipped until
    /// their settlement resolves.
    pub fn expire_due(&mut self, now: i64) -> Vec<Order> {
        let due: Vec<OrderId> = self
            .orders
            .values()
            .filter(|o| o.is_expired(now))
            .filter(|o| !self.held(&o.order_id).is_positive())
            .map(|o| o.order_id)
            .collect();

        let mut expired = Vec::with_capacity(due.len());
        for order_id in due {
            if let Some(mut order) = self.take_out(&order_id) {
                order.expire(now);
                debug!(%order_id, "order expired");
                expired.push(order);
            }
        }
        expired
    }

    /// Scan for crossed pairs and propose trades.
    ///
    /// BUY orders are visited in descending price then ascending creation
    /// time; for each, compatible SELL orders in ascending price then
    /// ascending creation time. Order state is NOT mutated — proposed
    /// quantity is soft-held so one unit of liquidity can never back two
    /// proposals.
    pub fn match_orders(&mut self, now: i64) -> Vec<TradeProposal> {
        let mut proposals = Vec::new();
        let buy_ids = self.bids.ids_best_first();
        let sell_ids = self.asks.ids_best_first();

        for buy_id in buy_ids {
            let Some(buy) = self.orders.get(&buy_id) else {
                continue;
            };
            if buy.is_expired(now) {
                continue;
            }
            let buy_account = buy.account_id;
            let buy_price = buy.price_per_unit;
            let buy_created = buy.created_at;
            let buy_filters = buy.filters.clone();

            let mut buy_avail = self.available(&buy_id);
            if !buy_avail.is_positive() {
                continue;
            }

            for sell_id in &sell_ids {
                let Some(sell) = self.orders.get(sell_id) else {
                    continue;
                };
                let sell_price = sell.price_per_unit;
                // Asks are sorted ascending: past the crossing point nothing
                // further can match this buy.
                if !crossing::can_match(buy_price, sell_price) {
                    break;
                }
                if sell.is_expired(now) || sell.account_id == buy_account {
                    continue;
                }
                if !buy_filters.compatible(&sell.filters) {
                    continue;
                }
                let sell_account = sell.account_id;
                let sell_created = sell.created_at;
                let Some(lot_id) = sell.lot_id else {
                    continue;
                };

                let sell_avail = self.available(sell_id);
                if !sell_avail.is_positive() {
                    continue;
                }

                let amount = buy_avail.min(sell_avail);
                let clearing_price =
                    crossing::clearing_price(buy_price, buy_created, sell_price, sell_created);

                self.add_hold(buy_id, amount);
                self.add_hold(*sell_id, amount);
                buy_avail = buy_avail.saturating_sub(amount);

                debug!(
                    buy_order = %buy_id,
                    sell_order = %sell_id,
                    %amount,
                    price = %clearing_price,
                    "trade proposed"
                );
                proposals.push(TradeProposal {
                    buy_order_id: buy_id,
                    sell_order_id: *sell_id,
                    buyer_account_id: buy_account,
                    seller_account_id: sell_account,
                    lot_id,
                    amount,
                    clearing_price,
                    matched_at: now,
                });

                if !buy_avail.is_positive() {
                    break;
                }
            }
        }
        proposals
    }

    /// Apply a confirmed fill: consume the soft-hold and reduce remaining.
    ///
    /// Returns the updated record for persistence. Fully filled orders leave
    /// the book.
    pub fn commit_fill(
        &mut self,
        order_id: &OrderId,
        amount: Quantity,
        now: i64,
    ) -> Result<Order, OrderError> {
        let held = self.held(order_id);
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or(OrderError::NotFound { order_id: *order_id })?;
        assert!(held >= amount, "fill exceeds soft-held quantity");

        order.apply_fill(amount, now);
        let updated = order.clone();
        self.reduce_hold(order_id, amount);

        if updated.is_filled() {
            let price = updated.price_per_unit;
            match updated.side {
                Side::BUY => self.bids.remove(order_id, price),
                Side::SELL => self.asks.remove(order_id, price),
            };
            self.orders.remove(order_id);
        }
        Ok(updated)
    }

    /// Release a soft-hold after a settlement failed before taking effect.
    /// The quantity becomes matchable again on the next cycle.
    pub fn release_hold(&mut self, order_id: &OrderId, amount: Quantity) {
        self.reduce_hold(order_id, amount);
    }

    /// Re-establish a soft-hold during rebuild, for settlements that were in
    /// flight when the process stopped.
    pub fn reserve(&mut self, order_id: &OrderId, amount: Quantity) {
        if self.orders.contains_key(order_id) {
            self.add_hold(*order_id, amount);
        }
    }

    /// Remove an order without a state transition: caller-side rollback of a
    /// submission whose backing could not be reserved.
    pub fn withdraw(&mut self, order_id: &OrderId) -> Option<Order> {
        self.take_out(order_id)
    }

    pub fn order(&self, order_id: &OrderId) -> Option<&Order> {
        self.orders.get(order_id)
    }

    /// Soft-held quantity for an order.
    pub fn held(&self, order_id: &OrderId) -> Quantity {
        self.holds.get(order_id).copied().unwrap_or_else(Quantity::zero)
    }

    /// Quantity eligible for matching: remaining minus soft-held.
    pub fn available(&self, order_id: &OrderId) -> Quantity {
        match self.orders.get(order_id) {
            Some(order) => order.remaining.saturating_sub(self.held(order_id)),
            None => Quantity::zero(),
        }
    }

    pub fn open_order_count(&self) -> usize {
        self.orders.len()
    }

    fn insert_into_side(&mut self, order: &Order) {
        match order.side {
            Side::BUY => self.bids.insert(order.price_per_unit, order.order_id),
            Side::SELL => self.asks.insert(order.price_per_unit, order.order_id),
        }
    }

    fn take_out(&mut self, order_id: &OrderId) -> Option<Order> {
        let order = self.orders.remove(order_id)?;
        match order.side {
            Side::BUY => self.bids.remove(order_id, order.price_per_unit),
            Side::SELL => self.asks.remove(order_id, order.price_per_unit),
        };
        self.holds.remove(order_id);
        Some(order)
    }

    fn add_hold(&mut self, order_id: OrderId, amount: Quantity) {
        let entry = self.holds.entry(order_id).or_insert_with(Quantity::zero);
        *entry = *entry + amount;
    }

    fn reduce_hold(&mut self, order_id: &OrderId, amount: Quantity) {
        if let Some(held) = self.holds.get_mut(order_id) {
            *held = held.saturating_sub(amount);
            if held.is_zero() {
                self.holds.remove(order_id);
            }
        }
    }
}

/// Align a sell order's filters with the lot it draws from, so conjunction
/// matching can never pair a buy with the wrong asset kind.
fn normalize_sell_filters(order: &mut Order, lot: &AssetLot) -> Result<(), OrderError> {
    let filters = &mut order.filters;

    match &filters.credit_type {
        Some(ct) if *ct != lot.credit_type => {
            return Err(OrderError::InvalidOrder {
                reason: format!(
                    "filter credit_type {ct} does not match lot credit_type {}",
                    lot.credit_type
                ),
            });
        }
        _ => filters.credit_type = Some(lot.credit_type.clone()),
    }

    match filters.vintage {
        Some(v) if v != lot.vintage => {
            return Err(OrderError::InvalidOrder {
                reason: format!("filter vintage {v} does not match lot vintage {}", lot.vintage),
            });
        }
        _ => filters.vintage = Some(lot.vintage),
    }

    match filters.standard {
        Some(s) if s != lot.standard => {
            return Err(OrderError::InvalidOrder {
                reason: "filter standard does not match lot standard".to_string(),
            });
        }
        _ => filters.standard = Some(lot.standard),
    }

    Ok(())
}
