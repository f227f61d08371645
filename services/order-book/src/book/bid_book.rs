//! Bid (buy-side) book
//!
//! Buy orders sorted by price descending (best bid first). BTreeMap keeps
//! iteration deterministic; FIFO within each price level.

use std::collections::BTreeMap;
use types::ids::OrderId;
use types::numeric::Price;

use super::price_level::PriceLevel;

/// Buy side of the book, best (highest) price first.
#[derive(Debug, Clone, Default)]
pub struct BidBook {
    levels: BTreeMap<Price, PriceLevel>,
}

impl BidBook {
    pub fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, price: Price, order_id: OrderId) {
        self.levels.entry(price).or_default().insert(order_id);
    }

    /// Remove an order resting at `price`. Returns true if found.
    pub fn remove(&mut self, order_id: &OrderId, price: Price) -> bool {
        if let Some(level) = self.levels.get_mut(&price) {
            if level.remove(order_id) {
                if level.is_empty() {
                    self.levels.remove(&price);
                }
                return true;
            }
        }
        false
    }

    /// The best (highest) bid price.
    pub fn best_price(&self) -> Option<Price> {
        self.levels.keys().next_back().copied()
    }

    /// All order ids in matching priority: price descending, FIFO within a
    /// price level.
    pub fn ids_best_first(&self) -> Vec<OrderId> {
        self.levels
            .iter()
            .rev()
            .flat_map(|(_, level)| level.iter().copied())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}
