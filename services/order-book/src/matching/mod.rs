//! Match proposal types
//!
//! Matching yields proposals rather than executed trades: the settlement
//! orchestrator owns all order/lot state changes, which happen only after a
//! confirmed ledger intent.

pub mod crossing;

use serde::{Deserialize, Serialize};
use types::ids::{AccountId, LotId, OrderId};
use types::numeric::{Price, Quantity};

/// A proposed trade between one buy and one sell order.
///
/// The proposed quantity is soft-held on both orders until the orchestrator
/// either commits a confirmed fill or releases the hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_account_id: AccountId,
    pub seller_account_id: AccountId,
    /// Lot the sell order draws from.
    pub lot_id: LotId,
    pub amount: Quantity,
    pub clearing_price: Price,
    pub matched_at: i64, // Unix nanos
}
