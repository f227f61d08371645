//! Price crossing and clearing rules

use types::numeric::Price;

/// A buy and a sell cross when the buyer pays at least the seller's ask.
pub fn can_match(buy_price: Price, sell_price: Price) -> bool {
    buy_price >= sell_price
}

/// Clearing price for a crossed pair: the resting order's price — the order
/// that has been on the book longer. On an exact creation-time tie the sell
/// order's price wins: sell orders are asset-backed and must never fill
/// below their ask.
pub fn clearing_price(
    buy_price: Price,
    buy_created_at: i64,
    sell_price: Price,
    sell_created_at: i64,
) -> Price {
    if buy_created_at < sell_created_at {
        buy_price
    } else {
        sell_price
    }
}
