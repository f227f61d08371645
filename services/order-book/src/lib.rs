//! Order Book Service
//!
//! In-memory price-time priority order book for carbon credit orders.
//! Matching produces trade PROPOSALS: order state is never mutated at match
//! time. Proposed quantity is soft-held (excluded from further matching)
//! until the settlement orchestrator commits a confirmed fill or releases
//! the hold after a failed submission.
//!
//! **Key invariants:**
//! - Price-time priority strictly enforced
//! - Deterministic matching (same inputs, same proposals)
//! - No self-trades
//! - Rebuildable from durable order records on restart

pub mod book;
pub mod matching;

pub use book::{LotView, OrderBook};
pub use matching::TradeProposal;
