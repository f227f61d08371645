//! Market service facade
//!
//! The surface collaborators call: place/cancel orders, query status,
//! request direct asset operations, run match cycles, subscribe to terminal
//! outcomes. Commands arrive already authenticated and format-validated;
//! this layer enforces business invariants and wires the components
//! together. Post-submission work never blocks the original request — it
//! resolves through the intent status query and the event stream.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use intent_store::IntentStore;
use ledger_gateway::LedgerGateway;
use order_book::OrderBook;
use types::clock;
use types::errors::OrderError;
use types::events::{OutcomeEvent, OutcomePayload};
use types::ids::{AccountId, IntentId, LedgerTxRef, LotId, OrderId};
use types::intent::{IntentPayload, IntentState};
use types::numeric::{Price, Quantity};
use types::order::{Order, OrderFilters, OrderState, Side};

use crate::orchestrator::{
    MintRequest, RetireRequest, SettlementError, SettlementOrchestrator, SettlementOutcome,
    TransferRequest,
};
use crate::store::MemoryStore;

/// Typed order command, pre-validated upstream.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub account_id: AccountId,
    pub side: Side,
    pub amount: Quantity,
    pub price_per_unit: Price,
    pub filters: OrderFilters,
    /// Backing lot; required for SELL, forbidden for BUY.
    pub lot_id: Option<LotId>,
    pub expires_at: Option<i64>,
}

/// The registry core exposed to collaborators.
#[derive(Clone)]
pub struct MarketService {
    orchestrator: Arc<SettlementOrchestrator>,
    store: Arc<MemoryStore>,
    intents: Arc<IntentStore>,
    book: Arc<StdMutex<OrderBook>>,
}

impl MarketService {
    /// Wire the service over its collaborators, rebuilding the in-memory
    /// book and all reservations from durable records.
    pub fn new(
        store: Arc<MemoryStore>,
        intents: Arc<IntentStore>,
        gateway: Arc<LedgerGateway>,
    ) -> Self {
        let book = Arc::new(StdMutex::new(Self::rebuild_book(&store, &intents)));
        let orchestrator = Arc::new(SettlementOrchestrator::new(
            store.clone(),
            intents.clone(),
            gateway,
            book.clone(),
        ));
        Self {
            orchestrator,
            store,
            intents,
            book,
        }
    }

    fn rebuild_book(store: &Arc<MemoryStore>, intents: &Arc<IntentStore>) -> OrderBook {
        let open_orders = store.open_orders();
        let mut book = OrderBook::rebuild(open_orders.clone());
        store.reset_holds();

        // Lot reservations back every open sell order's unfilled amount.
        for order in &open_orders {
            if order.side == Side::SELL {
                if let Some(lot_id) = order.lot_id {
                    if let Err(e) = store.hold_lot(&lot_id, order.remaining) {
                        warn!(order_id = %order.order_id, error = %e, "lot reservation on rebuild failed");
                    }
                }
            }
        }

        // In-flight intents keep their holds across restarts.
        for intent in intents.non_terminal() {
            match &intent.payload {
                IntentPayload::RecordTrade {
                    buy_order_id,
                    sell_order_id,
                    amount,
                    ..
                } => {
                    book.reserve(buy_order_id, *amount);
                    book.reserve(sell_order_id, *amount);
                }
                IntentPayload::Transfer { lot_id, amount, .. }
                | IntentPayload::Retire { lot_id, amount, .. } => {
                    if let Err(e) = store.hold_lot(lot_id, *amount) {
                        warn!(intent_id = %intent.intent_id, error = %e, "intent reservation on rebuild failed");
                    }
                }
                IntentPayload::Mint { .. } => {}
            }
        }
        book
    }

    // ── Orders ──────────────────────────────────────────────────────

    /// Place an order. Synchronous business validation; the order rests in
    /// the book until matched, cancelled, or expired.
    pub fn place_order(&self, cmd: PlaceOrder) -> Result<OrderId, OrderError> {
        let now = clock::now_nanos();
        let order = match cmd.side {
            Side::BUY => {
                if cmd.lot_id.is_some() {
                    return Err(OrderError::InvalidOrder {
                        reason: "buy orders must not reference a lot".to_string(),
                    });
                }
                Order::new_buy(
                    cmd.account_id,
                    cmd.amount,
                    cmd.price_per_unit,
                    cmd.filters,
                    cmd.expires_at,
                    now,
                )
            }
            Side::SELL => {
                let lot_id = cmd.lot_id.ok_or_else(|| OrderError::InvalidOrder {
                    reason: "sell orders must reference a lot".to_string(),
                })?;
                Order::new_sell(
                    cmd.account_id,
                    lot_id,
                    cmd.amount,
                    cmd.price_per_unit,
                    cmd.filters,
                    cmd.expires_at,
                    now,
                )
            }
        };

        let mut book = self.book.lock().expect("book mutex poisoned");
        let order_id = book.submit(order, self.store.as_ref())?;
        let stored = book
            .order(&order_id)
            .cloned()
            .expect("order inserted above");

        if stored.side == Side::SELL {
            let lot_id = stored.lot_id.expect("sell order references a lot");
            if let Err(e) = self.store.hold_lot(&lot_id, stored.amount) {
                // Lost a race for the backing amount between validation and
                // reservation; undo the book insert.
                book.withdraw(&order_id);
                return Err(OrderError::InvalidOrder {
                    reason: e.to_string(),
                });
            }
        }
        drop(book);

        self.store.insert_order(stored);
        info!(%order_id, side = ?cmd.side, "order placed");
        Ok(order_id)
    }

    /// Cancel an order on behalf of its owner.
    pub fn cancel_order(
        &self,
        order_id: &OrderId,
        account_id: &AccountId,
    ) -> Result<Order, OrderError> {
        let now = clock::now_nanos();
        let result = {
            let mut book = self.book.lock().expect("book mutex poisoned");
            book.cancel(order_id, account_id, now)
        };

        let cancelled = match result {
            Ok(order) => order,
            Err(OrderError::NotFound { .. }) => {
                // Terminal orders leave the book but stay in the store;
                // answer from the durable record.
                return match self.store.order(order_id) {
                    Some(o) if o.account_id != *account_id => Err(OrderError::Forbidden {
                        order_id: *order_id,
                        account_id: *account_id,
                    }),
                    Some(o) if o.state.is_terminal() => Err(OrderError::AlreadyTerminal {
                        order_id: *order_id,
                        state: o.state,
                    }),
                    _ => Err(OrderError::NotFound { order_id: *order_id }),
                };
            }
            Err(e) => return Err(e),
        };

        if let (Side::SELL, Some(lot_id)) = (cancelled.side, cancelled.lot_id) {
            self.store.release_lot_hold(&lot_id, cancelled.remaining);
        }
        self.store.update_order(cancelled.clone());
        self.orchestrator.emit(OutcomePayload::OrderCancelled {
            order_id: *order_id,
            account_id: *account_id,
            remaining: cancelled.remaining,
        });
        Ok(cancelled)
    }

    /// Current state and unfilled amount of an order.
    pub fn order_status(&self, order_id: &OrderId) -> Result<(OrderState, Quantity), OrderError> {
        self.store
            .order(order_id)
            .map(|o| (o.state, o.remaining))
            .ok_or(OrderError::NotFound { order_id: *order_id })
    }

    // ── Matching ────────────────────────────────────────────────────

    /// Run one match cycle and settle every proposal. Proposals over
    /// unrelated entities settle in parallel; proposals sharing an order
    /// serialize on its advisory lock.
    pub async fn run_match_cycle(&self) -> Vec<SettlementOutcome> {
        let proposals = {
            let mut book = self.book.lock().expect("book mutex poisoned");
            book.match_orders(clock::now_nanos())
        };
        if proposals.is_empty() {
            return Vec::new();
        }
        info!(proposals = proposals.len(), "match cycle produced proposals");

        let settlements = proposals
            .into_iter()
            .map(|proposal| self.orchestrator.settle_trade(proposal));
        futures::future::join_all(settlements)
            .await
            .into_iter()
            .map(|result| match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    SettlementOrchestrator::log_task_error("settle_trade", &e);
                    SettlementOutcome::Skipped {
                        reason: e.to_string(),
                    }
                }
            })
            .collect()
    }

    /// Expire orders past their deadline. Quantity under a live soft-hold is
    /// skipped until its settlement resolves.
    pub fn expire_orders(&self) -> Vec<Order> {
        let now = clock::now_nanos();
        let expired = {
            let mut book = self.book.lock().expect("book mutex poisoned");
            book.expire_due(now)
        };
        for order in &expired {
            if let (Side::SELL, Some(lot_id)) = (order.side, order.lot_id) {
                self.store.release_lot_hold(&lot_id, order.remaining);
            }
            self.store.update_order(order.clone());
            self.orchestrator.emit(OutcomePayload::OrderExpired {
                order_id: order.order_id,
                account_id: order.account_id,
                remaining: order.remaining,
            });
        }
        expired
    }

    /// Spawn the periodic expiry sweep.
    pub fn spawn_expiry(&self, interval: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let expired = service.expire_orders();
                if !expired.is_empty() {
                    info!(count = expired.len(), "orders expired");
                }
            }
        })
    }

    // ── Direct asset operations ─────────────────────────────────────

    /// Request a mint. Returns the intent id immediately; settlement
    /// resolves asynchronously via `intent_status` and the event stream.
    pub fn request_mint(&self, req: MintRequest) -> Result<IntentId, SettlementError> {
        let intent = self.orchestrator.begin_mint(req)?;
        Ok(self.spawn_completion(intent, "mint"))
    }

    /// Request a transfer. Returns the intent id immediately.
    pub async fn request_transfer(&self, req: TransferRequest) -> Result<IntentId, SettlementError> {
        let intent = self.orchestrator.begin_transfer(req).await?;
        Ok(self.spawn_completion(intent, "transfer"))
    }

    /// Request a retirement. Returns the intent id immediately.
    pub async fn request_retire(&self, req: RetireRequest) -> Result<IntentId, SettlementError> {
        let intent = self.orchestrator.begin_retire(req).await?;
        Ok(self.spawn_completion(intent, "retire"))
    }

    fn spawn_completion(&self, intent: types::intent::Intent, context: &'static str) -> IntentId {
        let intent_id = intent.intent_id;
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.complete(intent).await {
                SettlementOrchestrator::log_task_error(context, &e);
            }
        });
        intent_id
    }

    /// Current state and ledger reference of an intent.
    pub fn intent_status(&self, intent_id: &IntentId) -> Option<(IntentState, Option<LedgerTxRef>)> {
        self.intents
            .get(intent_id)
            .map(|i| (i.state, i.ledger_tx_ref))
    }

    // ── Wiring ──────────────────────────────────────────────────────

    /// Subscribe to the terminal-outcome event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<OutcomeEvent> {
        self.orchestrator.subscribe()
    }

    pub fn orchestrator(&self) -> &Arc<SettlementOrchestrator> {
        &self.orchestrator
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn intents(&self) -> &Arc<IntentStore> {
        &self.intents
    }
}
