//! Settlement orchestrator
//!
//! Consumes match proposals and direct asset requests, and drives each
//! through intent store and ledger gateway to exactly one durable outcome.
//! Order and lot state changes ONLY on confirmed intents; failures release
//! holds; UNKNOWN leaves holds in place for the reconciler.

use std::sync::{Arc, Mutex as StdMutex};

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use intent_store::{IntentStore, IntentStoreError};
use ledger_gateway::{ConfirmOutcome, GatewayError, LedgerGateway};
use order_book::{OrderBook, TradeProposal};
use types::asset::{AssetLot, CreditStandard, CreditType};
use types::clock;
use types::errors::{IntentError, LotError, OrderError};
use types::events::{order_outcome, OutcomeEvent, OutcomePayload};
use types::ids::{AccountId, IntentId, LedgerTxRef, LotId};
use types::intent::{Intent, IntentPayload};
use types::numeric::{Price, Quantity};
use types::trade::Trade;

use crate::certificate::RetirementCertificate;
use crate::locks::EntityLocks;
use crate::store::{MemoryStore, StoreError};

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Lot(#[from] LotError),

    #[error("intent store error: {0}")]
    IntentStore(#[from] IntentStoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Terminal result of driving one intent.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    /// Ledger confirmed; local state applied.
    Settled { intent_id: IntentId },
    /// Ledger rejected or submission failed; holds released.
    Failed { intent_id: IntentId, reason: String },
    /// Confirmation polling exhausted; holds kept; reconciler will resolve.
    Unknown { intent_id: IntentId },
    /// No intent was created (entity busy); holds returned to the book.
    Skipped { reason: String },
}

/// Direct mint request: credits enter circulation from a verified project.
#[derive(Debug, Clone)]
pub struct MintRequest {
    pub account_id: AccountId,
    pub credit_type: CreditType,
    pub vintage: u16,
    pub standard: CreditStandard,
    pub amount: Quantity,
    pub price: Price,
}

/// Direct transfer of credits between accounts, outside the order book.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub lot_id: LotId,
    pub from_account: AccountId,
    pub to_account: AccountId,
    pub amount: Quantity,
}

/// Retire credits permanently, producing a certificate.
#[derive(Debug, Clone)]
pub struct RetireRequest {
    pub lot_id: LotId,
    pub account_id: AccountId,
    pub amount: Quantity,
}

/// Drives ledger-bound work to terminal outcomes.
pub struct SettlementOrchestrator {
    store: Arc<MemoryStore>,
    intents: Arc<IntentStore>,
    gateway: Arc<LedgerGateway>,
    book: Arc<StdMutex<OrderBook>>,
    locks: EntityLocks,
    events: broadcast::Sender<OutcomeEvent>,
}

impl SettlementOrchestrator {
    pub fn new(
        store: Arc<MemoryStore>,
        intents: Arc<IntentStore>,
        gateway: Arc<LedgerGateway>,
        book: Arc<StdMutex<OrderBook>>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            intents,
            gateway,
            book,
            locks: EntityLocks::new(),
            events,
        }
    }

    /// Subscribe to the terminal-outcome event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<OutcomeEvent> {
        self.events.subscribe()
    }

    // ── Trade settlement ────────────────────────────────────────────

    /// Settle one match proposal end to end.
    ///
    /// Entity locks for both orders and the sell lot are taken in ascending
    /// id order and held from intent creation through terminal resolution or
    /// rollback.
    pub async fn settle_trade(
        &self,
        proposal: TradeProposal,
    ) -> Result<SettlementOutcome, SettlementError> {
        let _guards = self
            .locks
            .acquire_all(vec![
                *proposal.buy_order_id.as_uuid(),
                *proposal.sell_order_id.as_uuid(),
                *proposal.lot_id.as_uuid(),
            ])
            .await;

        let now = clock::now_nanos();
        let mut trade = Trade::new(
            proposal.buy_order_id,
            proposal.sell_order_id,
            proposal.buyer_account_id,
            proposal.seller_account_id,
            proposal.lot_id,
            proposal.amount,
            proposal.clearing_price,
            now,
        );
        let intent = Intent::new(
            IntentPayload::RecordTrade {
                trade_id: trade.trade_id,
                buy_order_id: proposal.buy_order_id,
                sell_order_id: proposal.sell_order_id,
                buyer_account_id: proposal.buyer_account_id,
                seller_account_id: proposal.seller_account_id,
                lot_id: proposal.lot_id,
                amount: proposal.amount,
                clearing_price: proposal.clearing_price,
            },
            now,
        );
        trade.settlement_intent_id = Some(intent.intent_id);
        self.store.insert_trade(trade.clone());

        // Intent-before-action: the durable write precedes any network call.
        match self.intents.create(intent.clone()) {
            Ok(()) => {}
            Err(IntentStoreError::Intent(IntentError::EntityBusy {
                entity_id,
                intent_id,
            })) => {
                // A prior settlement on one of these entities has not
                // reached a terminal state (UNKNOWN, most likely). Give the
                // proposed quantity back; a fresh match can form once the
                // reconciler resolves it.
                self.release_proposal_holds(&proposal);
                let _ = self.store.fail_trade(&trade.trade_id, clock::now_nanos());
                info!(%entity_id, %intent_id, "trade proposal skipped, entity busy");
                return Ok(SettlementOutcome::Skipped {
                    reason: format!("entity {entity_id} busy with intent {intent_id}"),
                });
            }
            Err(e) => {
                self.release_proposal_holds(&proposal);
                let _ = self.store.fail_trade(&trade.trade_id, clock::now_nanos());
                return Err(e.into());
            }
        }

        self.drive(intent).await
    }

    // ── Direct asset operations ─────────────────────────────────────

    /// Validate a mint request and record its intent durably.
    pub fn begin_mint(&self, req: MintRequest) -> Result<Intent, SettlementError> {
        if !req.amount.is_positive() {
            return Err(SettlementError::InvalidRequest(
                "mint amount must be positive".to_string(),
            ));
        }
        if !req.price.is_positive() {
            return Err(SettlementError::InvalidRequest(
                "mint price must be positive".to_string(),
            ));
        }
        let intent = Intent::new(
            IntentPayload::Mint {
                account_id: req.account_id,
                credit_type: req.credit_type,
                vintage: req.vintage,
                standard: req.standard,
                amount: req.amount,
                price: req.price,
            },
            clock::now_nanos(),
        );
        self.intents.create(intent.clone())?;
        Ok(intent)
    }

    /// Validate a transfer request, reserve the lot amount, and record the
    /// intent durably.
    pub async fn begin_transfer(&self, req: TransferRequest) -> Result<Intent, SettlementError> {
        if !req.amount.is_positive() {
            return Err(SettlementError::InvalidRequest(
                "transfer amount must be positive".to_string(),
            ));
        }
        if req.from_account == req.to_account {
            return Err(SettlementError::InvalidRequest(
                "transfer source and destination accounts are the same".to_string(),
            ));
        }
        let _guard = self.locks.acquire(*req.lot_id.as_uuid()).await;

        let lot = self
            .store
            .lot(&req.lot_id)
            .ok_or(LotError::NotFound { lot_id: req.lot_id })?;
        if lot.owner != req.from_account {
            return Err(LotError::OwnershipMismatch {
                lot_id: req.lot_id,
                account_id: req.from_account,
            }
            .into());
        }
        self.store.hold_lot(&req.lot_id, req.amount)?;

        let intent = Intent::new(
            IntentPayload::Transfer {
                lot_id: req.lot_id,
                from_account: req.from_account,
                to_account: req.to_account,
                amount: req.amount,
            },
            clock::now_nanos(),
        );
        if let Err(e) = self.intents.create(intent.clone()) {
            self.store.release_lot_hold(&req.lot_id, req.amount);
            return Err(e.into());
        }
        Ok(intent)
    }

    /// Validate a retire request, reserve the lot amount, and record the
    /// intent durably.
    pub async fn begin_retire(&self, req: RetireRequest) -> Result<Intent, SettlementError> {
        if !req.amount.is_positive() {
            return Err(SettlementError::InvalidRequest(
                "retire amount must be positive".to_string(),
            ));
        }
        let _guard = self.locks.acquire(*req.lot_id.as_uuid()).await;

        let lot = self
            .store
            .lot(&req.lot_id)
            .ok_or(LotError::NotFound { lot_id: req.lot_id })?;
        if lot.owner != req.account_id {
            return Err(LotError::OwnershipMismatch {
                lot_id: req.lot_id,
                account_id: req.account_id,
            }
            .into());
        }
        self.store.hold_lot(&req.lot_id, req.amount)?;

        let intent = Intent::new(
            IntentPayload::Retire {
                lot_id: req.lot_id,
                account_id: req.account_id,
                amount: req.amount,
            },
            clock::now_nanos(),
        );
        if let Err(e) = self.intents.create(intent.clone()) {
            self.store.release_lot_hold(&req.lot_id, req.amount);
            return Err(e.into());
        }
        Ok(intent)
    }

    /// Drive a previously recorded intent to a terminal outcome, holding its
    /// entity locks throughout.
    pub async fn complete(&self, intent: Intent) -> Result<SettlementOutcome, SettlementError> {
        let _guards = self.locks.acquire_all(intent.payload.entity_ids()).await;
        self.drive(intent).await
    }

    /// Convenience: begin + complete a mint in one call.
    pub async fn mint(&self, req: MintRequest) -> Result<SettlementOutcome, SettlementError> {
        let intent = self.begin_mint(req)?;
        self.complete(intent).await
    }

    /// Convenience: begin + complete a transfer in one call.
    pub async fn transfer(
        &self,
        req: TransferRequest,
    ) -> Result<SettlementOutcome, SettlementError> {
        let intent = self.begin_transfer(req).await?;
        self.complete(intent).await
    }

    /// Convenience: begin + complete a retirement in one call.
    pub async fn retire(&self, req: RetireRequest) -> Result<SettlementOutcome, SettlementError> {
        let intent = self.begin_retire(req).await?;
        self.complete(intent).await
    }

    // ── Out-of-band resolution (reconciler) ─────────────────────────

    /// Apply a finalized ledger outcome the live settlement path missed.
    pub async fn resolve_out_of_band(
        &self,
        intent_id: IntentId,
        success: bool,
    ) -> Result<(), SettlementError> {
        let intent = self
            .intents
            .get(&intent_id)
            .ok_or(IntentStoreError::Intent(IntentError::NotFound { intent_id }))?;
        let _guards = self.locks.acquire_all(intent.payload.entity_ids()).await;

        // Re-read under the locks; the live path may have won the race.
        let Some(current) = self.intents.get(&intent_id) else {
            return Ok(());
        };
        if current.is_terminal() {
            return Ok(());
        }

        let now = clock::now_nanos();
        if success {
            let updated = self.intents.mark_confirmed(intent_id, now)?;
            self.apply_confirmed_effects(&updated)?;
            info!(%intent_id, "reconciler applied confirmed ledger outcome");
        } else {
            let updated = self.intents.mark_failed(intent_id, now)?;
            self.rollback(&updated, "ledger finalized failure during reconciliation")?;
            info!(%intent_id, "reconciler applied failed ledger outcome");
        }
        Ok(())
    }

    /// Adopt a submission discovered on the ledger for an intent whose
    /// recorded state never left PENDING (crash before the ack landed).
    pub fn note_submitted(
        &self,
        intent_id: IntentId,
        tx_ref: LedgerTxRef,
    ) -> Result<(), SettlementError> {
        self.intents
            .mark_submitted(intent_id, tx_ref, clock::now_nanos())?;
        Ok(())
    }

    /// Give up on an intent the ledger has no record of: mark it FAILED,
    /// release held amounts, and notify operators. Conservative by design —
    /// capital returns to the book rather than staying locked forever.
    pub async fn abandon(&self, intent_id: IntentId) -> Result<(), SettlementError> {
        let intent = self
            .intents
            .get(&intent_id)
            .ok_or(IntentStoreError::Intent(IntentError::NotFound { intent_id }))?;
        let _guards = self.locks.acquire_all(intent.payload.entity_ids()).await;

        let Some(current) = self.intents.get(&intent_id) else {
            return Ok(());
        };
        if current.is_terminal() {
            return Ok(());
        }

        let now = clock::now_nanos();
        let updated = self.intents.mark_failed(intent_id, now)?;
        self.rollback(&updated, "no ledger record after grace period")?;
        self.emit(OutcomePayload::IntentAbandoned {
            intent_id,
            idle_nanos: current.idle_nanos(now),
        });
        warn!(%intent_id, "intent abandoned after grace period, holds released");
        Ok(())
    }

    // ── Core driver ─────────────────────────────────────────────────

    /// Submit, poll, and apply one intent. Caller holds the entity locks.
    async fn drive(&self, intent: Intent) -> Result<SettlementOutcome, SettlementError> {
        let intent_id = intent.intent_id;
        self.intents.record_attempt(intent_id, clock::now_nanos())?;

        let tx_ref = match self.gateway.submit(&intent).await {
            Ok(tx_ref) => tx_ref,
            Err(GatewayError::RejectedByLedger { reason }) => {
                return self.fail_before_effects(intent_id, reason);
            }
            Err(e) => {
                // Never acknowledged: the intent id was never accepted, so
                // failing it cannot strand a ledger-side effect. A fresh
                // intent may retry the same logical operation later.
                return self.fail_before_effects(intent_id, e.to_string());
            }
        };
        self.intents
            .mark_submitted(intent_id, tx_ref.clone(), clock::now_nanos())?;
        debug!(%intent_id, %tx_ref, "intent submitted, polling for confirmation");

        match self.gateway.confirm(&tx_ref).await {
            ConfirmOutcome::Confirmed => {
                let updated = self.intents.mark_confirmed(intent_id, clock::now_nanos())?;
                self.apply_confirmed_effects(&updated)?;
                Ok(SettlementOutcome::Settled { intent_id })
            }
            ConfirmOutcome::Failed { reason } => {
                let updated = self.intents.mark_failed(intent_id, clock::now_nanos())?;
                self.rollback(&updated, &reason)?;
                Ok(SettlementOutcome::Failed { intent_id, reason })
            }
            ConfirmOutcome::Unknown => {
                let updated = self.intents.mark_unknown(intent_id, clock::now_nanos())?;
                self.emit(OutcomePayload::IntentUnknown {
                    intent_id,
                    ledger_tx_ref: updated.ledger_tx_ref.clone(),
                });
                warn!(%intent_id, "confirmation exhausted, intent UNKNOWN until reconciled");
                Ok(SettlementOutcome::Unknown { intent_id })
            }
        }
    }

    fn fail_before_effects(
        &self,
        intent_id: IntentId,
        reason: String,
    ) -> Result<SettlementOutcome, SettlementError> {
        let updated = self.intents.mark_failed(intent_id, clock::now_nanos())?;
        self.rollback(&updated, &reason)?;
        Ok(SettlementOutcome::Failed { intent_id, reason })
    }

    /// Apply a CONFIRMED intent's effects to local state.
    ///
    /// For trades this is the one place both orders, both lots, and the
    /// trade record change — atomically from the local store's perspective.
    fn apply_confirmed_effects(&self, intent: &Intent) -> Result<(), SettlementError> {
        let now = clock::now_nanos();
        let tx_ref = intent
            .ledger_tx_ref
            .clone()
            .unwrap_or_else(|| LedgerTxRef::new(intent.intent_id.to_string()));

        match &intent.payload {
            IntentPayload::RecordTrade {
                trade_id,
                buy_order_id,
                sell_order_id,
                buyer_account_id,
                seller_account_id,
                lot_id,
                amount,
                clearing_price,
            } => {
                let (updated_buy, updated_sell) = {
                    let mut book = self.book.lock().expect("book mutex poisoned");
                    let buy = book.commit_fill(buy_order_id, *amount, now)?;
                    let sell = book.commit_fill(sell_order_id, *amount, now)?;
                    (buy, sell)
                };

                // A crash may have landed between intent creation and the
                // trade row write; reconstruct it from the payload.
                if self.store.trade(trade_id).is_none() {
                    let mut trade = Trade::new(
                        *buy_order_id,
                        *sell_order_id,
                        *buyer_account_id,
                        *seller_account_id,
                        *lot_id,
                        *amount,
                        *clearing_price,
                        intent.created_at,
                    );
                    trade.trade_id = *trade_id;
                    trade.settlement_intent_id = Some(intent.intent_id);
                    self.store.insert_trade(trade);
                }

                let (trade, _buyer_lot) = self.store.apply_trade_settlement(
                    trade_id,
                    updated_buy.clone(),
                    updated_sell.clone(),
                    lot_id,
                    buyer_account_id,
                    *amount,
                    *clearing_price,
                    &tx_ref,
                    now,
                )?;

                info!(
                    trade_id = %trade.trade_id,
                    amount = %amount,
                    price = %clearing_price,
                    %tx_ref,
                    "trade settled"
                );
                self.emit(OutcomePayload::TradeSettled {
                    trade_id: *trade_id,
                    buy_order_id: *buy_order_id,
                    sell_order_id: *sell_order_id,
                    amount: *amount,
                    clearing_price: *clearing_price,
                    ledger_tx_ref: tx_ref,
                });
                if let Some(payload) = order_outcome(
                    updated_buy.order_id,
                    updated_buy.account_id,
                    updated_buy.state,
                    updated_buy.remaining,
                ) {
                    self.emit(payload);
                }
                if let Some(payload) = order_outcome(
                    updated_sell.order_id,
                    updated_sell.account_id,
                    updated_sell.state,
                    updated_sell.remaining,
                ) {
                    self.emit(payload);
                }
                Ok(())
            }

            IntentPayload::Mint {
                account_id,
                credit_type,
                vintage,
                standard,
                amount,
                price,
            } => {
                let lot = AssetLot::new(
                    *account_id,
                    credit_type.clone(),
                    *vintage,
                    *standard,
                    *amount,
                    *price,
                    tx_ref.clone(),
                    now,
                );
                let lot_id = lot.lot_id;
                self.store.insert_lot(lot);
                info!(%lot_id, owner = %account_id, %amount, "lot minted");
                self.emit(OutcomePayload::LotMinted {
                    lot_id,
                    owner: *account_id,
                    amount: *amount,
                    ledger_tx_ref: tx_ref,
                });
                Ok(())
            }

            IntentPayload::Transfer {
                lot_id,
                from_account,
                to_account,
                amount,
            } => {
                let (_, target) =
                    self.store
                        .apply_transfer(lot_id, to_account, *amount, &tx_ref, now)?;
                info!(%lot_id, to = %to_account, %amount, "lot transferred");
                self.emit(OutcomePayload::LotTransferred {
                    source_lot_id: *lot_id,
                    target_lot_id: target.lot_id,
                    from_account: *from_account,
                    to_account: *to_account,
                    amount: *amount,
                });
                Ok(())
            }

            IntentPayload::Retire {
                lot_id,
                account_id,
                amount,
            } => {
                self.store.apply_retire(lot_id, *amount, now)?;
                let certificate = RetirementCertificate::issue(
                    *lot_id,
                    *account_id,
                    *amount,
                    now,
                    tx_ref,
                );
                self.store.add_certificate(certificate.clone());
                info!(
                    %lot_id,
                    certificate_id = %certificate.certificate_id,
                    %amount,
                    "credits retired, certificate issued"
                );
                self.emit(OutcomePayload::LotRetired {
                    lot_id: *lot_id,
                    owner: *account_id,
                    amount: *amount,
                });
                self.emit(OutcomePayload::CertificateIssued {
                    certificate_id: certificate.certificate_id,
                    lot_id: *lot_id,
                    owner: *account_id,
                    amount: *amount,
                    content_hash: certificate.content_hash,
                });
                Ok(())
            }
        }
    }

    /// Undo the reservations of a FAILED intent. No balances changed, so
    /// releasing holds restores the exact pre-match state.
    fn rollback(&self, intent: &Intent, reason: &str) -> Result<(), SettlementError> {
        match &intent.payload {
            IntentPayload::RecordTrade {
                trade_id,
                buy_order_id,
                sell_order_id,
                amount,
                ..
            } => {
                {
                    let mut book = self.book.lock().expect("book mutex poisoned");
                    book.release_hold(buy_order_id, *amount);
                    book.release_hold(sell_order_id, *amount);
                }
                if self.store.trade(trade_id).is_some() {
                    self.store.fail_trade(trade_id, clock::now_nanos())?;
                }
                self.emit(OutcomePayload::TradeFailed {
                    trade_id: *trade_id,
                    buy_order_id: *buy_order_id,
                    sell_order_id: *sell_order_id,
                    reason: reason.to_string(),
                });
            }
            IntentPayload::Transfer { lot_id, amount, .. }
            | IntentPayload::Retire { lot_id, amount, .. } => {
                self.store.release_lot_hold(lot_id, *amount);
            }
            IntentPayload::Mint { .. } => {}
        }

        self.emit(OutcomePayload::IntentFailed {
            intent_id: intent.intent_id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn release_proposal_holds(&self, proposal: &TradeProposal) {
        let mut book = self.book.lock().expect("book mutex poisoned");
        book.release_hold(&proposal.buy_order_id, proposal.amount);
        book.release_hold(&proposal.sell_order_id, proposal.amount);
    }

    pub(crate) fn emit(&self, payload: OutcomePayload) {
        let event = OutcomeEvent::new(payload, clock::now_nanos());
        debug!(event = event.event_type_label(), "outcome event");
        // No subscribers is fine; the stream is best-effort fan-out.
        let _ = self.events.send(event);
    }

    /// A settlement task failed on an internal error; surface it loudly.
    pub(crate) fn log_task_error(context: &str, error: &SettlementError) {
        error!(%context, %error, "settlement task error");
    }
}
