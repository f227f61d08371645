//! End-to-end settlement flows against the in-process mock ledger.
//!
//! Exercises the full path: order placement, matching, intent-before-action,
//! submission with retries, confirmation polling, and local application —
//! plus the failure branches that release holds and the ambiguity branch
//! that leaves UNKNOWN for the reconciler.

use std::sync::Arc;

use intent_store::IntentStore;
use ledger_gateway::mock::MockOutcome;
use ledger_gateway::{GatewayConfig, LedgerGateway, MockLedger};
use settlement::{
    MarketService, MemoryStore, MintRequest, PlaceOrder, RetireRequest, SettlementError,
    SettlementOutcome, TransferRequest,
};
use types::asset::{AssetLot, CreditStandard, CreditType};
use types::clock;
use types::errors::{IntentError, OrderError};
use types::events::OutcomePayload;
use types::ids::{AccountId, LedgerTxRef, LotId};
use types::intent::IntentState;
use types::numeric::{Price, Quantity};
use types::order::{OrderFilters, OrderState, Side};
use types::trade::TradeState;

struct Rig {
    service: MarketService,
    ledger: Arc<MockLedger>,
    store: Arc<MemoryStore>,
    intents: Arc<IntentStore>,
}

fn rig() -> Rig {
    rig_with_intents(Arc::new(IntentStore::in_memory()))
}

fn rig_with_intents(intents: Arc<IntentStore>) -> Rig {
    rig_with(Arc::new(MemoryStore::new()), intents, Arc::new(MockLedger::new()))
}

fn rig_with(store: Arc<MemoryStore>, intents: Arc<IntentStore>, ledger: Arc<MockLedger>) -> Rig {
    let gateway = Arc::new(LedgerGateway::new(ledger.clone(), GatewayConfig::default()));
    let service = MarketService::new(store.clone(), intents.clone(), gateway);
    Rig {
        service,
        ledger,
        store,
        intents,
    }
}

fn seed_lot(store: &MemoryStore, owner: AccountId, amount: &str) -> LotId {
    let lot = AssetLot::new(
        owner,
        CreditType::new("forestry"),
        2023,
        CreditStandard::Verra,
        Quantity::from_str(amount).unwrap(),
        Price::from_u64(10),
        LedgerTxRef::new("seed-token"),
        0,
    );
    let id = lot.lot_id;
    store.insert_lot(lot);
    id
}

fn sell(account: AccountId, lot: LotId, amount: u64, price: &str) -> PlaceOrder {
    PlaceOrder {
        account_id: account,
        side: Side::SELL,
        amount: Quantity::from_u64(amount),
        price_per_unit: Price::from_str(price).unwrap(),
        filters: OrderFilters::any(),
        lot_id: Some(lot),
        expires_at: None,
    }
}

fn buy(account: AccountId, amount: u64, price: &str) -> PlaceOrder {
    PlaceOrder {
        account_id: account,
        side: Side::BUY,
        amount: Quantity::from_u64(amount),
        price_per_unit: Price::from_str(price).unwrap(),
        filters: OrderFilters::any(),
        lot_id: None,
        expires_at: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_fill_settlement_conserves_credits() {
    let r = rig();
    let seller = AccountId::new();
    let buyer = AccountId::new();
    let lot = seed_lot(&r.store, seller, "10");
    let credit_type = CreditType::new("forestry");
    let mut events = r.service.subscribe();

    let sell_id = r.service.place_order(sell(seller, lot, 10, "10")).unwrap();
    let buy_id = r.service.place_order(buy(buyer, 10, "10")).unwrap();

    let outcomes = r.service.run_match_cycle().await;
    let intent_id = match &outcomes[..] {
        [SettlementOutcome::Settled { intent_id }] => *intent_id,
        other => panic!("expected one settled outcome, got {other:?}"),
    };

    // Seller lot drained, buyer credited the full amount
    assert_eq!(r.store.lot(&lot).unwrap().amount, Quantity::zero());
    let buyer_lots = r.store.lots_owned_by(&buyer);
    assert_eq!(buyer_lots.len(), 1);
    assert_eq!(buyer_lots[0].amount, Quantity::from_u64(10));
    assert_eq!(buyer_lots[0].credit_type, credit_type);

    // Conservation: total supply of the credit type is unchanged
    assert_eq!(r.store.total_amount(&credit_type), Quantity::from_u64(10));

    // Both orders FILLED with zero remaining
    assert_eq!(
        r.service.order_status(&sell_id).unwrap(),
        (OrderState::Filled, Quantity::zero())
    );
    assert_eq!(
        r.service.order_status(&buy_id).unwrap(),
        (OrderState::Filled, Quantity::zero())
    );

    // One settled trade, linked to its intent
    let (state, tx_ref) = r.service.intent_status(&intent_id).unwrap();
    assert_eq!(state, IntentState::Confirmed);
    assert!(tx_ref.is_some());

    // Terminal outcomes reported on the stream
    let mut saw_trade_settled = false;
    let mut filled_orders = 0;
    while let Ok(event) = events.try_recv() {
        match event.payload {
            OutcomePayload::TradeSettled { amount, .. } => {
                saw_trade_settled = true;
                assert_eq!(amount, Quantity::from_u64(10));
            }
            OutcomePayload::OrderFilled { .. } => filled_orders += 1,
            _ => {}
        }
    }
    assert!(saw_trade_settled);
    assert_eq!(filled_orders, 2);
}

#[tokio::test(start_paused = true)]
async fn test_buy_sweeps_two_sells_price_time_priority() {
    // BUY 100 @ 10 against resting SELLs 60 @ 9 (earlier) and 50 @ 9.5:
    // trades 60 @ 9 then 40 @ 9.5; first sell FILLED, second PARTIALLY_FILLED
    // with remaining 10, buy FILLED.
    let r = rig();
    let seller_a = AccountId::new();
    let seller_b = AccountId::new();
    let buyer = AccountId::new();
    let lot_a = seed_lot(&r.store, seller_a, "60");
    let lot_b = seed_lot(&r.store, seller_b, "50");

    let sell_a = r.service.place_order(sell(seller_a, lot_a, 60, "9")).unwrap();
    let sell_b = r.service.place_order(sell(seller_b, lot_b, 50, "9.5")).unwrap();
    let buy_id = r.service.place_order(buy(buyer, 100, "10")).unwrap();

    let outcomes = r.service.run_match_cycle().await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, SettlementOutcome::Settled { .. })));

    assert_eq!(
        r.service.order_status(&buy_id).unwrap(),
        (OrderState::Filled, Quantity::zero())
    );
    assert_eq!(
        r.service.order_status(&sell_a).unwrap(),
        (OrderState::Filled, Quantity::zero())
    );
    assert_eq!(
        r.service.order_status(&sell_b).unwrap(),
        (OrderState::PartiallyFilled, Quantity::from_u64(10))
    );

    // Buyer holds 100 across merged lots; sellers keep the remainder
    let buyer_total = r
        .store
        .lots_owned_by(&buyer)
        .into_iter()
        .fold(Quantity::zero(), |acc, l| acc + l.amount);
    assert_eq!(buyer_total, Quantity::from_u64(100));
    assert_eq!(r.store.lot(&lot_a).unwrap().amount, Quantity::zero());
    assert_eq!(r.store.lot(&lot_b).unwrap().amount, Quantity::from_u64(10));

    // Clearing prices follow the resting sells
    let mut clearing_prices: Vec<Price> = outcomes
        .iter()
        .filter_map(|o| match o {
            SettlementOutcome::Settled { intent_id } => r.intents.get(intent_id),
            _ => None,
        })
        .filter_map(|intent| match intent.payload {
            types::intent::IntentPayload::RecordTrade { clearing_price, amount, .. } => {
                Some((clearing_price, amount))
            }
            _ => None,
        })
        .map(|(price, amount)| {
            if amount == Quantity::from_u64(60) {
                assert_eq!(price, Price::from_u64(9));
            } else {
                assert_eq!(amount, Quantity::from_u64(40));
                assert_eq!(price, Price::from_str("9.5").unwrap());
            }
            price
        })
        .collect();
    clearing_prices.sort();
    assert_eq!(clearing_prices.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_settlement_restores_both_orders() {
    let r = rig();
    let seller = AccountId::new();
    let buyer = AccountId::new();
    let lot = seed_lot(&r.store, seller, "10");

    let sell_id = r.service.place_order(sell(seller, lot, 10, "9")).unwrap();
    let buy_id = r.service.place_order(buy(buyer, 10, "10")).unwrap();

    r.ledger.reject_next("vintage not eligible");
    let outcomes = r.service.run_match_cycle().await;
    let reason = match &outcomes[..] {
        [SettlementOutcome::Failed { reason, .. }] => reason.clone(),
        other => panic!("expected failed outcome, got {other:?}"),
    };
    assert!(reason.contains("vintage not eligible"));

    // Pre-match state restored: full remaining, no balance movement
    assert_eq!(
        r.service.order_status(&sell_id).unwrap(),
        (OrderState::Open, Quantity::from_u64(10))
    );
    assert_eq!(
        r.service.order_status(&buy_id).unwrap(),
        (OrderState::Open, Quantity::from_u64(10))
    );
    assert_eq!(r.store.lot(&lot).unwrap().amount, Quantity::from_u64(10));
    assert_eq!(r.store.lots_owned_by(&buyer).len(), 0);

    // Eligible for matching again on the next cycle
    let outcomes = r.service.run_match_cycle().await;
    assert!(matches!(&outcomes[..], [SettlementOutcome::Settled { .. }]));
    assert_eq!(r.store.lots_owned_by(&buyer).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_with_single_ledger_effect() {
    let r = rig();
    let seller = AccountId::new();
    let buyer = AccountId::new();
    let lot = seed_lot(&r.store, seller, "5");

    r.service.place_order(sell(seller, lot, 5, "9")).unwrap();
    r.service.place_order(buy(buyer, 5, "9")).unwrap();

    // Two connection failures before the ledger accepts
    r.ledger.fail_submissions(2);
    let outcomes = r.service.run_match_cycle().await;
    assert!(matches!(&outcomes[..], [SettlementOutcome::Settled { .. }]));

    // Idempotence law: retries never produce a second ledger-visible effect
    assert_eq!(r.ledger.effects(), 1);
    assert_eq!(r.ledger.submit_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_submission_fails_conservatively() {
    let r = rig();
    let seller = AccountId::new();
    let buyer = AccountId::new();
    let lot = seed_lot(&r.store, seller, "5");

    let sell_id = r.service.place_order(sell(seller, lot, 5, "9")).unwrap();
    r.service.place_order(buy(buyer, 5, "9")).unwrap();

    r.ledger.fail_submissions(100);
    let outcomes = r.service.run_match_cycle().await;
    let intent_id = match &outcomes[..] {
        [SettlementOutcome::Failed { intent_id, .. }] => *intent_id,
        other => panic!("expected failed outcome, got {other:?}"),
    };

    assert_eq!(
        r.service.intent_status(&intent_id).unwrap().0,
        IntentState::Failed
    );
    assert_eq!(r.ledger.effects(), 0, "nothing landed on the ledger");
    assert_eq!(
        r.service.order_status(&sell_id).unwrap(),
        (OrderState::Open, Quantity::from_u64(5))
    );
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_timeout_leaves_unknown_and_holds() {
    let r = rig();
    let seller = AccountId::new();
    let buyer = AccountId::new();
    let lot = seed_lot(&r.store, seller, "10");
    let credit_type = CreditType::new("forestry");

    r.service.place_order(sell(seller, lot, 10, "9")).unwrap();
    r.service.place_order(buy(buyer, 10, "10")).unwrap();

    r.ledger.set_outcome(MockOutcome::NeverFinalize);
    let outcomes = r.service.run_match_cycle().await;
    let intent_id = match &outcomes[..] {
        [SettlementOutcome::Unknown { intent_id }] => *intent_id,
        other => panic!("expected unknown outcome, got {other:?}"),
    };

    // UNKNOWN is neither success nor failure: no balances moved, and the
    // matched quantity stays excluded from fresh matching.
    assert_eq!(
        r.service.intent_status(&intent_id).unwrap().0,
        IntentState::Unknown
    );
    assert_eq!(r.store.lot(&lot).unwrap().amount, Quantity::from_u64(10));
    assert_eq!(r.store.total_amount(&credit_type), Quantity::from_u64(10));
    assert!(r.service.run_match_cycle().await.is_empty());

    // And it stays UNKNOWN; the settlement path never auto-resolves it
    assert_eq!(
        r.service.intent_status(&intent_id).unwrap().0,
        IntentState::Unknown
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_semantics() {
    let r = rig();
    let owner = AccountId::new();
    let other = AccountId::new();
    let lot = seed_lot(&r.store, owner, "10");

    let sell_id = r.service.place_order(sell(owner, lot, 10, "9")).unwrap();

    // Foreign account cannot cancel
    assert!(matches!(
        r.service.cancel_order(&sell_id, &other),
        Err(OrderError::Forbidden { .. })
    ));

    // Owner cancels; the lot reservation is released
    let cancelled = r.service.cancel_order(&sell_id, &owner).unwrap();
    assert_eq!(cancelled.state, OrderState::Cancelled);
    assert_eq!(r.store.held_for_lot(&lot), Quantity::zero());

    // A cancelled order never matches afterwards
    r.service.place_order(buy(other, 10, "10")).unwrap();
    assert!(r.service.run_match_cycle().await.is_empty());

    // Cancelling again reports the terminal state
    assert!(matches!(
        r.service.cancel_order(&sell_id, &owner),
        Err(OrderError::AlreadyTerminal { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_filled_order_is_already_terminal() {
    let r = rig();
    let seller = AccountId::new();
    let buyer = AccountId::new();
    let lot = seed_lot(&r.store, seller, "5");

    let sell_id = r.service.place_order(sell(seller, lot, 5, "9")).unwrap();
    r.service.place_order(buy(buyer, 5, "9")).unwrap();
    let outcomes = r.service.run_match_cycle().await;
    assert!(matches!(&outcomes[..], [SettlementOutcome::Settled { .. }]));

    assert!(matches!(
        r.service.cancel_order(&sell_id, &seller),
        Err(OrderError::AlreadyTerminal {
            state: OrderState::Filled,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_mint_transfer_retire_flow() {
    let r = rig();
    let producer = AccountId::new();
    let recipient = AccountId::new();
    let credit_type = CreditType::new("solar");
    let mut events = r.service.subscribe();

    // Mint
    let outcome = r
        .service
        .orchestrator()
        .mint(MintRequest {
            account_id: producer,
            credit_type: credit_type.clone(),
            vintage: 2024,
            standard: CreditStandard::GoldStandard,
            amount: Quantity::from_u64(100),
            price: Price::from_u64(15),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, SettlementOutcome::Settled { .. }));

    let minted = r.store.lots_owned_by(&producer);
    assert_eq!(minted.len(), 1);
    let lot_id = minted[0].lot_id;
    assert_eq!(minted[0].amount, Quantity::from_u64(100));
    assert_eq!(r.store.total_amount(&credit_type), Quantity::from_u64(100));

    // Transfer 40 to the recipient
    let outcome = r
        .service
        .orchestrator()
        .transfer(TransferRequest {
            lot_id,
            from_account: producer,
            to_account: recipient,
            amount: Quantity::from_u64(40),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, SettlementOutcome::Settled { .. }));

    assert_eq!(r.store.lot(&lot_id).unwrap().amount, Quantity::from_u64(60));
    let received = r.store.lots_owned_by(&recipient);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].amount, Quantity::from_u64(40));
    assert_eq!(r.store.total_amount(&credit_type), Quantity::from_u64(100));

    // Retire the recipient's credits; a verifiable certificate is issued
    let outcome = r
        .service
        .orchestrator()
        .retire(RetireRequest {
            lot_id: received[0].lot_id,
            account_id: recipient,
            amount: Quantity::from_u64(40),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, SettlementOutcome::Settled { .. }));

    assert_eq!(
        r.store.lot(&received[0].lot_id).unwrap().amount,
        Quantity::zero()
    );
    assert_eq!(r.store.total_amount(&credit_type), Quantity::from_u64(60));

    let certificates = r.store.certificates_for(&recipient);
    assert_eq!(certificates.len(), 1);
    assert!(certificates[0].verify());
    assert_eq!(certificates[0].amount, Quantity::from_u64(40));

    let mut labels = Vec::new();
    while let Ok(event) = events.try_recv() {
        labels.push(event.event_type_label());
    }
    for expected in ["LotMinted", "LotTransferred", "LotRetired", "CertificateIssued"] {
        assert!(labels.contains(&expected), "missing event {expected}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_one_non_terminal_intent_per_lot() {
    let r = rig();
    let owner = AccountId::new();
    let lot = seed_lot(&r.store, owner, "10");

    // First retirement hangs in UNKNOWN and keeps the lot entity busy
    r.ledger.set_outcome(MockOutcome::NeverFinalize);
    let outcome = r
        .service
        .orchestrator()
        .retire(RetireRequest {
            lot_id: lot,
            account_id: owner,
            amount: Quantity::from_u64(4),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, SettlementOutcome::Unknown { .. }));
    assert_eq!(r.store.held_for_lot(&lot), Quantity::from_u64(4));

    // A second operation on the same lot is refused outright
    let err = r
        .service
        .orchestrator()
        .retire(RetireRequest {
            lot_id: lot,
            account_id: owner,
            amount: Quantity::from_u64(4),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SettlementError::IntentStore(intent_store::IntentStoreError::Intent(
            IntentError::EntityBusy { .. }
        ))
    ));

    // The refused attempt released its own reservation; the first one stays
    assert_eq!(r.store.held_for_lot(&lot), Quantity::from_u64(4));
}

#[tokio::test(start_paused = true)]
async fn test_expiry_releases_reservation() {
    let r = rig();
    let owner = AccountId::new();
    let lot = seed_lot(&r.store, owner, "10");

    let mut cmd = sell(owner, lot, 10, "9");
    cmd.expires_at = Some(clock::now_nanos() - 1);
    let order_id = r.service.place_order(cmd).unwrap();
    assert_eq!(r.store.held_for_lot(&lot), Quantity::from_u64(10));

    let expired = r.service.expire_orders();
    assert_eq!(expired.len(), 1);
    assert_eq!(
        r.service.order_status(&order_id).unwrap().0,
        OrderState::Expired
    );
    assert_eq!(r.store.held_for_lot(&lot), Quantity::zero());

    // Expired orders never resume matching
    r.service.place_order(buy(AccountId::new(), 10, "10")).unwrap();
    assert!(r.service.run_match_cycle().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restart_recovers_in_flight_settlement() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("intents.journal");

    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(MockLedger::new());
    let seller = AccountId::new();
    let buyer = AccountId::new();
    let lot = seed_lot(&store, seller, "10");

    let (sell_id, buy_id, intent_id) = {
        let intents = Arc::new(IntentStore::open(&journal_path).unwrap());
        let r = rig_with(store.clone(), intents, ledger.clone());

        let sell_id = r.service.place_order(sell(seller, lot, 10, "9")).unwrap();
        let buy_id = r.service.place_order(buy(buyer, 10, "10")).unwrap();

        r.ledger.set_outcome(MockOutcome::NeverFinalize);
        let outcomes = r.service.run_match_cycle().await;
        let intent_id = match &outcomes[..] {
            [SettlementOutcome::Unknown { intent_id }] => *intent_id,
            other => panic!("expected unknown outcome, got {other:?}"),
        };
        (sell_id, buy_id, intent_id)
    };

    // "Restart": replay the journal and rebuild the book and reservations
    let intents = Arc::new(IntentStore::open(&journal_path).unwrap());
    let r = rig_with(store, intents, ledger);

    let recovered = r.intents.get(&intent_id).unwrap();
    assert_eq!(recovered.state, IntentState::Unknown);

    // In-flight quantity is still excluded from matching after the restart
    assert!(r.service.run_match_cycle().await.is_empty());
    assert_eq!(r.store.held_for_lot(&lot), Quantity::from_u64(10));

    // The ledger finalized while we were down; resolve out-of-band as the
    // reconciler would
    r.ledger.resolve(intent_id, true);
    r.service
        .orchestrator()
        .resolve_out_of_band(intent_id, true)
        .await
        .unwrap();

    assert_eq!(
        r.service.order_status(&sell_id).unwrap(),
        (OrderState::Filled, Quantity::zero())
    );
    assert_eq!(
        r.service.order_status(&buy_id).unwrap(),
        (OrderState::Filled, Quantity::zero())
    );
    assert_eq!(r.store.lot(&lot).unwrap().amount, Quantity::zero());
    let buyer_lots = r.store.lots_owned_by(&buyer);
    assert_eq!(buyer_lots.len(), 1);
    assert_eq!(buyer_lots[0].amount, Quantity::from_u64(10));

    let trade_id = match r.intents.get(&intent_id).unwrap().payload {
        types::intent::IntentPayload::RecordTrade { trade_id, .. } => trade_id,
        _ => panic!("expected RecordTrade payload"),
    };
    assert_eq!(r.store.trade(&trade_id).unwrap().state, TradeState::SETTLED);
}

#[tokio::test(start_paused = true)]
async fn test_async_request_surface_resolves_via_status() {
    let r = rig();
    let producer = AccountId::new();

    let intent_id = r
        .service
        .request_mint(MintRequest {
            account_id: producer,
            credit_type: CreditType::new("wind"),
            vintage: 2025,
            standard: CreditStandard::Verra,
            amount: Quantity::from_u64(10),
            price: Price::from_u64(8),
        })
        .unwrap();

    // The request returned immediately; completion happens in the background
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if let Some((IntentState::Confirmed, _)) = r.service.intent_status(&intent_id) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "mint did not confirm in time"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(r.store.lots_owned_by(&producer).len(), 1);
}
