use std::sync::Arc;

use chrono::Duration;
use common::decimal::dec;
use common::error::Error;
use common::model::actor::Actor;
use common::model::dispute::{DisputeOutcome, DisputeStatus, TradeAction, DISPUTE_WINDOW_HOURS};
use common::model::offer::OfferLimits;
use common::model::trade::{Trade, TradeStatus};
use common::model::LEDGER_ASSET;
use dispute_service::{DisputeService, InMemoryDisputeRepository};
use ledger_service::LedgerService;
use offer_service::OfferService;
use trade_service::{InMemoryTradeRepository, TradeService};
use uuid::Uuid;

struct Stack {
    ledger: Arc<LedgerService>,
    offers: Arc<OfferService>,
    trades: Arc<TradeService>,
    // Kept so tests can backdate paid_at and poke at stored state
    trade_repo: Arc<InMemoryTradeRepository>,
    dispute_repo: Arc<InMemoryDisputeRepository>,
    disputes: DisputeService,
}

fn setup() -> Stack {
    let ledger = Arc::new(LedgerService::new());
    let offers = Arc::new(OfferService::in_memory(ledger.clone()));
    let trade_repo = Arc::new(InMemoryTradeRepository::new());
    let trades = Arc::new(TradeService::new(
        trade_repo.clone(),
        offers.clone(),
        ledger.clone(),
    ));
    let dispute_repo = Arc::new(InMemoryDisputeRepository::new());
    let disputes = DisputeService::new(dispute_repo.clone(), trades.clone());
    Stack {
        ledger,
        offers,
        trades,
        trade_repo,
        dispute_repo,
        disputes,
    }
}

// Alice (100) sells 20 to Bob (200), who has marked the fiat leg paid
async fn paid_trade(stack: &Stack) -> Trade {
    let alice = Actor::new(100);
    let bob = Actor::new(200);

    stack.ledger.fund(alice.id, dec!(60), None).await.unwrap();
    let offer = stack
        .offers
        .create_offer(
            alice,
            "SELL",
            LEDGER_ASSET,
            "USD",
            dec!(10),
            dec!(50),
            OfferLimits::none(),
        )
        .await
        .unwrap();

    let trade = stack
        .trades
        .accept_offer(bob, offer.id, dec!(20))
        .await
        .unwrap();
    stack.trades.mark_paid(bob, trade.id, None).await.unwrap()
}

// Shift a trade's paid_at into the past, as if time elapsed
fn backdate_paid_at(stack: &Stack, trade_id: Uuid, hours: i64) {
    let mut trade = stack
        .trade_repo
        .trades
        .get_mut(&trade_id)
        .expect("trade exists");
    trade.paid_at = trade.paid_at.map(|t| t - Duration::hours(hours));
}

#[tokio::test]
async fn test_open_dispute_freezes_trade() {
    let stack = setup();
    let trade = paid_trade(&stack).await;
    let bob = Actor::new(200);

    let dispute = stack
        .disputes
        .open_dispute(bob, trade.id, "asset never released".to_string())
        .await
        .unwrap();

    assert_eq!(dispute.status, DisputeStatus::Open);
    assert_eq!(dispute.trade_id, trade.id);
    assert_eq!(dispute.raised_by_id, 200);

    let trade = stack.trades.get_trade(trade.id).await.unwrap();
    assert_eq!(trade.status, TradeStatus::Disputed);

    assert_eq!(stack.disputes.open_disputes().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_open_dispute_party_only() {
    let stack = setup();
    let trade = paid_trade(&stack).await;
    let mallory = Actor::new(666);

    let err = stack
        .disputes
        .open_dispute(mallory, trade.id, "not my trade".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
}

#[tokio::test]
async fn test_open_dispute_requires_paid_trade() {
    let stack = setup();
    let alice = Actor::new(100);
    let bob = Actor::new(200);

    stack.ledger.fund(alice.id, dec!(60), None).await.unwrap();
    let offer = stack
        .offers
        .create_offer(
            alice,
            "SELL",
            LEDGER_ASSET,
            "USD",
            dec!(10),
            dec!(50),
            OfferLimits::none(),
        )
        .await
        .unwrap();
    let trade = stack
        .trades
        .accept_offer(bob, offer.id, dec!(20))
        .await
        .unwrap();

    // Still Pending, payment was never marked
    let err = stack
        .disputes
        .open_dispute(bob, trade.id, "too early".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
async fn test_one_dispute_per_trade() {
    let stack = setup();
    let trade = paid_trade(&stack).await;
    let alice = Actor::new(100);
    let bob = Actor::new(200);

    stack
        .disputes
        .open_dispute(bob, trade.id, "first".to_string())
        .await
        .unwrap();

    let err = stack
        .disputes
        .open_dispute(alice, trade.id, "second".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn test_buyer_dispute_window_expires() {
    let stack = setup();
    let trade = paid_trade(&stack).await;
    let bob = Actor::new(200);

    backdate_paid_at(&stack, trade.id, DISPUTE_WINDOW_HOURS + 1);

    let err = stack
        .disputes
        .open_dispute(bob, trade.id, "too late".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WindowExpired(_)));

    // The trade was not frozen
    let trade = stack.trades.get_trade(trade.id).await.unwrap();
    assert_eq!(trade.status, TradeStatus::PaidPendingRelease);
}

#[tokio::test]
async fn test_seller_dispute_not_bound_by_window() {
    let stack = setup();
    let trade = paid_trade(&stack).await;
    let alice = Actor::new(100);

    backdate_paid_at(&stack, trade.id, DISPUTE_WINDOW_HOURS + 10);

    // The window only applies to the buyer
    let dispute = stack
        .disputes
        .open_dispute(alice, trade.id, "payment never arrived".to_string())
        .await
        .unwrap();
    assert_eq!(dispute.status, DisputeStatus::Open);
}

#[tokio::test]
async fn test_resolve_requires_admin() {
    let stack = setup();
    let trade = paid_trade(&stack).await;
    let bob = Actor::new(200);

    let dispute = stack
        .disputes
        .open_dispute(bob, trade.id, "stuck".to_string())
        .await
        .unwrap();

    let err = stack
        .disputes
        .resolve_dispute(bob, dispute.id, DisputeOutcome::Resolved, None, TradeAction::Release)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
}

#[tokio::test]
async fn test_resolve_with_release_completes_trade() {
    let stack = setup();
    let admin = Actor::new_admin(1);
    stack.ledger.set_fee_rate(admin, dec!(2)).await.unwrap();

    let trade = paid_trade(&stack).await;
    let bob = Actor::new(200);

    let dispute = stack
        .disputes
        .open_dispute(bob, trade.id, "seller unresponsive".to_string())
        .await
        .unwrap();

    let dispute = stack
        .disputes
        .resolve_dispute(
            admin,
            dispute.id,
            DisputeOutcome::Resolved,
            Some("payment evidence checked out".to_string()),
            TradeAction::Release,
        )
        .await
        .unwrap();

    assert_eq!(dispute.status, DisputeStatus::Resolved);
    assert_eq!(dispute.resolved_by_id, Some(1));
    assert!(dispute.resolved_at.is_some());
    assert_eq!(
        dispute.resolution_note.as_deref(),
        Some("payment evidence checked out")
    );

    let trade = stack.trades.get_trade(trade.id).await.unwrap();
    assert_eq!(trade.status, TradeStatus::Completed);

    // Bob got 20 minus the 2% fee
    assert_eq!(stack.ledger.balance(200).await.unwrap().available, dec!(19.6));
}

#[tokio::test]
async fn test_resolve_with_cancel_refunds_seller() {
    let stack = setup();
    let admin = Actor::new_admin(1);
    let trade = paid_trade(&stack).await;
    let alice = Actor::new(100);

    let dispute = stack
        .disputes
        .open_dispute(alice, trade.id, "no payment received".to_string())
        .await
        .unwrap();

    stack
        .disputes
        .resolve_dispute(
            admin,
            dispute.id,
            DisputeOutcome::Rejected,
            Some("no evidence of payment".to_string()),
            TradeAction::Cancel,
        )
        .await
        .unwrap();

    let trade = stack.trades.get_trade(trade.id).await.unwrap();
    assert_eq!(trade.status, TradeStatus::Cancelled);

    // Alice's escrowed 20 returned to available (10 free + 20 refunded)
    let alice_balance = stack.ledger.balance(100).await.unwrap();
    assert_eq!(alice_balance.available, dec!(30));
    assert_eq!(alice_balance.locked, dec!(30));

    // Bob received nothing
    assert_eq!(stack.ledger.balance(200).await.unwrap().available, dec!(0));
}

#[tokio::test]
async fn test_resolve_with_no_action_leaves_trade_disputed() {
    let stack = setup();
    let admin = Actor::new_admin(1);
    let trade = paid_trade(&stack).await;
    let bob = Actor::new(200);

    let dispute = stack
        .disputes
        .open_dispute(bob, trade.id, "needs review".to_string())
        .await
        .unwrap();

    let dispute = stack
        .disputes
        .resolve_dispute(admin, dispute.id, DisputeOutcome::Closed, None, TradeAction::NoAction)
        .await
        .unwrap();
    assert_eq!(dispute.status, DisputeStatus::Closed);

    let trade = stack.trades.get_trade(trade.id).await.unwrap();
    assert_eq!(trade.status, TradeStatus::Disputed);
}

#[tokio::test]
async fn test_resolve_twice_rejected() {
    let stack = setup();
    let admin = Actor::new_admin(1);
    let trade = paid_trade(&stack).await;
    let bob = Actor::new(200);

    let dispute = stack
        .disputes
        .open_dispute(bob, trade.id, "stuck".to_string())
        .await
        .unwrap();

    stack
        .disputes
        .resolve_dispute(admin, dispute.id, DisputeOutcome::Closed, None, TradeAction::NoAction)
        .await
        .unwrap();

    let err = stack
        .disputes
        .resolve_dispute(admin, dispute.id, DisputeOutcome::Resolved, None, TradeAction::Release)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
async fn test_dispute_lookups() {
    let stack = setup();
    let trade = paid_trade(&stack).await;
    let bob = Actor::new(200);

    assert!(stack
        .disputes
        .dispute_for_trade(trade.id)
        .await
        .unwrap()
        .is_none());

    let dispute = stack
        .disputes
        .open_dispute(bob, trade.id, "stuck".to_string())
        .await
        .unwrap();

    let by_trade = stack
        .disputes
        .dispute_for_trade(trade.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_trade.id, dispute.id);

    let err = stack.disputes.get_dispute(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

// A dispute record that cannot be written must not leave the trade
// frozen: the freeze is undone and the trade can still be released
#[tokio::test]
async fn test_failed_dispute_record_unfreezes_trade() {
    let stack = setup();
    let trade = paid_trade(&stack).await;
    let bob = Actor::new(200);

    // A stray index entry makes the insert fail after the freeze
    stack.dispute_repo.by_trade.insert(trade.id, Uuid::new_v4());

    let err = stack
        .disputes
        .open_dispute(bob, trade.id, "stuck".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let trade = stack.trades.get_trade(trade.id).await.unwrap();
    assert_eq!(trade.status, TradeStatus::PaidPendingRelease);
}

// A forced settlement that fails must not consume the dispute; it stays
// open so the arbiter can retry or close it
#[tokio::test]
async fn test_resolve_keeps_dispute_open_when_trade_action_fails() {
    let stack = setup();
    let admin = Actor::new_admin(1);
    let trade = paid_trade(&stack).await;
    let bob = Actor::new(200);

    let dispute = stack
        .disputes
        .open_dispute(bob, trade.id, "stuck".to_string())
        .await
        .unwrap();

    // The trade settles out from under the arbiter
    {
        let mut stored = stack.trade_repo.trades.get_mut(&trade.id).unwrap();
        stored.status = TradeStatus::Completed;
    }

    let err = stack
        .disputes
        .resolve_dispute(admin, dispute.id, DisputeOutcome::Resolved, None, TradeAction::Release)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    // The dispute record was not consumed
    let dispute = stack.disputes.get_dispute(dispute.id).await.unwrap();
    assert_eq!(dispute.status, DisputeStatus::Open);

    // The arbiter can still close it without forcing the trade
    stack
        .disputes
        .resolve_dispute(admin, dispute.id, DisputeOutcome::Closed, None, TradeAction::NoAction)
        .await
        .unwrap();
}

// Window boundary: a buyer with time left on the clock is still inside
#[tokio::test]
async fn test_buyer_dispute_inside_window() {
    let stack = setup();
    let trade = paid_trade(&stack).await;
    let bob = Actor::new(200);

    backdate_paid_at(&stack, trade.id, DISPUTE_WINDOW_HOURS - 1);

    let dispute = stack
        .disputes
        .open_dispute(bob, trade.id, "still in time".to_string())
        .await
        .unwrap();
    assert_eq!(dispute.status, DisputeStatus::Open);
}
