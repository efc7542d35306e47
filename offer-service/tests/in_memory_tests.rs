use std::sync::Arc;

use common::decimal::dec;
use common::error::Error;
use common::model::actor::Actor;
use common::model::offer::{OfferLimits, OfferSide, OfferStatus};
use common::model::LEDGER_ASSET;
use ledger_service::LedgerService;
use offer_service::OfferService;
use uuid::Uuid;

fn setup() -> (Arc<LedgerService>, OfferService) {
    let ledger = Arc::new(LedgerService::new());
    let offers = OfferService::in_memory(ledger.clone());
    (ledger, offers)
}

#[tokio::test]
async fn test_create_sell_offer_escrows_amount() {
    let (ledger, offers) = setup();
    let alice = Actor::new(100);

    ledger.fund(alice.id, dec!(60), None).await.unwrap();

    let offer = offers
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

    assert_eq!(offer.side, OfferSide::Sell);
    assert_eq!(offer.status, OfferStatus::Open);
    assert_eq!(offer.remaining, dec!(50));

    let balance = ledger.balance(alice.id).await.unwrap();
    assert_eq!(balance.available, dec!(10));
    assert_eq!(balance.locked, dec!(50));
}

#[tokio::test]
async fn test_create_sell_offer_insufficient_balance() {
    let (ledger, offers) = setup();
    let alice = Actor::new(100);

    ledger.fund(alice.id, dec!(20), None).await.unwrap();

    let err = offers
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
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds(_)));

    // No offer was recorded and nothing was locked
    assert!(offers.list_open_offers().await.unwrap().is_empty());
    assert_eq!(ledger.balance(alice.id).await.unwrap().locked, dec!(0));
}

#[tokio::test]
async fn test_buy_offer_does_not_escrow() {
    let (ledger, offers) = setup();
    let alice = Actor::new(100);

    // No funding needed to place a BUY offer
    let offer = offers
        .create_offer(
            alice,
            "buy",
            LEDGER_ASSET,
            "EUR",
            dec!(9.5),
            dec!(100),
            OfferLimits::none(),
        )
        .await
        .unwrap();

    assert_eq!(offer.side, OfferSide::Buy);
    assert_eq!(ledger.balance(alice.id).await.unwrap().locked, dec!(0));
}

#[tokio::test]
async fn test_sell_offer_in_foreign_asset_does_not_escrow() {
    let (ledger, offers) = setup();
    let alice = Actor::new(100);

    let offer = offers
        .create_offer(
            alice,
            "SELL",
            "OTHER",
            "USD",
            dec!(1),
            dec!(500),
            OfferLimits::none(),
        )
        .await
        .unwrap();

    assert!(!offer.is_escrow_backed());
    assert_eq!(ledger.balance(alice.id).await.unwrap().locked, dec!(0));
}

#[tokio::test]
async fn test_create_offer_validation() {
    let (ledger, offers) = setup();
    let alice = Actor::new(100);
    ledger.fund(alice.id, dec!(100), None).await.unwrap();

    let err = offers
        .create_offer(alice, "SIDEWAYS", LEDGER_ASSET, "USD", dec!(10), dec!(5), OfferLimits::none())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ValidationError(_)));

    let err = offers
        .create_offer(alice, "SELL", LEDGER_ASSET, "USD", dec!(0), dec!(5), OfferLimits::none())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ValidationError(_)));

    let err = offers
        .create_offer(alice, "SELL", LEDGER_ASSET, "USD", dec!(10), dec!(-5), OfferLimits::none())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ValidationError(_)));

    let inverted = OfferLimits {
        min_amount: Some(dec!(20)),
        max_amount: Some(dec!(10)),
    };
    let err = offers
        .create_offer(alice, "SELL", LEDGER_ASSET, "USD", dec!(10), dec!(50), inverted)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ValidationError(_)));
}

#[tokio::test]
async fn test_cancel_offer_refunds_remaining() {
    let (ledger, offers) = setup();
    let alice = Actor::new(100);

    ledger.fund(alice.id, dec!(60), None).await.unwrap();
    let offer = offers
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

    // Part of the offer gets filled first
    offers.fill(offer.id, dec!(20)).await.unwrap();

    let cancelled = offers.cancel_offer(alice, offer.id).await.unwrap();
    assert_eq!(cancelled.status, OfferStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    // Only the unfilled 30 comes back; the filled 20 stays locked
    let balance = ledger.balance(alice.id).await.unwrap();
    assert_eq!(balance.available, dec!(40));
    assert_eq!(balance.locked, dec!(20));
}

#[tokio::test]
async fn test_cancel_offer_maker_only() {
    let (ledger, offers) = setup();
    let alice = Actor::new(100);
    let mallory = Actor::new(666);

    ledger.fund(alice.id, dec!(50), None).await.unwrap();
    let offer = offers
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

    let err = offers.cancel_offer(mallory, offer.id).await.unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    // Still open and still escrowed
    let offer = offers.get_offer(offer.id).await.unwrap();
    assert!(offer.is_open());
    assert_eq!(ledger.balance(alice.id).await.unwrap().locked, dec!(50));
}

#[tokio::test]
async fn test_cancel_offer_twice() {
    let (ledger, offers) = setup();
    let alice = Actor::new(100);

    ledger.fund(alice.id, dec!(50), None).await.unwrap();
    let offer = offers
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

    offers.cancel_offer(alice, offer.id).await.unwrap();
    let err = offers.cancel_offer(alice, offer.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    // No double refund
    assert_eq!(ledger.balance(alice.id).await.unwrap().available, dec!(50));
}

#[tokio::test]
async fn test_fill_beyond_remaining_conflicts() {
    let (ledger, offers) = setup();
    let alice = Actor::new(100);

    ledger.fund(alice.id, dec!(50), None).await.unwrap();
    let offer = offers
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

    offers.fill(offer.id, dec!(45)).await.unwrap();

    let err = offers.fill(offer.id, dec!(10)).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    assert_eq!(offers.get_offer(offer.id).await.unwrap().remaining, dec!(5));
}

#[tokio::test]
async fn test_restore_cannot_exceed_original_amount() {
    let (ledger, offers) = setup();
    let alice = Actor::new(100);

    ledger.fund(alice.id, dec!(50), None).await.unwrap();
    let offer = offers
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

    offers.fill(offer.id, dec!(20)).await.unwrap();
    offers.restore_remaining(offer.id, dec!(20)).await.unwrap();

    let err = offers.restore_remaining(offer.id, dec!(1)).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    assert_eq!(offers.get_offer(offer.id).await.unwrap().remaining, dec!(50));
}

#[tokio::test]
async fn test_list_open_and_maker_projections() {
    let (ledger, offers) = setup();
    let alice = Actor::new(100);
    let bob = Actor::new(200);

    ledger.fund(alice.id, dec!(100), None).await.unwrap();

    let first = offers
        .create_offer(
            alice,
            "SELL",
            LEDGER_ASSET,
            "USD",
            dec!(10),
            dec!(40),
            OfferLimits::none(),
        )
        .await
        .unwrap();
    offers
        .create_offer(bob, "BUY", LEDGER_ASSET, "USD", dec!(9), dec!(15), OfferLimits::none())
        .await
        .unwrap();

    assert_eq!(offers.list_open_offers().await.unwrap().len(), 2);

    offers.cancel_offer(alice, first.id).await.unwrap();
    assert_eq!(offers.list_open_offers().await.unwrap().len(), 1);

    // Maker projection includes cancelled offers
    assert_eq!(offers.offers_for_maker(alice.id).await.unwrap().len(), 1);
    assert_eq!(offers.offers_for_maker(bob.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_get_missing_offer() {
    let (_ledger, offers) = setup();

    let err = offers.get_offer(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

// The refundable amount is what the row held when it flipped, so fills
// landing after an earlier read cannot inflate the refund
#[tokio::test]
async fn test_cancel_reports_remaining_at_flip_time() {
    use chrono::Utc;
    use common::model::offer::Offer;
    use offer_service::{InMemoryOfferRepository, OfferRepository};

    let repo = InMemoryOfferRepository::new();
    let offer = Offer::new(
        100,
        OfferSide::Sell,
        LEDGER_ASSET.to_string(),
        "USD".to_string(),
        dec!(10),
        dec!(50),
        OfferLimits::none(),
    );
    let offer_id = offer.id;
    repo.insert_offer(offer).await.unwrap();

    repo.fill(offer_id, dec!(20)).await.unwrap();

    assert_eq!(
        repo.cancel(offer_id, Utc::now()).await.unwrap(),
        Some(dec!(30))
    );
    // A second cancel finds no open row
    assert_eq!(repo.cancel(offer_id, Utc::now()).await.unwrap(), None);
}
