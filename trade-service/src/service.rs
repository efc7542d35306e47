//! Trade engine implementation
//!
//! Drives a trade through its lifecycle: accept an offer (escrowing the
//! acceptor's funds when they end up as seller of the ledger asset), let
//! the buyer mark the fiat leg paid, and let the seller release the asset
//! with the fee deducted. Arbitration outcomes reuse the same settlement
//! paths via `force_release` / `force_cancel`.

use std::sync::Arc;

use chrono::Utc;
use common::decimal::precision::round_amount;
use common::decimal::{Decimal, Quantity};
use common::error::{Error, Result};
use common::model::actor::Actor;
use common::model::offer::OfferSide;
use common::model::trade::{Trade, TradeStatus};
use common::model::LEDGER_ASSET;
use ledger_service::LedgerService;
use offer_service::OfferService;
use tracing::{error, info};
use uuid::Uuid;

use crate::repository::{InMemoryTradeRepository, TradeRepository};

/// Trade engine service
pub struct TradeService {
    /// Repository for trade data
    repo: Arc<dyn TradeRepository>,
    /// Offer book the trades fill against
    offers: Arc<OfferService>,
    /// Ledger for escrow and settlement
    ledger: Arc<LedgerService>,
}

impl TradeService {
    /// Create a trade service over the given repository and collaborators
    pub fn new(
        repo: Arc<dyn TradeRepository>,
        offers: Arc<OfferService>,
        ledger: Arc<LedgerService>,
    ) -> Self {
        Self {
            repo,
            offers,
            ledger,
        }
    }

    /// Create a trade service backed by an in-memory repository
    pub fn in_memory(offers: Arc<OfferService>, ledger: Arc<LedgerService>) -> Self {
        Self::new(Arc::new(InMemoryTradeRepository::new()), offers, ledger)
    }

    /// Accept `amount` of an open offer, creating a pending trade.
    ///
    /// Role assignment follows the offer side: accepting a SELL offer makes
    /// the acceptor the buyer; accepting a BUY offer makes the acceptor the
    /// seller, and for the ledger asset that commits the acceptor's funds
    /// immediately, mirroring SELL-offer creation.
    pub async fn accept_offer(
        &self,
        actor: Actor,
        offer_id: Uuid,
        amount: Quantity,
    ) -> Result<Trade> {
        let offer = self.offers.get_offer(offer_id).await?;

        if !offer.is_open() {
            return Err(Error::NotFound(format!(
                "offer {} is no longer open",
                offer_id
            )));
        }
        if amount <= Quantity::ZERO {
            return Err(Error::ValidationError(format!(
                "trade amount must be positive, got {}",
                amount
            )));
        }
        if actor.id == offer.maker_id {
            return Err(Error::ValidationError(format!(
                "user {} cannot accept their own offer",
                actor.id
            )));
        }
        if !offer.limits.permits(amount) {
            return Err(Error::ValidationError(format!(
                "amount {} is outside the offer's limits",
                amount
            )));
        }
        if amount > offer.remaining {
            return Err(Error::InsufficientRemaining(format!(
                "offer {} short by {}: remaining {} < requested {}",
                offer_id,
                amount - offer.remaining,
                offer.remaining,
                amount
            )));
        }

        let (buyer_id, seller_id) = match offer.side {
            OfferSide::Sell => (actor.id, offer.maker_id),
            OfferSide::Buy => (offer.maker_id, actor.id),
        };

        // The acceptor of a BUY offer sells the asset and escrows it now
        let acceptor_escrows = offer.side == OfferSide::Buy && offer.is_ledger_asset();
        if acceptor_escrows {
            self.ledger.reserve(actor.id, amount).await?;
        }

        if let Err(e) = self.offers.fill(offer_id, amount).await {
            if acceptor_escrows {
                if let Err(refund_err) = self.ledger.refund(actor.id, amount).await {
                    error!("Failed to refund escrow after lost fill: {}", refund_err);
                }
            }
            return Err(e);
        }

        let trade = Trade::new(&offer, buyer_id, seller_id, amount);

        info!(
            "Trade {} created: {} {} on offer {} (buyer {}, seller {})",
            trade.id, amount, offer.asset, offer_id, buyer_id, seller_id
        );

        match self.repo.insert_trade(trade).await {
            Ok(trade) => Ok(trade),
            Err(e) => {
                error!("Failed to insert trade, unwinding fill: {}", e);
                if let Err(restore_err) = self.offers.restore_remaining(offer_id, amount).await {
                    error!("Failed to restore offer remaining: {}", restore_err);
                }
                if acceptor_escrows {
                    if let Err(refund_err) = self.ledger.refund(actor.id, amount).await {
                        error!("Failed to refund escrow: {}", refund_err);
                    }
                }
                Err(e)
            }
        }
    }

    /// Mark the fiat leg of a trade as paid. Buyer only; legal from Pending
    /// and, idempotently, from PaidPendingRelease — each call refreshes
    /// `paid_at` to the current time.
    pub async fn mark_paid(
        &self,
        actor: Actor,
        trade_id: Uuid,
        proof: Option<String>,
    ) -> Result<Trade> {
        let trade = self.get_trade(trade_id).await?;

        if trade.buyer_id != actor.id {
            return Err(Error::Forbidden(format!(
                "user {} is not the buyer of trade {}",
                actor.id, trade_id
            )));
        }
        if !trade.status.can_transition_to(TradeStatus::PaidPendingRelease) {
            return Err(Error::InvalidState(format!(
                "trade {} is {}, cannot be marked paid",
                trade_id,
                trade.status.as_str()
            )));
        }

        let rows = self
            .repo
            .mark_paid(trade_id, proof.as_deref(), Utc::now())
            .await?;
        if rows == 0 {
            return Err(Error::Conflict(format!(
                "trade {} changed concurrently while marking paid",
                trade_id
            )));
        }

        info!("Trade {} marked paid by buyer {}", trade_id, actor.id);

        self.get_trade(trade_id).await
    }

    /// Release the asset to the buyer. Seller only; legal only while the
    /// trade is PaidPendingRelease. The fee rate is read from settings at
    /// call time.
    pub async fn release(&self, actor: Actor, trade_id: Uuid) -> Result<Trade> {
        let trade = self.get_trade(trade_id).await?;

        if trade.seller_id != actor.id {
            return Err(Error::Forbidden(format!(
                "user {} is not the seller of trade {}",
                actor.id, trade_id
            )));
        }
        if trade.status != TradeStatus::PaidPendingRelease {
            return Err(Error::InvalidState(format!(
                "trade {} is {}, only paid trades can be released",
                trade_id,
                trade.status.as_str()
            )));
        }

        self.settle_release(&trade, TradeStatus::PaidPendingRelease)
            .await
    }

    /// Cancel a pending trade. Either party may cancel before payment is
    /// marked; the amount goes back into the parent offer's remaining.
    pub async fn cancel(&self, actor: Actor, trade_id: Uuid) -> Result<Trade> {
        let trade = self.get_trade(trade_id).await?;

        if !trade.is_party(actor.id) {
            return Err(Error::Forbidden(format!(
                "user {} is not a party to trade {}",
                actor.id, trade_id
            )));
        }
        if trade.status != TradeStatus::Pending {
            return Err(Error::InvalidState(format!(
                "trade {} is {}, only pending trades can be cancelled",
                trade_id,
                trade.status.as_str()
            )));
        }

        let rows = self
            .repo
            .cancel(trade_id, TradeStatus::Pending, Utc::now())
            .await?;
        if rows == 0 {
            return Err(Error::Conflict(format!(
                "trade {} changed concurrently while cancelling",
                trade_id
            )));
        }

        self.offers
            .restore_remaining(trade.offer_id, trade.amount)
            .await?;

        // TODO: a trade derived from a BUY offer leaves the acceptor's
        // reserved amount locked here; restoring it needs a refund call
        // keyed on the parent offer's side, matching force_cancel.

        info!("Trade {} cancelled by user {}", trade_id, actor.id);

        self.get_trade(trade_id).await
    }

    /// Arbitration entry point: complete a disputed trade with the same
    /// fee, payout, and transfer logic as a seller release.
    pub async fn force_release(&self, trade_id: Uuid) -> Result<Trade> {
        let trade = self.get_trade(trade_id).await?;

        if trade.status != TradeStatus::Disputed {
            return Err(Error::InvalidState(format!(
                "trade {} is {}, only disputed trades can be force-released",
                trade_id,
                trade.status.as_str()
            )));
        }

        self.settle_release(&trade, TradeStatus::Disputed).await
    }

    /// Arbitration entry point: cancel a disputed trade. The seller's
    /// escrowed amount is refunded only when the parent offer was a SELL
    /// offer in the ledger asset; a BUY-offer acceptor's escrow stays
    /// locked, matching the behavior of an ordinary trade cancel.
    pub async fn force_cancel(&self, trade_id: Uuid) -> Result<Trade> {
        let trade = self.get_trade(trade_id).await?;

        if trade.status != TradeStatus::Disputed {
            return Err(Error::InvalidState(format!(
                "trade {} is {}, only disputed trades can be force-cancelled",
                trade_id,
                trade.status.as_str()
            )));
        }

        let rows = self
            .repo
            .cancel(trade_id, TradeStatus::Disputed, Utc::now())
            .await?;
        if rows == 0 {
            return Err(Error::Conflict(format!(
                "trade {} changed concurrently while cancelling",
                trade_id
            )));
        }

        let offer = self.offers.get_offer(trade.offer_id).await?;
        if offer.is_escrow_backed() {
            self.ledger.refund(trade.seller_id, trade.amount).await?;
        }

        info!("Trade {} cancelled by arbitration", trade_id);

        self.get_trade(trade_id).await
    }

    /// Flip a trade to Disputed. Used by the dispute arbiter when a
    /// dispute opens; the guarded update leaves one winner.
    pub async fn set_disputed(&self, trade_id: Uuid) -> Result<()> {
        let rows = self.repo.set_disputed(trade_id).await?;
        if rows == 0 {
            return Err(Error::Conflict(format!(
                "trade {} changed concurrently while opening dispute",
                trade_id
            )));
        }
        Ok(())
    }

    /// Undo a dispute freeze whose dispute record could not be written,
    /// returning the trade to awaiting release.
    pub async fn revert_disputed(&self, trade_id: Uuid) -> Result<()> {
        let rows = self.repo.revert_disputed(trade_id).await?;
        if rows == 0 {
            return Err(Error::Conflict(format!(
                "trade {} changed concurrently while reverting dispute",
                trade_id
            )));
        }
        Ok(())
    }

    /// Get a trade by ID
    pub async fn get_trade(&self, trade_id: Uuid) -> Result<Trade> {
        self.repo
            .get_trade(trade_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Trade not found: {}", trade_id)))
    }

    /// List trades a user was party to
    pub async fn trades_for_user(&self, user_id: i64) -> Result<Vec<Trade>> {
        self.repo.trades_for_user(user_id).await
    }

    /// Shared release path for seller releases and arbitration releases.
    /// The guarded status flip runs first so exactly one caller settles;
    /// the balance legs follow, but only for ledger-asset trades — any
    /// other asset settles entirely off-ledger, so the trade completes
    /// with a zero fee and no balance movement. A failed settlement leg
    /// reverts the completion so the trade can be released again.
    async fn settle_release(&self, trade: &Trade, from: TradeStatus) -> Result<Trade> {
        let escrowed = trade.asset == LEDGER_ASSET;
        let settings = self.ledger.settings().await?;
        let fee = if escrowed {
            round_amount(trade.amount * settings.fee_rate / Decimal::ONE_HUNDRED)
        } else {
            Decimal::ZERO
        };
        let payout = trade.amount - fee;

        let rows = self
            .repo
            .complete(trade.id, from, settings.fee_rate, fee, Utc::now())
            .await?;
        if rows == 0 {
            return Err(Error::Conflict(format!(
                "trade {} changed concurrently while releasing",
                trade.id
            )));
        }

        if escrowed {
            if let Err(e) = self
                .ledger
                .capture_release(
                    trade.seller_id,
                    trade.buyer_id,
                    trade.amount,
                    payout,
                    format!("trade #{}", trade.id),
                )
                .await
            {
                error!(
                    "Failed to settle trade {}, reverting completion: {}",
                    trade.id, e
                );
                if let Err(revert_err) = self.repo.revert_completion(trade.id, from).await {
                    error!(
                        "Failed to revert completion of trade {}: {}",
                        trade.id, revert_err
                    );
                }
                return Err(e);
            }
        }

        info!(
            "Trade {} released: {} due to buyer {}, fee {} at {}%",
            trade.id, payout, trade.buyer_id, fee, settings.fee_rate
        );

        self.get_trade(trade.id).await
    }
}
