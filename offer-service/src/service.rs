//! Offer book implementation
//!
//! Creating a SELL offer in the ledger asset escrows the full offer amount
//! out of the maker's available balance; cancelling refunds whatever is
//! still unfilled. BUY offers never touch the ledger at creation time (the
//! acceptor of a BUY offer is the party who must hold the asset).

use std::sync::Arc;

use chrono::Utc;
use common::decimal::{Price, Quantity};
use common::error::{Error, ErrorExt, Result};
use common::model::actor::Actor;
use common::model::offer::{Offer, OfferLimits, OfferSide, OfferStatus};
use ledger_service::LedgerService;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::repository::{InMemoryOfferRepository, OfferRepository};

/// Offer book service
pub struct OfferService {
    /// Repository for offer data
    repo: Arc<dyn OfferRepository>,
    /// Ledger for escrow reservations
    ledger: Arc<LedgerService>,
}

impl OfferService {
    /// Create an offer service over the given repository and ledger
    pub fn new(repo: Arc<dyn OfferRepository>, ledger: Arc<LedgerService>) -> Self {
        Self { repo, ledger }
    }

    /// Create an offer service backed by an in-memory repository
    pub fn in_memory(ledger: Arc<LedgerService>) -> Self {
        Self::new(Arc::new(InMemoryOfferRepository::new()), ledger)
    }

    /// Create a new offer. `side` is parsed case-insensitively. SELL offers
    /// in the ledger asset reserve the maker's balance up front, applying
    /// the usable-balance rule (open-offer locks, the holding floor, and
    /// unexpired holdings are all unavailable).
    pub async fn create_offer(
        &self,
        actor: Actor,
        side: &str,
        asset: &str,
        fiat_currency: &str,
        price: Price,
        amount: Quantity,
        limits: OfferLimits,
    ) -> Result<Offer> {
        let side = OfferSide::parse(side)?;

        if price <= Price::ZERO {
            return Err(Error::ValidationError(format!(
                "offer price must be positive, got {}",
                price
            )));
        }
        if amount <= Quantity::ZERO {
            return Err(Error::ValidationError(format!(
                "offer amount must be positive, got {}",
                amount
            )));
        }
        if let (Some(min), Some(max)) = (limits.min_amount, limits.max_amount) {
            if min > max {
                return Err(Error::ValidationError(format!(
                    "offer limits are inverted: min {} > max {}",
                    min, max
                )));
            }
        }

        let offer = Offer::new(
            actor.id,
            side,
            asset.to_string(),
            fiat_currency.to_string(),
            price,
            amount,
            limits,
        );

        let escrowed = offer.is_escrow_backed();
        if escrowed {
            self.ledger
                .reserve(actor.id, amount)
                .await
                .with_context(|| format!("Cannot escrow offer of {} {}", amount, asset))?;
        }

        info!(
            "Creating {} offer {} for {} {} at {} {}/unit by user {}",
            offer.side.as_str(),
            offer.id,
            amount,
            asset,
            price,
            fiat_currency,
            actor.id
        );

        match self.repo.insert_offer(offer).await {
            Ok(offer) => Ok(offer),
            Err(e) => {
                // Undo the escrow so a storage failure does not strand funds
                error!("Failed to insert offer, refunding escrow: {}", e);
                if escrowed {
                    if let Err(refund_err) = self.ledger.refund(actor.id, amount).await {
                        error!("Failed to refund escrow after insert failure: {}", refund_err);
                    }
                }
                Err(e)
            }
        }
    }

    /// Cancel an open offer. Only the maker may cancel; for escrow-backed
    /// offers the unfilled remainder is refunded to the maker's balance.
    pub async fn cancel_offer(&self, actor: Actor, offer_id: Uuid) -> Result<Offer> {
        let offer = self.get_offer(offer_id).await?;

        if offer.maker_id != actor.id {
            return Err(Error::Forbidden(format!(
                "user {} is not the maker of offer {}",
                actor.id, offer_id
            )));
        }
        if !offer.status.can_transition_to(OfferStatus::Cancelled) {
            return Err(Error::InvalidState(format!(
                "offer {} is {}, only open offers can be cancelled",
                offer_id,
                offer.status.as_str()
            )));
        }

        // Refund what the row held at flip time, not the earlier read:
        // a fill may land between the two
        let cancelled_at = Utc::now();
        let remaining = match self.repo.cancel(offer_id, cancelled_at).await? {
            Some(remaining) => remaining,
            // A concurrent cancel won the row
            None => {
                return Err(Error::Conflict(format!(
                    "offer {} was cancelled concurrently",
                    offer_id
                )))
            }
        };

        if offer.is_escrow_backed() {
            debug!(
                "Refunding {} of escrowed {} to maker {}",
                remaining, offer.asset, offer.maker_id
            );
            self.ledger
                .refund(offer.maker_id, remaining)
                .await
                .with_context(|| format!("Failed to refund cancelled offer {}", offer_id))?;
        }

        info!("Offer {} cancelled by maker {}", offer_id, actor.id);

        self.get_offer(offer_id).await
    }

    /// List all open offers (read-only projection)
    pub async fn list_open_offers(&self) -> Result<Vec<Offer>> {
        self.repo.list_open().await
    }

    /// List a maker's offers regardless of status
    pub async fn offers_for_maker(&self, maker_id: i64) -> Result<Vec<Offer>> {
        self.repo.offers_for_maker(maker_id).await
    }

    /// Get an offer by ID
    pub async fn get_offer(&self, offer_id: Uuid) -> Result<Offer> {
        self.repo
            .get_offer(offer_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Offer not found: {}", offer_id)))
    }

    /// Take `amount` out of an open offer's remaining. Used by the trade
    /// engine when a trade is created; the guarded update turns a lost race
    /// (concurrent fill or cancel) into `Conflict`.
    pub async fn fill(&self, offer_id: Uuid, amount: Quantity) -> Result<()> {
        let rows = self.repo.fill(offer_id, amount).await?;
        if rows == 0 {
            return Err(Error::Conflict(format!(
                "offer {} changed concurrently, fill of {} not applied",
                offer_id, amount
            )));
        }
        Ok(())
    }

    /// Put `amount` back into an offer's remaining. Used by the trade
    /// engine when a trade is cancelled.
    pub async fn restore_remaining(&self, offer_id: Uuid, amount: Quantity) -> Result<()> {
        let rows = self.repo.restore(offer_id, amount).await?;
        if rows == 0 {
            return Err(Error::Conflict(format!(
                "could not restore {} to offer {}",
                amount, offer_id
            )));
        }
        Ok(())
    }
}
