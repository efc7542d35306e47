//! Trade models and the trade state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Amount, Price, Quantity};
use crate::error::{Error, Result};
use crate::model::offer::Offer;

/// Trade status
///
/// The full machine:
/// `Pending -> PaidPendingRelease -> Completed`,
/// `Pending -> Cancelled`,
/// `PaidPendingRelease -> Disputed -> {Completed, Cancelled}` (arbitration only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    /// Trade created, fiat payment not yet reported
    Pending,
    /// Buyer has marked the fiat leg paid; waiting for the seller to release
    PaidPendingRelease,
    /// A dispute is open; only an arbiter can move the trade on
    Disputed,
    /// Asset released to the buyer
    Completed,
    /// Trade cancelled before completion
    Cancelled,
}

impl TradeStatus {
    /// Check whether a transition to `next` is legal. Validated centrally so
    /// no operation mutates a trade row before the machine allows it.
    pub fn can_transition_to(self, next: TradeStatus) -> bool {
        use TradeStatus::*;
        matches!(
            (self, next),
            (Pending, PaidPendingRelease)
                | (Pending, Cancelled)
                // mark_paid is idempotent: re-stamping refreshes paid_at
                | (PaidPendingRelease, PaidPendingRelease)
                | (PaidPendingRelease, Completed)
                | (PaidPendingRelease, Disputed)
                | (Disputed, Completed)
                | (Disputed, Cancelled)
        )
    }

    /// Completed and Cancelled are the terminal outcomes
    pub fn is_terminal(self) -> bool {
        matches!(self, TradeStatus::Completed | TradeStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::PaidPendingRelease => "PAID_PENDING_RELEASE",
            TradeStatus::Disputed => "DISPUTED",
            TradeStatus::Completed => "COMPLETED",
            TradeStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(TradeStatus::Pending),
            "PAID_PENDING_RELEASE" => Ok(TradeStatus::PaidPendingRelease),
            "DISPUTED" => Ok(TradeStatus::Disputed),
            "COMPLETED" => Ok(TradeStatus::Completed),
            "CANCELLED" => Ok(TradeStatus::Cancelled),
            other => Err(Error::Internal(format!("unknown trade status: {}", other))),
        }
    }
}

/// Trade model: a specific fill against an offer, tracked through fiat
/// payment and asset release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Unique trade ID
    pub id: Uuid,
    /// Parent offer ID
    pub offer_id: Uuid,
    /// Buyer user id (receives the asset)
    pub buyer_id: i64,
    /// Seller user id (holds the asset in escrow)
    pub seller_id: i64,
    /// Asset amount traded
    pub amount: Quantity,
    /// Fiat price per unit, copied from the offer
    pub price: Price,
    /// Asset symbol, copied from the offer
    pub asset: String,
    /// Fiat currency, copied from the offer
    pub fiat_currency: String,
    /// Current status
    pub status: TradeStatus,
    /// Reference to the buyer's payment proof, if provided
    pub payment_proof: Option<String>,
    /// When the buyer marked the fiat leg paid (refreshed on re-stamp)
    pub paid_at: Option<DateTime<Utc>>,
    /// When the seller released the asset
    pub released_at: Option<DateTime<Utc>>,
    /// When the trade was cancelled
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Fee rate applied at release (percent)
    pub fee_rate: Option<Amount>,
    /// Fee deducted at release
    pub fee_amount: Option<Amount>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Trade {
    /// Create a pending trade filling `amount` of `offer`
    pub fn new(offer: &Offer, buyer_id: i64, seller_id: i64, amount: Quantity) -> Self {
        Self {
            id: Uuid::new_v4(),
            offer_id: offer.id,
            buyer_id,
            seller_id,
            amount,
            price: offer.price,
            asset: offer.asset.clone(),
            fiat_currency: offer.fiat_currency.clone(),
            status: TradeStatus::Pending,
            payment_proof: None,
            paid_at: None,
            released_at: None,
            cancelled_at: None,
            fee_rate: None,
            fee_amount: None,
            created_at: Utc::now(),
        }
    }

    /// Check whether `user_id` is the buyer or the seller
    pub fn is_party(&self, user_id: i64) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }
}
