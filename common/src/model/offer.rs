//! Offer models and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Price, Quantity};
use crate::error::{Error, Result};
use crate::model::LEDGER_ASSET;

/// Offer side (buy or sell, from the maker's point of view)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferSide {
    Buy,
    Sell,
}

impl OfferSide {
    /// Parse a side string case-insensitively
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(OfferSide::Buy),
            "SELL" => Ok(OfferSide::Sell),
            other => Err(Error::ValidationError(format!(
                "invalid offer side: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OfferSide::Buy => "BUY",
            OfferSide::Sell => "SELL",
        }
    }
}

/// Offer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferStatus {
    /// Offer is on the book and can be accepted
    Open,
    /// Offer has been cancelled by its maker
    Cancelled,
}

impl OfferStatus {
    /// Check whether a transition to `next` is legal. Open -> Cancelled is
    /// the only transition an offer ever makes.
    pub fn can_transition_to(self, next: OfferStatus) -> bool {
        matches!((self, next), (OfferStatus::Open, OfferStatus::Cancelled))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Open => "OPEN",
            OfferStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "OPEN" => Ok(OfferStatus::Open),
            "CANCELLED" => Ok(OfferStatus::Cancelled),
            other => Err(Error::Internal(format!("unknown offer status: {}", other))),
        }
    }
}

/// Per-fill amount limits a maker may attach to an offer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfferLimits {
    /// Minimum fill amount, if any
    pub min_amount: Option<Quantity>,
    /// Maximum fill amount, if any
    pub max_amount: Option<Quantity>,
}

impl OfferLimits {
    /// Limits that allow any fill
    pub fn none() -> Self {
        Self::default()
    }

    /// Check a fill amount against the limits
    pub fn permits(&self, amount: Quantity) -> bool {
        if let Some(min) = self.min_amount {
            if amount < min {
                return false;
            }
        }
        if let Some(max) = self.max_amount {
            if amount > max {
                return false;
            }
        }
        true
    }
}

/// Offer model: a standing, partially fillable intent to buy or sell the
/// asset at a fixed fiat price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    /// Unique offer ID
    pub id: Uuid,
    /// Maker user id
    pub maker_id: i64,
    /// Offer side
    pub side: OfferSide,
    /// Asset symbol being bought/sold
    pub asset: String,
    /// Fiat currency the asset is priced in (e.g. "KES", "USD")
    pub fiat_currency: String,
    /// Fiat price per asset unit
    pub price: Price,
    /// Original offer amount
    pub amount: Quantity,
    /// Amount still open for fills
    pub remaining: Quantity,
    /// Per-fill limits
    pub limits: OfferLimits,
    /// Current status
    pub status: OfferStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Cancellation timestamp
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Offer {
    /// Create a new open offer with `remaining = amount`
    pub fn new(
        maker_id: i64,
        side: OfferSide,
        asset: String,
        fiat_currency: String,
        price: Price,
        amount: Quantity,
        limits: OfferLimits,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            maker_id,
            side,
            asset,
            fiat_currency,
            price,
            amount,
            remaining: amount,
            limits,
            status: OfferStatus::Open,
            created_at: Utc::now(),
            cancelled_at: None,
        }
    }

    /// Check if the offer is open for fills
    pub fn is_open(&self) -> bool {
        self.status == OfferStatus::Open
    }

    /// Whether this offer is denominated in the internally ledgered asset
    pub fn is_ledger_asset(&self) -> bool {
        self.asset == LEDGER_ASSET
    }

    /// Whether creating this offer escrows maker funds: only SELL offers in
    /// the ledger asset pre-commit balance.
    pub fn is_escrow_backed(&self) -> bool {
        self.side == OfferSide::Sell && self.is_ledger_asset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn side_parses_case_insensitively() {
        assert_eq!(OfferSide::parse("sell").unwrap(), OfferSide::Sell);
        assert_eq!(OfferSide::parse("Buy").unwrap(), OfferSide::Buy);
        assert!(OfferSide::parse("short").is_err());
    }

    #[test]
    fn status_transitions() {
        assert!(OfferStatus::Open.can_transition_to(OfferStatus::Cancelled));
        assert!(!OfferStatus::Cancelled.can_transition_to(OfferStatus::Open));
        assert!(!OfferStatus::Open.can_transition_to(OfferStatus::Open));
    }

    #[test]
    fn limits_bound_fill_amounts() {
        let limits = OfferLimits {
            min_amount: Some(dec!(5)),
            max_amount: Some(dec!(20)),
        };
        assert!(!limits.permits(dec!(4)));
        assert!(limits.permits(dec!(5)));
        assert!(limits.permits(dec!(20)));
        assert!(!limits.permits(dec!(21)));
        assert!(OfferLimits::none().permits(dec!(1000000)));
    }
}
