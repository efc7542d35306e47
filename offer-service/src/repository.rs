//! Repository for offer data
//!
//! Mutations that race (fills against cancels, double cancels) are guarded
//! by state predicates: the update only applies to a row still in the
//! expected state, and the loser of a race observes zero rows affected.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::decimal::Quantity;
use common::error::{Error, Result};
use common::model::offer::{Offer, OfferLimits, OfferSide, OfferStatus};
use dashmap::DashMap;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

/// Offer repository trait defining the interface for offer storage
#[async_trait]
pub trait OfferRepository: Send + Sync {
    /// Insert a new offer
    async fn insert_offer(&self, offer: Offer) -> Result<Offer>;

    /// Get an offer by ID
    async fn get_offer(&self, id: Uuid) -> Result<Option<Offer>>;

    /// List all open offers
    async fn list_open(&self) -> Result<Vec<Offer>>;

    /// List a maker's offers
    async fn offers_for_maker(&self, maker_id: i64) -> Result<Vec<Offer>>;

    /// Decrement `remaining` by `amount`, only while the offer is open and
    /// has enough remaining. Returns the number of rows affected (0 when a
    /// concurrent mutation won).
    async fn fill(&self, offer_id: Uuid, amount: Quantity) -> Result<u64>;

    /// Increment `remaining` by `amount`, bounded by the original offer
    /// amount. Returns the number of rows affected.
    async fn restore(&self, offer_id: Uuid, amount: Quantity) -> Result<u64>;

    /// Flip an open offer to cancelled, stamping `cancelled_at`. Returns
    /// the `remaining` the row held when it flipped, or `None` when the
    /// offer was not open. Fills may race the flip, so the refundable
    /// amount is whatever the winner observed, not an earlier read.
    async fn cancel(
        &self,
        offer_id: Uuid,
        cancelled_at: DateTime<Utc>,
    ) -> Result<Option<Quantity>>;
}

/// In-memory repository for offer data
pub struct InMemoryOfferRepository {
    /// Offers by ID
    pub offers: DashMap<Uuid, Offer>,
}

impl InMemoryOfferRepository {
    /// Create a new in-memory offer repository
    pub fn new() -> Self {
        Self {
            offers: DashMap::new(),
        }
    }
}

impl Default for InMemoryOfferRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OfferRepository for InMemoryOfferRepository {
    async fn insert_offer(&self, offer: Offer) -> Result<Offer> {
        self.offers.insert(offer.id, offer.clone());
        Ok(offer)
    }

    async fn get_offer(&self, id: Uuid) -> Result<Option<Offer>> {
        Ok(self.offers.get(&id).map(|o| o.clone()))
    }

    async fn list_open(&self) -> Result<Vec<Offer>> {
        let mut offers: Vec<Offer> = self
            .offers
            .iter()
            .filter(|entry| entry.is_open())
            .map(|entry| entry.clone())
            .collect();

        offers.sort_by_key(|o| o.created_at);
        Ok(offers)
    }

    async fn offers_for_maker(&self, maker_id: i64) -> Result<Vec<Offer>> {
        let mut offers: Vec<Offer> = self
            .offers
            .iter()
            .filter(|entry| entry.maker_id == maker_id)
            .map(|entry| entry.clone())
            .collect();

        offers.sort_by_key(|o| o.created_at);
        Ok(offers)
    }

    async fn fill(&self, offer_id: Uuid, amount: Quantity) -> Result<u64> {
        // The shard lock held by get_mut makes this check-and-set atomic
        if let Some(mut offer) = self.offers.get_mut(&offer_id) {
            if offer.status == OfferStatus::Open && offer.remaining >= amount {
                offer.remaining -= amount;
                return Ok(1);
            }
        }
        Ok(0)
    }

    async fn restore(&self, offer_id: Uuid, amount: Quantity) -> Result<u64> {
        if let Some(mut offer) = self.offers.get_mut(&offer_id) {
            if offer.remaining + amount <= offer.amount {
                offer.remaining += amount;
                return Ok(1);
            }
        }
        Ok(0)
    }

    async fn cancel(
        &self,
        offer_id: Uuid,
        cancelled_at: DateTime<Utc>,
    ) -> Result<Option<Quantity>> {
        if let Some(mut offer) = self.offers.get_mut(&offer_id) {
            if offer.status.can_transition_to(OfferStatus::Cancelled) {
                offer.status = OfferStatus::Cancelled;
                offer.cancelled_at = Some(cancelled_at);
                return Ok(Some(offer.remaining));
            }
        }
        Ok(None)
    }
}

/// PostgreSQL repository for offer data
pub struct PostgresOfferRepository {
    /// Database connection pool
    pool: PgPool,
}

impl PostgresOfferRepository {
    /// Create a new PostgreSQL offer repository over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_quantity(value: &str, column: &str) -> Result<Quantity> {
    value
        .parse::<Quantity>()
        .map_err(|e| Error::Internal(format!("Invalid {} format: {}", column, e)))
}

fn offer_from_row(row: &sqlx::postgres::PgRow) -> Result<Offer> {
    let side: String = row.get("side");
    let status: String = row.get("status");
    let price: String = row.get("price");
    let amount: String = row.get("amount");
    let remaining: String = row.get("remaining");
    let min_amount: Option<String> = row.get("min_amount");
    let max_amount: Option<String> = row.get("max_amount");

    Ok(Offer {
        id: row.get("id"),
        maker_id: row.get("maker_id"),
        side: OfferSide::parse(&side)?,
        asset: row.get("asset"),
        fiat_currency: row.get("fiat_currency"),
        price: parse_quantity(&price, "offer price")?,
        amount: parse_quantity(&amount, "offer amount")?,
        remaining: parse_quantity(&remaining, "offer remaining")?,
        limits: OfferLimits {
            min_amount: min_amount
                .map(|v| parse_quantity(&v, "offer min_amount"))
                .transpose()?,
            max_amount: max_amount
                .map(|v| parse_quantity(&v, "offer max_amount"))
                .transpose()?,
        },
        status: OfferStatus::parse(&status)?,
        created_at: row.get("created_at"),
        cancelled_at: row.get("cancelled_at"),
    })
}

#[async_trait]
impl OfferRepository for PostgresOfferRepository {
    async fn insert_offer(&self, offer: Offer) -> Result<Offer> {
        debug!("Inserting offer {} for maker {}", offer.id, offer.maker_id);

        sqlx::query(
            "INSERT INTO offers (id, maker_id, side, asset, fiat_currency, price,
                                 amount, remaining, min_amount, max_amount, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(offer.id)
        .bind(offer.maker_id)
        .bind(offer.side.as_str())
        .bind(&offer.asset)
        .bind(&offer.fiat_currency)
        .bind(offer.price.to_string())
        .bind(offer.amount.to_string())
        .bind(offer.remaining.to_string())
        .bind(offer.limits.min_amount.map(|v| v.to_string()))
        .bind(offer.limits.max_amount.map(|v| v.to_string()))
        .bind(offer.status.as_str())
        .bind(offer.created_at)
        .execute(&self.pool)
        .await?;

        Ok(offer)
    }

    async fn get_offer(&self, id: Uuid) -> Result<Option<Offer>> {
        let row = sqlx::query(
            "SELECT id, maker_id, side, asset, fiat_currency, price, amount, remaining,
                    min_amount, max_amount, status, created_at, cancelled_at
             FROM offers
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(offer_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_open(&self) -> Result<Vec<Offer>> {
        let rows = sqlx::query(
            "SELECT id, maker_id, side, asset, fiat_currency, price, amount, remaining,
                    min_amount, max_amount, status, created_at, cancelled_at
             FROM offers
             WHERE status = 'OPEN'
             ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(offer_from_row).collect()
    }

    async fn offers_for_maker(&self, maker_id: i64) -> Result<Vec<Offer>> {
        let rows = sqlx::query(
            "SELECT id, maker_id, side, asset, fiat_currency, price, amount, remaining,
                    min_amount, max_amount, status, created_at, cancelled_at
             FROM offers
             WHERE maker_id = $1
             ORDER BY created_at",
        )
        .bind(maker_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(offer_from_row).collect()
    }

    async fn fill(&self, offer_id: Uuid, amount: Quantity) -> Result<u64> {
        // Decimal columns are stored as TEXT; the predicate casts through
        // numeric so the comparison and arithmetic are exact
        let result = sqlx::query(
            "UPDATE offers
             SET remaining = (remaining::numeric - $2::numeric)::text
             WHERE id = $1
               AND status = 'OPEN'
               AND remaining::numeric >= $2::numeric",
        )
        .bind(offer_id)
        .bind(amount.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn restore(&self, offer_id: Uuid, amount: Quantity) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE offers
             SET remaining = (remaining::numeric + $2::numeric)::text
             WHERE id = $1
               AND remaining::numeric + $2::numeric <= amount::numeric",
        )
        .bind(offer_id)
        .bind(amount.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn cancel(
        &self,
        offer_id: Uuid,
        cancelled_at: DateTime<Utc>,
    ) -> Result<Option<Quantity>> {
        let row = sqlx::query(
            "UPDATE offers
             SET status = 'CANCELLED', cancelled_at = $2
             WHERE id = $1 AND status = 'OPEN'
             RETURNING remaining",
        )
        .bind(offer_id)
        .bind(cancelled_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let remaining: String = row.get("remaining");
                Ok(Some(parse_quantity(&remaining, "offer remaining")?))
            }
            None => Ok(None),
        }
    }
}
