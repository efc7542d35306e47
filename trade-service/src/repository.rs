//! Repository for trade data
//!
//! Status flips are guarded by the expected current status, so concurrent
//! release/cancel/dispute attempts on the same trade leave exactly one
//! winner; losers observe zero rows affected.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::decimal::{Amount, Quantity};
use common::error::{Error, Result};
use common::model::trade::{Trade, TradeStatus};
use dashmap::DashMap;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

/// Trade repository trait defining the interface for trade storage
#[async_trait]
pub trait TradeRepository: Send + Sync {
    /// Insert a new trade
    async fn insert_trade(&self, trade: Trade) -> Result<Trade>;

    /// Get a trade by ID
    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>>;

    /// List trades a user was party to
    async fn trades_for_user(&self, user_id: i64) -> Result<Vec<Trade>>;

    /// Stamp a trade paid: allowed from Pending or (idempotently) from
    /// PaidPendingRelease; `paid_at` is always refreshed. Returns rows
    /// affected.
    async fn mark_paid(
        &self,
        trade_id: Uuid,
        proof: Option<&str>,
        paid_at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Flip a trade from `from` to Completed, recording the fee figures.
    /// Returns rows affected.
    async fn complete(
        &self,
        trade_id: Uuid,
        from: TradeStatus,
        fee_rate: Amount,
        fee_amount: Amount,
        released_at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Flip a trade from `from` to Cancelled. Returns rows affected.
    async fn cancel(
        &self,
        trade_id: Uuid,
        from: TradeStatus,
        cancelled_at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Flip a trade from PaidPendingRelease to Disputed. Returns rows
    /// affected.
    async fn set_disputed(&self, trade_id: Uuid) -> Result<u64>;

    /// Flip a Disputed trade back to PaidPendingRelease. Returns rows
    /// affected.
    async fn revert_disputed(&self, trade_id: Uuid) -> Result<u64>;

    /// Undo a completion whose settlement leg failed: restore `to` and
    /// clear the fee figures. Returns rows affected.
    async fn revert_completion(&self, trade_id: Uuid, to: TradeStatus) -> Result<u64>;
}

/// In-memory repository for trade data
pub struct InMemoryTradeRepository {
    /// Trades by ID
    pub trades: DashMap<Uuid, Trade>,
}

impl InMemoryTradeRepository {
    /// Create a new in-memory trade repository
    pub fn new() -> Self {
        Self {
            trades: DashMap::new(),
        }
    }
}

impl Default for InMemoryTradeRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TradeRepository for InMemoryTradeRepository {
    async fn insert_trade(&self, trade: Trade) -> Result<Trade> {
        self.trades.insert(trade.id, trade.clone());
        Ok(trade)
    }

    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>> {
        Ok(self.trades.get(&id).map(|t| t.clone()))
    }

    async fn trades_for_user(&self, user_id: i64) -> Result<Vec<Trade>> {
        let mut trades: Vec<Trade> = self
            .trades
            .iter()
            .filter(|entry| entry.is_party(user_id))
            .map(|entry| entry.clone())
            .collect();

        trades.sort_by_key(|t| t.created_at);
        Ok(trades)
    }

    async fn mark_paid(
        &self,
        trade_id: Uuid,
        proof: Option<&str>,
        paid_at: DateTime<Utc>,
    ) -> Result<u64> {
        if let Some(mut trade) = self.trades.get_mut(&trade_id) {
            if trade.status.can_transition_to(TradeStatus::PaidPendingRelease) {
                trade.status = TradeStatus::PaidPendingRelease;
                trade.paid_at = Some(paid_at);
                if let Some(proof) = proof {
                    trade.payment_proof = Some(proof.to_string());
                }
                return Ok(1);
            }
        }
        Ok(0)
    }

    async fn complete(
        &self,
        trade_id: Uuid,
        from: TradeStatus,
        fee_rate: Amount,
        fee_amount: Amount,
        released_at: DateTime<Utc>,
    ) -> Result<u64> {
        if let Some(mut trade) = self.trades.get_mut(&trade_id) {
            if trade.status == from && from.can_transition_to(TradeStatus::Completed) {
                trade.status = TradeStatus::Completed;
                trade.fee_rate = Some(fee_rate);
                trade.fee_amount = Some(fee_amount);
                trade.released_at = Some(released_at);
                return Ok(1);
            }
        }
        Ok(0)
    }

    async fn cancel(
        &self,
        trade_id: Uuid,
        from: TradeStatus,
        cancelled_at: DateTime<Utc>,
    ) -> Result<u64> {
        if let Some(mut trade) = self.trades.get_mut(&trade_id) {
            if trade.status == from && from.can_transition_to(TradeStatus::Cancelled) {
                trade.status = TradeStatus::Cancelled;
                trade.cancelled_at = Some(cancelled_at);
                return Ok(1);
            }
        }
        Ok(0)
    }

    async fn set_disputed(&self, trade_id: Uuid) -> Result<u64> {
        if let Some(mut trade) = self.trades.get_mut(&trade_id) {
            if trade.status == TradeStatus::PaidPendingRelease {
                trade.status = TradeStatus::Disputed;
                return Ok(1);
            }
        }
        Ok(0)
    }

    async fn revert_disputed(&self, trade_id: Uuid) -> Result<u64> {
        if let Some(mut trade) = self.trades.get_mut(&trade_id) {
            if trade.status == TradeStatus::Disputed {
                trade.status = TradeStatus::PaidPendingRelease;
                return Ok(1);
            }
        }
        Ok(0)
    }

    async fn revert_completion(&self, trade_id: Uuid, to: TradeStatus) -> Result<u64> {
        if let Some(mut trade) = self.trades.get_mut(&trade_id) {
            if trade.status == TradeStatus::Completed {
                trade.status = to;
                trade.fee_rate = None;
                trade.fee_amount = None;
                trade.released_at = None;
                return Ok(1);
            }
        }
        Ok(0)
    }
}

/// PostgreSQL repository for trade data
pub struct PostgresTradeRepository {
    /// Database connection pool
    pool: PgPool,
}

impl PostgresTradeRepository {
    /// Create a new PostgreSQL trade repository over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_quantity(value: &str, column: &str) -> Result<Quantity> {
    value
        .parse::<Quantity>()
        .map_err(|e| Error::Internal(format!("Invalid {} format: {}", column, e)))
}

fn trade_from_row(row: &sqlx::postgres::PgRow) -> Result<Trade> {
    let status: String = row.get("status");
    let amount: String = row.get("amount");
    let price: String = row.get("price");
    let fee_rate: Option<String> = row.get("fee_rate");
    let fee_amount: Option<String> = row.get("fee_amount");

    Ok(Trade {
        id: row.get("id"),
        offer_id: row.get("offer_id"),
        buyer_id: row.get("buyer_id"),
        seller_id: row.get("seller_id"),
        amount: parse_quantity(&amount, "trade amount")?,
        price: parse_quantity(&price, "trade price")?,
        asset: row.get("asset"),
        fiat_currency: row.get("fiat_currency"),
        status: TradeStatus::parse(&status)?,
        payment_proof: row.get("payment_proof"),
        paid_at: row.get("paid_at"),
        released_at: row.get("released_at"),
        cancelled_at: row.get("cancelled_at"),
        fee_rate: fee_rate
            .map(|v| parse_quantity(&v, "trade fee_rate"))
            .transpose()?,
        fee_amount: fee_amount
            .map(|v| parse_quantity(&v, "trade fee_amount"))
            .transpose()?,
        created_at: row.get("created_at"),
    })
}

const TRADE_COLUMNS: &str = "id, offer_id, buyer_id, seller_id, amount, price, asset, \
     fiat_currency, status, payment_proof, paid_at, released_at, cancelled_at, \
     fee_rate, fee_amount, created_at";

#[async_trait]
impl TradeRepository for PostgresTradeRepository {
    async fn insert_trade(&self, trade: Trade) -> Result<Trade> {
        debug!(
            "Inserting trade {} on offer {} ({} -> {})",
            trade.id, trade.offer_id, trade.seller_id, trade.buyer_id
        );

        sqlx::query(
            "INSERT INTO trades (id, offer_id, buyer_id, seller_id, amount, price,
                                 asset, fiat_currency, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(trade.id)
        .bind(trade.offer_id)
        .bind(trade.buyer_id)
        .bind(trade.seller_id)
        .bind(trade.amount.to_string())
        .bind(trade.price.to_string())
        .bind(&trade.asset)
        .bind(&trade.fiat_currency)
        .bind(trade.status.as_str())
        .bind(trade.created_at)
        .execute(&self.pool)
        .await?;

        Ok(trade)
    }

    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM trades WHERE id = $1",
            TRADE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(trade_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn trades_for_user(&self, user_id: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trades
             WHERE buyer_id = $1 OR seller_id = $1
             ORDER BY created_at",
            TRADE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(trade_from_row).collect()
    }

    async fn mark_paid(
        &self,
        trade_id: Uuid,
        proof: Option<&str>,
        paid_at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE trades
             SET status = 'PAID_PENDING_RELEASE',
                 paid_at = $2,
                 payment_proof = COALESCE($3, payment_proof)
             WHERE id = $1 AND status IN ('PENDING', 'PAID_PENDING_RELEASE')",
        )
        .bind(trade_id)
        .bind(paid_at)
        .bind(proof)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn complete(
        &self,
        trade_id: Uuid,
        from: TradeStatus,
        fee_rate: Amount,
        fee_amount: Amount,
        released_at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE trades
             SET status = 'COMPLETED',
                 fee_rate = $3,
                 fee_amount = $4,
                 released_at = $5
             WHERE id = $1 AND status = $2",
        )
        .bind(trade_id)
        .bind(from.as_str())
        .bind(fee_rate.to_string())
        .bind(fee_amount.to_string())
        .bind(released_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn cancel(
        &self,
        trade_id: Uuid,
        from: TradeStatus,
        cancelled_at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE trades
             SET status = 'CANCELLED', cancelled_at = $3
             WHERE id = $1 AND status = $2",
        )
        .bind(trade_id)
        .bind(from.as_str())
        .bind(cancelled_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn set_disputed(&self, trade_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE trades
             SET status = 'DISPUTED'
             WHERE id = $1 AND status = 'PAID_PENDING_RELEASE'",
        )
        .bind(trade_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn revert_disputed(&self, trade_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE trades
             SET status = 'PAID_PENDING_RELEASE'
             WHERE id = $1 AND status = 'DISPUTED'",
        )
        .bind(trade_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn revert_completion(&self, trade_id: Uuid, to: TradeStatus) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE trades
             SET status = $2, fee_rate = NULL, fee_amount = NULL, released_at = NULL
             WHERE id = $1 AND status = 'COMPLETED'",
        )
        .bind(trade_id)
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
