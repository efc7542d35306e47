//! Repository for ledger data
//!
//! Balance mutations are single guarded statements: the predicate re-checks
//! the current row, so the check and the write form one atomic step and the
//! loser of a concurrent race observes zero rows affected. Multi-leg
//! settlements run inside one database transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::decimal::Amount;
use common::error::{Error, Result};
use common::model::balance::LedgerBalance;
use common::model::holding::Holding;
use common::model::transfer::Transfer;
use dashmap::DashMap;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

/// Ledger repository trait defining the interface for balance, holding,
/// transfer, and settings storage
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Get a user's balance
    async fn get_balance(&self, user_id: i64) -> Result<Option<LedgerBalance>>;

    /// Ensure a balance row exists, creating it lazily if necessary
    async fn ensure_balance(&self, user_id: i64) -> Result<LedgerBalance>;

    /// Credit a user's available balance, recording the optional holding
    /// alongside the credit
    async fn credit(
        &self,
        user_id: i64,
        amount: Amount,
        holding: Option<Holding>,
    ) -> Result<LedgerBalance>;

    /// Move `amount` from available to locked, only while the row's
    /// available covers `required_available` (the amount plus whatever the
    /// caller needs to stay untouched). Returns rows affected (0 when a
    /// concurrent mutation won).
    async fn reserve(
        &self,
        user_id: i64,
        amount: Amount,
        required_available: Amount,
    ) -> Result<u64>;

    /// Move `amount` from locked back to available, only while locked
    /// covers it. Returns rows affected.
    async fn refund(&self, user_id: i64, amount: Amount) -> Result<u64>;

    /// Settle a release: remove `amount` from the seller's locked funds,
    /// credit `payout` to the buyer, and write the transfer audit record.
    /// Returns rows affected by the seller leg; when the seller's locked
    /// funds do not cover `amount`, nothing at all is applied.
    async fn settle(
        &self,
        seller_id: i64,
        buyer_id: i64,
        amount: Amount,
        payout: Amount,
        transfer: Transfer,
    ) -> Result<u64>;

    /// Move `amount` of available balance between users, writing the
    /// transfer audit record. The debit only applies while the payer's
    /// available covers `required_available`. Returns rows affected by
    /// the debit leg.
    async fn transfer_funds(
        &self,
        from_user_id: i64,
        to_user_id: i64,
        amount: Amount,
        required_available: Amount,
        transfer: Transfer,
    ) -> Result<u64>;

    /// List transfers a user was party to
    async fn transfers_for_user(&self, user_id: i64) -> Result<Vec<Transfer>>;

    /// Get a holding by ID
    async fn get_holding(&self, id: Uuid) -> Result<Option<Holding>>;

    /// Update a holding (period changes)
    async fn update_holding(&self, holding: Holding) -> Result<Holding>;

    /// List a user's holdings
    async fn holdings_for_user(&self, user_id: i64) -> Result<Vec<Holding>>;

    /// Sum the amounts of a user's holdings that are unexpired at `now`
    async fn active_holdings_total(&self, user_id: i64, now: DateTime<Utc>) -> Result<Amount>;

    /// Read a setting value
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    /// Write a setting value
    async fn put_setting(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory repository for ledger data
pub struct InMemoryLedgerRepository {
    /// Balances by user ID
    pub balances: DashMap<i64, LedgerBalance>,
    /// Holdings by ID
    pub holdings: DashMap<Uuid, Holding>,
    /// Transfers by ID
    pub transfers: DashMap<Uuid, Transfer>,
    /// Settings by key
    pub settings: DashMap<String, String>,
}

impl InMemoryLedgerRepository {
    /// Create a new in-memory ledger repository
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
            holdings: DashMap::new(),
            transfers: DashMap::new(),
            settings: DashMap::new(),
        }
    }
}

impl Default for InMemoryLedgerRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    async fn get_balance(&self, user_id: i64) -> Result<Option<LedgerBalance>> {
        Ok(self.balances.get(&user_id).map(|b| b.clone()))
    }

    async fn ensure_balance(&self, user_id: i64) -> Result<LedgerBalance> {
        let balance = self
            .balances
            .entry(user_id)
            .or_insert_with(|| LedgerBalance::new(user_id));
        Ok(balance.clone())
    }

    async fn credit(
        &self,
        user_id: i64,
        amount: Amount,
        holding: Option<Holding>,
    ) -> Result<LedgerBalance> {
        let balance = {
            let mut balance = self
                .balances
                .entry(user_id)
                .or_insert_with(|| LedgerBalance::new(user_id));
            balance.deposit(amount);
            balance.clone()
        };

        if let Some(holding) = holding {
            self.holdings.insert(holding.id, holding);
        }

        Ok(balance)
    }

    async fn reserve(
        &self,
        user_id: i64,
        amount: Amount,
        required_available: Amount,
    ) -> Result<u64> {
        // The shard lock held by entry makes this check-and-set atomic
        let mut balance = self
            .balances
            .entry(user_id)
            .or_insert_with(|| LedgerBalance::new(user_id));

        if balance.available >= required_available && balance.reserve(amount).is_ok() {
            return Ok(1);
        }
        Ok(0)
    }

    async fn refund(&self, user_id: i64, amount: Amount) -> Result<u64> {
        if let Some(mut balance) = self.balances.get_mut(&user_id) {
            if balance.refund(amount).is_ok() {
                return Ok(1);
            }
        }
        Ok(0)
    }

    async fn settle(
        &self,
        seller_id: i64,
        buyer_id: i64,
        amount: Amount,
        payout: Amount,
        transfer: Transfer,
    ) -> Result<u64> {
        {
            let mut seller = match self.balances.get_mut(&seller_id) {
                Some(balance) => balance,
                None => return Ok(0),
            };
            if seller.capture(amount).is_err() {
                return Ok(0);
            }
        }

        self.balances
            .entry(buyer_id)
            .or_insert_with(|| LedgerBalance::new(buyer_id))
            .deposit(payout);

        self.transfers.insert(transfer.id, transfer);
        Ok(1)
    }

    async fn transfer_funds(
        &self,
        from_user_id: i64,
        to_user_id: i64,
        amount: Amount,
        required_available: Amount,
        transfer: Transfer,
    ) -> Result<u64> {
        {
            let mut from = match self.balances.get_mut(&from_user_id) {
                Some(balance) => balance,
                None => return Ok(0),
            };
            if from.available < required_available {
                return Ok(0);
            }
            from.available -= amount;
            from.updated_at = Utc::now();
        }

        self.balances
            .entry(to_user_id)
            .or_insert_with(|| LedgerBalance::new(to_user_id))
            .deposit(amount);

        self.transfers.insert(transfer.id, transfer);
        Ok(1)
    }

    async fn transfers_for_user(&self, user_id: i64) -> Result<Vec<Transfer>> {
        let mut transfers: Vec<Transfer> = self
            .transfers
            .iter()
            .filter(|entry| {
                entry.from_user_id == user_id || entry.to_user_id == user_id
            })
            .map(|entry| entry.clone())
            .collect();

        transfers.sort_by_key(|t| t.created_at);
        Ok(transfers)
    }

    async fn get_holding(&self, id: Uuid) -> Result<Option<Holding>> {
        Ok(self.holdings.get(&id).map(|h| h.clone()))
    }

    async fn update_holding(&self, holding: Holding) -> Result<Holding> {
        if !self.holdings.contains_key(&holding.id) {
            return Err(Error::NotFound(format!("Holding not found: {}", holding.id)));
        }
        self.holdings.insert(holding.id, holding.clone());
        Ok(holding)
    }

    async fn holdings_for_user(&self, user_id: i64) -> Result<Vec<Holding>> {
        let mut holdings: Vec<Holding> = self
            .holdings
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect();

        holdings.sort_by_key(|h| h.created_at);
        Ok(holdings)
    }

    async fn active_holdings_total(&self, user_id: i64, now: DateTime<Utc>) -> Result<Amount> {
        let total = self
            .holdings
            .iter()
            .filter(|entry| entry.user_id == user_id && entry.is_active(now))
            .map(|entry| entry.amount)
            .sum();
        Ok(total)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.settings.get(key).map(|v| v.clone()))
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        self.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// PostgreSQL repository for ledger data
pub struct PostgresLedgerRepository {
    /// Database connection pool
    pool: PgPool,
}

impl PostgresLedgerRepository {
    /// Create a new PostgreSQL ledger repository
    pub async fn new(database_url: Option<String>) -> Result<Self> {
        let url = match database_url {
            Some(url) => url,
            None => std::env::var("DATABASE_URL")
                .map_err(|_| Error::ConfigurationError("DATABASE_URL must be set".to_string()))?,
        };

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(Error::Storage)?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Create a new PostgreSQL ledger repository with configuration
    pub async fn with_config(config: &crate::config::LedgerServiceConfig) -> Result<Self> {
        info!(
            "Connecting to PostgreSQL database with pool size: {}",
            config.db_pool_size
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.db_pool_size)
            .connect(&config.database_url)
            .await
            .map_err(Error::Storage)?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }
}

/// Parse a decimal column stored as TEXT
fn parse_amount(value: &str, column: &str) -> Result<Amount> {
    value
        .parse::<Amount>()
        .map_err(|e| Error::Internal(format!("Invalid {} format: {}", column, e)))
}

fn balance_from_row(row: &sqlx::postgres::PgRow) -> Result<LedgerBalance> {
    let available: String = row.get("available");
    let locked: String = row.get("locked");

    Ok(LedgerBalance {
        user_id: row.get("user_id"),
        available: parse_amount(&available, "available balance")?,
        locked: parse_amount(&locked, "locked balance")?,
        updated_at: row.get("updated_at"),
    })
}

fn holding_from_row(row: &sqlx::postgres::PgRow) -> Result<Holding> {
    let amount: String = row.get("amount");

    Ok(Holding {
        id: row.get("id"),
        user_id: row.get("user_id"),
        amount: parse_amount(&amount, "holding amount")?,
        period_code: row.get("period_code"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    })
}

fn transfer_from_row(row: &sqlx::postgres::PgRow) -> Result<Transfer> {
    let amount: String = row.get("amount");

    Ok(Transfer {
        id: row.get("id"),
        from_user_id: row.get("from_user_id"),
        to_user_id: row.get("to_user_id"),
        amount: parse_amount(&amount, "transfer amount")?,
        note: row.get("note"),
        created_at: row.get("created_at"),
    })
}

/// Credit `amount` to a user inside an open transaction, creating the row
/// if it does not exist. Increments are race-safe without a predicate.
async fn credit_leg(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    amount: Amount,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO ledger_balances (user_id, available, locked, updated_at)
         VALUES ($1, $2, '0', $3)
         ON CONFLICT (user_id) DO UPDATE
         SET available = (ledger_balances.available::numeric + $2::numeric)::text,
             updated_at = $3",
    )
    .bind(user_id)
    .bind(amount.to_string())
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn transfer_leg(tx: &mut Transaction<'_, Postgres>, transfer: &Transfer) -> Result<()> {
    sqlx::query(
        "INSERT INTO transfers (id, from_user_id, to_user_id, amount, note, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(transfer.id)
    .bind(transfer.from_user_id)
    .bind(transfer.to_user_id)
    .bind(transfer.amount.to_string())
    .bind(&transfer.note)
    .bind(transfer.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[async_trait]
impl LedgerRepository for PostgresLedgerRepository {
    async fn get_balance(&self, user_id: i64) -> Result<Option<LedgerBalance>> {
        debug!("Getting balance from database for user {}", user_id);

        let row = sqlx::query(
            "SELECT user_id, available, locked, updated_at
             FROM ledger_balances
             WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(balance_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn ensure_balance(&self, user_id: i64) -> Result<LedgerBalance> {
        debug!("Ensuring balance row exists for user {}", user_id);

        if let Some(balance) = self.get_balance(user_id).await? {
            return Ok(balance);
        }

        let balance = LedgerBalance::new(user_id);

        sqlx::query(
            "INSERT INTO ledger_balances (user_id, available, locked, updated_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(balance.available.to_string())
        .bind(balance.locked.to_string())
        .bind(balance.updated_at)
        .execute(&self.pool)
        .await?;

        // A concurrent insert may have won; read back the row either way
        self.get_balance(user_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Failed to create balance for user {}", user_id)))
    }

    async fn credit(
        &self,
        user_id: i64,
        amount: Amount,
        holding: Option<Holding>,
    ) -> Result<LedgerBalance> {
        debug!("Crediting {} to user {}", amount, user_id);

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "INSERT INTO ledger_balances (user_id, available, locked, updated_at)
             VALUES ($1, $2, '0', $3)
             ON CONFLICT (user_id) DO UPDATE
             SET available = (ledger_balances.available::numeric + $2::numeric)::text,
                 updated_at = $3
             RETURNING user_id, available, locked, updated_at",
        )
        .bind(user_id)
        .bind(amount.to_string())
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;
        let balance = balance_from_row(&row)?;

        if let Some(holding) = holding {
            sqlx::query(
                "INSERT INTO holdings (id, user_id, amount, period_code, expires_at, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(holding.id)
            .bind(holding.user_id)
            .bind(holding.amount.to_string())
            .bind(&holding.period_code)
            .bind(holding.expires_at)
            .bind(holding.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(balance)
    }

    async fn reserve(
        &self,
        user_id: i64,
        amount: Amount,
        required_available: Amount,
    ) -> Result<u64> {
        // Decimal columns are stored as TEXT; the predicate casts through
        // numeric so the comparison and arithmetic are exact
        let result = sqlx::query(
            "UPDATE ledger_balances
             SET available = (available::numeric - $2::numeric)::text,
                 locked = (locked::numeric + $2::numeric)::text,
                 updated_at = $4
             WHERE user_id = $1
               AND available::numeric >= $3::numeric",
        )
        .bind(user_id)
        .bind(amount.to_string())
        .bind(required_available.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn refund(&self, user_id: i64, amount: Amount) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE ledger_balances
             SET available = (available::numeric + $2::numeric)::text,
                 locked = (locked::numeric - $2::numeric)::text,
                 updated_at = $3
             WHERE user_id = $1
               AND locked::numeric >= $2::numeric",
        )
        .bind(user_id)
        .bind(amount.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn settle(
        &self,
        seller_id: i64,
        buyer_id: i64,
        amount: Amount,
        payout: Amount,
        transfer: Transfer,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE ledger_balances
             SET locked = (locked::numeric - $2::numeric)::text,
                 updated_at = $3
             WHERE user_id = $1
               AND locked::numeric >= $2::numeric",
        )
        .bind(seller_id)
        .bind(amount.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(0);
        }

        credit_leg(&mut tx, buyer_id, payout).await?;
        transfer_leg(&mut tx, &transfer).await?;

        tx.commit().await?;
        Ok(1)
    }

    async fn transfer_funds(
        &self,
        from_user_id: i64,
        to_user_id: i64,
        amount: Amount,
        required_available: Amount,
        transfer: Transfer,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE ledger_balances
             SET available = (available::numeric - $2::numeric)::text,
                 updated_at = $4
             WHERE user_id = $1
               AND available::numeric >= $3::numeric",
        )
        .bind(from_user_id)
        .bind(amount.to_string())
        .bind(required_available.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(0);
        }

        credit_leg(&mut tx, to_user_id, amount).await?;
        transfer_leg(&mut tx, &transfer).await?;

        tx.commit().await?;
        Ok(1)
    }

    async fn transfers_for_user(&self, user_id: i64) -> Result<Vec<Transfer>> {
        let rows = sqlx::query(
            "SELECT id, from_user_id, to_user_id, amount, note, created_at
             FROM transfers
             WHERE from_user_id = $1 OR to_user_id = $1
             ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transfer_from_row).collect()
    }

    async fn get_holding(&self, id: Uuid) -> Result<Option<Holding>> {
        let row = sqlx::query(
            "SELECT id, user_id, amount, period_code, expires_at, created_at
             FROM holdings
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(holding_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_holding(&self, holding: Holding) -> Result<Holding> {
        let result = sqlx::query(
            "UPDATE holdings
             SET period_code = $2, expires_at = $3
             WHERE id = $1",
        )
        .bind(holding.id)
        .bind(&holding.period_code)
        .bind(holding.expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Holding not found: {}", holding.id)));
        }

        Ok(holding)
    }

    async fn holdings_for_user(&self, user_id: i64) -> Result<Vec<Holding>> {
        let rows = sqlx::query(
            "SELECT id, user_id, amount, period_code, expires_at, created_at
             FROM holdings
             WHERE user_id = $1
             ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(holding_from_row).collect()
    }

    async fn active_holdings_total(&self, user_id: i64, now: DateTime<Utc>) -> Result<Amount> {
        let rows = sqlx::query(
            "SELECT amount FROM holdings
             WHERE user_id = $1 AND expires_at > $2",
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut total = Amount::ZERO;
        for row in rows {
            let amount: String = row.get("amount");
            total += parse_amount(&amount, "holding amount")?;
        }

        Ok(total)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("value")))
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value)
             VALUES ($1, $2)
             ON CONFLICT (key)
             DO UPDATE SET value = $2",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
