//! Repository for dispute data
//!
//! Uniqueness (one dispute per trade) is enforced at the storage layer: a
//! unique index in PostgreSQL, an atomic per-trade index entry in memory.
//! Either way, the second of two racing `openDispute` calls gets
//! `Conflict`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{Error, Result};
use common::model::dispute::{Dispute, DisputeStatus};
use dashmap::DashMap;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

/// Dispute repository trait defining the interface for dispute storage
#[async_trait]
pub trait DisputeRepository: Send + Sync {
    /// Insert a new dispute; fails with `Conflict` when the trade already
    /// has one
    async fn insert_dispute(&self, dispute: Dispute) -> Result<Dispute>;

    /// Get a dispute by ID
    async fn get_dispute(&self, id: Uuid) -> Result<Option<Dispute>>;

    /// Get the dispute on a trade, if any
    async fn get_by_trade(&self, trade_id: Uuid) -> Result<Option<Dispute>>;

    /// List all open disputes
    async fn list_open(&self) -> Result<Vec<Dispute>>;

    /// Record a resolution on an open dispute. Returns rows affected
    /// (0 when a concurrent resolver won).
    async fn resolve(
        &self,
        dispute_id: Uuid,
        status: DisputeStatus,
        note: Option<&str>,
        resolved_by_id: i64,
        resolved_at: DateTime<Utc>,
    ) -> Result<u64>;
}

/// In-memory repository for dispute data
pub struct InMemoryDisputeRepository {
    /// Disputes by ID
    pub disputes: DashMap<Uuid, Dispute>,
    /// Dispute IDs by trade ID (uniqueness index)
    pub by_trade: DashMap<Uuid, Uuid>,
}

impl InMemoryDisputeRepository {
    /// Create a new in-memory dispute repository
    pub fn new() -> Self {
        Self {
            disputes: DashMap::new(),
            by_trade: DashMap::new(),
        }
    }
}

impl Default for InMemoryDisputeRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DisputeRepository for InMemoryDisputeRepository {
    async fn insert_dispute(&self, dispute: Dispute) -> Result<Dispute> {
        // The entry API makes check-and-insert atomic on the trade index
        match self.by_trade.entry(dispute.trade_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::Conflict(format!(
                "trade {} already has a dispute",
                dispute.trade_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(dispute.id);
                self.disputes.insert(dispute.id, dispute.clone());
                Ok(dispute)
            }
        }
    }

    async fn get_dispute(&self, id: Uuid) -> Result<Option<Dispute>> {
        Ok(self.disputes.get(&id).map(|d| d.clone()))
    }

    async fn get_by_trade(&self, trade_id: Uuid) -> Result<Option<Dispute>> {
        match self.by_trade.get(&trade_id) {
            Some(dispute_id) => self.get_dispute(*dispute_id).await,
            None => Ok(None),
        }
    }

    async fn list_open(&self) -> Result<Vec<Dispute>> {
        let mut disputes: Vec<Dispute> = self
            .disputes
            .iter()
            .filter(|entry| entry.status == DisputeStatus::Open)
            .map(|entry| entry.clone())
            .collect();

        disputes.sort_by_key(|d| d.created_at);
        Ok(disputes)
    }

    async fn resolve(
        &self,
        dispute_id: Uuid,
        status: DisputeStatus,
        note: Option<&str>,
        resolved_by_id: i64,
        resolved_at: DateTime<Utc>,
    ) -> Result<u64> {
        if let Some(mut dispute) = self.disputes.get_mut(&dispute_id) {
            if dispute.status.can_transition_to(status) {
                dispute.status = status;
                dispute.resolution_note = note.map(|n| n.to_string());
                dispute.resolved_by_id = Some(resolved_by_id);
                dispute.resolved_at = Some(resolved_at);
                return Ok(1);
            }
        }
        Ok(0)
    }
}

/// PostgreSQL repository for dispute data
pub struct PostgresDisputeRepository {
    /// Database connection pool
    pool: PgPool,
}

impl PostgresDisputeRepository {
    /// Create a new PostgreSQL dispute repository over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn dispute_from_row(row: &sqlx::postgres::PgRow) -> Result<Dispute> {
    let status: String = row.get("status");

    Ok(Dispute {
        id: row.get("id"),
        trade_id: row.get("trade_id"),
        raised_by_id: row.get("raised_by_id"),
        status: DisputeStatus::parse(&status)?,
        reason: row.get("reason"),
        resolution_note: row.get("resolution_note"),
        resolved_by_id: row.get("resolved_by_id"),
        created_at: row.get("created_at"),
        resolved_at: row.get("resolved_at"),
    })
}

const DISPUTE_COLUMNS: &str = "id, trade_id, raised_by_id, status, reason, resolution_note, \
     resolved_by_id, created_at, resolved_at";

#[async_trait]
impl DisputeRepository for PostgresDisputeRepository {
    async fn insert_dispute(&self, dispute: Dispute) -> Result<Dispute> {
        debug!(
            "Inserting dispute {} on trade {} by user {}",
            dispute.id, dispute.trade_id, dispute.raised_by_id
        );

        let result = sqlx::query(
            "INSERT INTO disputes (id, trade_id, raised_by_id, status, reason, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(dispute.id)
        .bind(dispute.trade_id)
        .bind(dispute.raised_by_id)
        .bind(dispute.status.as_str())
        .bind(&dispute.reason)
        .bind(dispute.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(dispute),
            // The unique index on trade_id is the one-dispute-per-trade rule
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::Conflict(format!(
                    "trade {} already has a dispute",
                    dispute.trade_id
                )))
            }
            Err(e) => Err(Error::Storage(e)),
        }
    }

    async fn get_dispute(&self, id: Uuid) -> Result<Option<Dispute>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM disputes WHERE id = $1",
            DISPUTE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(dispute_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_by_trade(&self, trade_id: Uuid) -> Result<Option<Dispute>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM disputes WHERE trade_id = $1",
            DISPUTE_COLUMNS
        ))
        .bind(trade_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(dispute_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_open(&self) -> Result<Vec<Dispute>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM disputes WHERE status = 'OPEN' ORDER BY created_at",
            DISPUTE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(dispute_from_row).collect()
    }

    async fn resolve(
        &self,
        dispute_id: Uuid,
        status: DisputeStatus,
        note: Option<&str>,
        resolved_by_id: i64,
        resolved_at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE disputes
             SET status = $2, resolution_note = $3, resolved_by_id = $4, resolved_at = $5
             WHERE id = $1 AND status = 'OPEN'",
        )
        .bind(dispute_id)
        .bind(status.as_str())
        .bind(note)
        .bind(resolved_by_id)
        .bind(resolved_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
