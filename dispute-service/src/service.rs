//! Dispute arbiter implementation
//!
//! A party to a trade can escalate after the fiat leg is marked paid; an
//! admin then forces the outcome. Buyer-raised disputes must arrive within
//! the dispute window after `paid_at`, so a seller cannot be held hostage
//! indefinitely by a buyer who paid and went silent.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::error::{Error, Result};
use common::model::actor::Actor;
use common::model::dispute::{Dispute, DisputeOutcome, TradeAction, DISPUTE_WINDOW_HOURS};
use common::model::trade::TradeStatus;
use trade_service::TradeService;
use tracing::{error, info};
use uuid::Uuid;

use crate::repository::{DisputeRepository, InMemoryDisputeRepository};

/// Dispute arbiter service
pub struct DisputeService {
    /// Repository for dispute data
    repo: Arc<dyn DisputeRepository>,
    /// Trade engine whose outcomes arbitration forces
    trades: Arc<TradeService>,
}

impl DisputeService {
    /// Create a dispute service over the given repository and trade engine
    pub fn new(repo: Arc<dyn DisputeRepository>, trades: Arc<TradeService>) -> Self {
        Self { repo, trades }
    }

    /// Create a dispute service backed by an in-memory repository
    pub fn in_memory(trades: Arc<TradeService>) -> Self {
        Self::new(Arc::new(InMemoryDisputeRepository::new()), trades)
    }

    /// Open a dispute on a trade. Only a party to the trade may raise one,
    /// only while the trade is PaidPendingRelease, and at most one dispute
    /// ever exists per trade. A buyer must raise within
    /// `DISPUTE_WINDOW_HOURS` of `paid_at`.
    pub async fn open_dispute(
        &self,
        actor: Actor,
        trade_id: Uuid,
        reason: String,
    ) -> Result<Dispute> {
        let trade = self.trades.get_trade(trade_id).await?;

        if !trade.is_party(actor.id) {
            return Err(Error::Forbidden(format!(
                "user {} is not a party to trade {}",
                actor.id, trade_id
            )));
        }

        if self.repo.get_by_trade(trade_id).await?.is_some() {
            return Err(Error::Conflict(format!(
                "trade {} already has a dispute",
                trade_id
            )));
        }

        if trade.status != TradeStatus::PaidPendingRelease {
            return Err(Error::InvalidState(format!(
                "trade {} is {}, disputes can only be opened after payment is marked",
                trade_id,
                trade.status.as_str()
            )));
        }

        if actor.id == trade.buyer_id {
            if let Some(paid_at) = trade.paid_at {
                let deadline = paid_at + Duration::hours(DISPUTE_WINDOW_HOURS);
                let now = Utc::now();
                if now > deadline {
                    return Err(Error::WindowExpired(format!(
                        "dispute window for trade {} closed at {}, now {}",
                        trade_id, deadline, now
                    )));
                }
            }
        }

        // Freeze the trade first: the guarded flip leaves one winner, so a
        // lost race (a concurrent release) writes no dispute record at all
        self.trades.set_disputed(trade_id).await?;

        match self
            .repo
            .insert_dispute(Dispute::new(trade_id, actor.id, reason))
            .await
        {
            Ok(dispute) => {
                info!(
                    "Dispute {} opened on trade {} by user {}",
                    dispute.id, trade_id, actor.id
                );
                Ok(dispute)
            }
            Err(e) => {
                error!(
                    "Dispute on trade {} could not be recorded, unfreezing: {}",
                    trade_id, e
                );
                if let Err(revert_err) = self.trades.revert_disputed(trade_id).await {
                    error!("Failed to unfreeze trade {}: {}", trade_id, revert_err);
                }
                Err(e)
            }
        }
    }

    /// Resolve an open dispute, recording the outcome and optionally
    /// forcing the trade's final state. `TradeAction::NoAction` leaves the
    /// trade Disputed with only the dispute record closed.
    pub async fn resolve_dispute(
        &self,
        resolver: Actor,
        dispute_id: Uuid,
        outcome: DisputeOutcome,
        note: Option<String>,
        trade_action: TradeAction,
    ) -> Result<Dispute> {
        if !resolver.admin {
            return Err(Error::Forbidden(format!(
                "user {} lacks arbitration authority",
                resolver.id
            )));
        }

        let dispute = self.get_dispute(dispute_id).await?;

        if !dispute.status.can_transition_to(outcome.status()) {
            return Err(Error::InvalidState(format!(
                "dispute {} is {}, only open disputes can be resolved",
                dispute_id,
                dispute.status.as_str()
            )));
        }

        // Apply the trade outcome before recording the resolution: if the
        // forced settlement fails, the dispute stays open and retryable
        match trade_action {
            TradeAction::Release => {
                self.trades.force_release(dispute.trade_id).await?;
            }
            TradeAction::Cancel => {
                self.trades.force_cancel(dispute.trade_id).await?;
            }
            TradeAction::NoAction => {}
        }

        let rows = self
            .repo
            .resolve(
                dispute_id,
                outcome.status(),
                note.as_deref(),
                resolver.id,
                Utc::now(),
            )
            .await?;
        if rows == 0 {
            return Err(Error::Conflict(format!(
                "dispute {} was resolved concurrently",
                dispute_id
            )));
        }

        info!(
            "Dispute {} resolved as {} by user {} (trade action: {:?})",
            dispute_id,
            outcome.status().as_str(),
            resolver.id,
            trade_action
        );

        self.get_dispute(dispute_id).await
    }

    /// Get a dispute by ID
    pub async fn get_dispute(&self, dispute_id: Uuid) -> Result<Dispute> {
        self.repo
            .get_dispute(dispute_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Dispute not found: {}", dispute_id)))
    }

    /// Get the dispute on a trade, if any
    pub async fn dispute_for_trade(&self, trade_id: Uuid) -> Result<Option<Dispute>> {
        self.repo.get_by_trade(trade_id).await
    }

    /// List all open disputes (admin projection)
    pub async fn open_disputes(&self) -> Result<Vec<Dispute>> {
        self.repo.list_open().await
    }
}
