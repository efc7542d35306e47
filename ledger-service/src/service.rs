//! Ledger service implementation
//!
//! Owns every balance mutation in the engine. The escrow scheme is
//! reserve/capture/refund: funds committed to an open offer or a pending
//! trade move from `available` to `locked`, return via `refund` when the
//! commitment is cancelled, and leave the seller's ledger via `capture`
//! when a trade releases. The release fee is not credited to anyone, so
//! capturing the full amount while paying out `amount - fee` burns the
//! fee from circulation.
//!
//! The pre-checks here exist for their error messages; the repository's
//! guarded writes are what actually enforce the balance invariants under
//! concurrency.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use common::decimal::{Amount, Decimal};
use common::error::{Error, Result};
use common::model::actor::Actor;
use common::model::balance::LedgerBalance;
use common::model::holding::{expiry_after, parse_period_months, Holding};
use common::model::settings::{
    validate_fee_rate, validate_holding_floor, EngineSettings, HOLDING_FDA_AMOUNT, P2P_FEE_RATE,
};
use common::model::transfer::Transfer;
use tracing::{debug, info};
use uuid::Uuid;

use crate::repository::{InMemoryLedgerRepository, LedgerRepository, PostgresLedgerRepository};

/// Ledger service for managing balances, holdings, transfers, and settings
pub struct LedgerService {
    /// Repository for ledger data
    repo: Arc<dyn LedgerRepository>,
}

/// Repository Type
pub enum RepositoryType {
    /// In-memory repository
    InMemory,
    /// PostgreSQL repository
    Postgres(Option<String>),
}

impl LedgerService {
    /// Create a new ledger service backed by an in-memory repository
    pub fn new() -> Self {
        Self {
            repo: Arc::new(InMemoryLedgerRepository::new()),
        }
    }

    /// Create a new ledger service with a specific repository type
    pub async fn with_repository(repo_type: RepositoryType) -> Result<Self> {
        let repo: Arc<dyn LedgerRepository> = match repo_type {
            RepositoryType::InMemory => Arc::new(InMemoryLedgerRepository::new()),
            RepositoryType::Postgres(database_url) => {
                Arc::new(PostgresLedgerRepository::new(database_url).await?)
            }
        };

        Ok(Self { repo })
    }

    /// Create a new ledger service with a configuration
    pub async fn with_config(config: &crate::config::LedgerServiceConfig) -> Result<Self> {
        let repo: Arc<dyn LedgerRepository> =
            Arc::new(PostgresLedgerRepository::with_config(config).await?);

        Ok(Self { repo })
    }

    /// Create a ledger service over an already-constructed repository
    pub fn with_shared(repo: Arc<dyn LedgerRepository>) -> Self {
        Self { repo }
    }

    /// Read the engine settings, applying defaults for unset keys
    pub async fn settings(&self) -> Result<EngineSettings> {
        let mut settings = EngineSettings::default();

        if let Some(value) = self.repo.get_setting(P2P_FEE_RATE).await? {
            settings.fee_rate = Decimal::from_str(&value).map_err(|e| {
                Error::ConfigurationError(format!("invalid {} setting: {}", P2P_FEE_RATE, e))
            })?;
        }

        if let Some(value) = self.repo.get_setting(HOLDING_FDA_AMOUNT).await? {
            settings.holding_floor = Decimal::from_str(&value).map_err(|e| {
                Error::ConfigurationError(format!("invalid {} setting: {}", HOLDING_FDA_AMOUNT, e))
            })?;
        }

        Ok(settings)
    }

    /// Set the release fee rate (admin only)
    pub async fn set_fee_rate(&self, actor: Actor, rate: Decimal) -> Result<()> {
        if !actor.admin {
            return Err(Error::Forbidden(format!(
                "user {} cannot change settings",
                actor.id
            )));
        }
        validate_fee_rate(rate)?;

        info!("Setting {} to {}", P2P_FEE_RATE, rate);
        self.repo.put_setting(P2P_FEE_RATE, &rate.to_string()).await
    }

    /// Set the holding balance floor (admin only)
    pub async fn set_holding_floor(&self, actor: Actor, amount: Decimal) -> Result<()> {
        if !actor.admin {
            return Err(Error::Forbidden(format!(
                "user {} cannot change settings",
                actor.id
            )));
        }
        validate_holding_floor(amount)?;

        info!("Setting {} to {}", HOLDING_FDA_AMOUNT, amount);
        self.repo
            .put_setting(HOLDING_FDA_AMOUNT, &amount.to_string())
            .await
    }

    /// Get a user's balance, creating the row lazily
    pub async fn balance(&self, user_id: i64) -> Result<LedgerBalance> {
        self.repo.ensure_balance(user_id).await
    }

    /// Compute a user's usable balance:
    /// `available - holding_floor - sum(unexpired holdings)`.
    /// Funds locked in open offers or pending trades are already outside
    /// `available`. The result may be negative.
    pub async fn usable_balance(&self, user_id: i64) -> Result<Amount> {
        let balance = self.repo.ensure_balance(user_id).await?;
        let settings = self.settings().await?;
        let held = self.repo.active_holdings_total(user_id, Utc::now()).await?;

        Ok(balance.available - settings.holding_floor - held)
    }

    /// Reserve funds as escrow for a new commitment (SELL-offer creation or
    /// BUY-offer acceptance). Fails with `InsufficientFunds` carrying the
    /// numeric shortfall when either the available or the usable balance
    /// cannot cover `amount`, and with `Conflict` when a concurrent
    /// mutation consumed the funds between the checks and the write.
    pub async fn reserve(&self, user_id: i64, amount: Amount) -> Result<LedgerBalance> {
        debug!("Reserving {} for user {}", amount, user_id);

        let balance = self.repo.ensure_balance(user_id).await?;
        if balance.available < amount {
            return Err(Error::InsufficientFunds(format!(
                "user {} short by {}: balance {} < required {}",
                user_id,
                amount - balance.available,
                balance.available,
                amount
            )));
        }

        let settings = self.settings().await?;
        let held = self.repo.active_holdings_total(user_id, Utc::now()).await?;
        let usable = balance.available - settings.holding_floor - held;
        if usable < amount {
            return Err(Error::InsufficientFunds(format!(
                "user {} short by {}: usable balance {} < required {}",
                user_id,
                amount - usable,
                usable,
                amount
            )));
        }

        // usable >= amount means available >= amount + floor + held; the
        // guarded write re-checks that bound against the current row
        let required = amount + settings.holding_floor + held;
        let rows = self.repo.reserve(user_id, amount, required).await?;
        if rows == 0 {
            return Err(Error::Conflict(format!(
                "balance for user {} changed concurrently, reserve of {} not applied",
                user_id, amount
            )));
        }

        self.repo.ensure_balance(user_id).await
    }

    /// Return previously reserved funds to available (offer or trade
    /// commitment cancelled)
    pub async fn refund(&self, user_id: i64, amount: Amount) -> Result<LedgerBalance> {
        debug!("Refunding {} to user {}", amount, user_id);

        let rows = self.repo.refund(user_id, amount).await?;
        if rows == 0 {
            return Err(Error::Internal(format!(
                "refund of {} exceeds locked funds for user {}",
                amount, user_id
            )));
        }

        self.repo.ensure_balance(user_id).await
    }

    /// Settle a released trade: burn `amount` from the seller's locked
    /// funds, credit `payout` to the buyer, and write the transfer audit
    /// record. The difference `amount - payout` is the fee, retained by
    /// crediting it to no one. All three legs apply together or not at all.
    pub async fn capture_release(
        &self,
        seller_id: i64,
        buyer_id: i64,
        amount: Amount,
        payout: Amount,
        note: String,
    ) -> Result<()> {
        let fee = amount - payout;

        debug!(
            "Capturing {} from user {} (fee {}), paying {} to user {}",
            amount, seller_id, fee, payout, buyer_id
        );

        let transfer = Transfer::new(seller_id, buyer_id, payout, note);
        let rows = self
            .repo
            .settle(seller_id, buyer_id, amount, payout, transfer)
            .await?;
        if rows == 0 {
            return Err(Error::InsufficientFunds(format!(
                "capture {} exceeds locked funds for user {}",
                amount, seller_id
            )));
        }

        Ok(())
    }

    /// Credit a user's balance from a trusted external funding event,
    /// optionally time-locking the amount behind a holding. Rejects
    /// non-positive amounts and malformed period codes before mutating
    /// anything.
    pub async fn fund(
        &self,
        user_id: i64,
        amount: Amount,
        period_code: Option<&str>,
    ) -> Result<LedgerBalance> {
        if amount <= Amount::ZERO {
            return Err(Error::ValidationError(format!(
                "funding amount must be positive, got {}",
                amount
            )));
        }

        // Validate the period before any state changes
        let holding = match period_code {
            Some(code) => Some(Holding::new(user_id, amount, code)?),
            None => None,
        };

        info!(
            "Funding user {} with {}{}",
            user_id,
            amount,
            period_code.map(|c| format!(" held for {}", c)).unwrap_or_default()
        );

        self.repo.credit(user_id, amount, holding).await
    }

    /// Move available balance from the actor to another user, writing a
    /// transfer audit record. The usable-balance rule applies: time-locked
    /// holdings and the holding floor cannot be sent away.
    pub async fn transfer(
        &self,
        actor: Actor,
        to_user_id: i64,
        amount: Amount,
        note: String,
    ) -> Result<Transfer> {
        if amount <= Amount::ZERO {
            return Err(Error::ValidationError(format!(
                "transfer amount must be positive, got {}",
                amount
            )));
        }
        if actor.id == to_user_id {
            return Err(Error::ValidationError(
                "cannot transfer to yourself".to_string(),
            ));
        }

        let balance = self.repo.ensure_balance(actor.id).await?;
        let settings = self.settings().await?;
        let held = self.repo.active_holdings_total(actor.id, Utc::now()).await?;
        let usable = balance.available - settings.holding_floor - held;
        if usable < amount {
            return Err(Error::InsufficientFunds(format!(
                "user {} short by {}: usable balance {} < required {}",
                actor.id,
                amount - usable,
                usable,
                amount
            )));
        }

        let transfer = Transfer::new(actor.id, to_user_id, amount, note);
        let required = amount + settings.holding_floor + held;
        let rows = self
            .repo
            .transfer_funds(actor.id, to_user_id, amount, required, transfer.clone())
            .await?;
        if rows == 0 {
            return Err(Error::Conflict(format!(
                "balance for user {} changed concurrently, transfer of {} not applied",
                actor.id, amount
            )));
        }

        Ok(transfer)
    }

    /// Re-lock a holding for a new period, measured from now rather than
    /// from the holding's creation time (admin only)
    pub async fn update_holding_period(
        &self,
        actor: Actor,
        holding_id: Uuid,
        new_period_code: &str,
    ) -> Result<Holding> {
        if !actor.admin {
            return Err(Error::Forbidden(format!(
                "user {} cannot update holding periods",
                actor.id
            )));
        }

        let months = parse_period_months(new_period_code)?;

        let mut holding = self
            .repo
            .get_holding(holding_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Holding not found: {}", holding_id)))?;

        holding.period_code = new_period_code.to_string();
        holding.expires_at = expiry_after(Utc::now(), months)?;

        info!(
            "Holding {} re-locked for {} (expires {})",
            holding_id, new_period_code, holding.expires_at
        );

        self.repo.update_holding(holding).await
    }

    /// List a user's holdings
    pub async fn holdings(&self, user_id: i64) -> Result<Vec<Holding>> {
        self.repo.holdings_for_user(user_id).await
    }

    /// List transfers a user was party to
    pub async fn transfers(&self, user_id: i64) -> Result<Vec<Transfer>> {
        self.repo.transfers_for_user(user_id).await
    }
}

impl Default for LedgerService {
    fn default() -> Self {
        Self::new()
    }
}
