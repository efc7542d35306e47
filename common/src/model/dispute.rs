//! Dispute models and arbitration types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// How long after `paid_at` a buyer may still raise a dispute
pub const DISPUTE_WINDOW_HOURS: i64 = 2;

/// Dispute status. Open is the only mutable state; it transitions to
/// exactly one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeStatus {
    Open,
    Resolved,
    Rejected,
    Closed,
}

impl DisputeStatus {
    pub fn can_transition_to(self, next: DisputeStatus) -> bool {
        self == DisputeStatus::Open && next != DisputeStatus::Open
    }

    pub fn is_terminal(self) -> bool {
        self != DisputeStatus::Open
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Open => "OPEN",
            DisputeStatus::Resolved => "RESOLVED",
            DisputeStatus::Rejected => "REJECTED",
            DisputeStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "OPEN" => Ok(DisputeStatus::Open),
            "RESOLVED" => Ok(DisputeStatus::Resolved),
            "REJECTED" => Ok(DisputeStatus::Rejected),
            "CLOSED" => Ok(DisputeStatus::Closed),
            other => Err(Error::Internal(format!("unknown dispute status: {}", other))),
        }
    }
}

/// Terminal outcome an arbiter records on a dispute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeOutcome {
    Resolved,
    Rejected,
    Closed,
}

impl DisputeOutcome {
    /// The dispute status this outcome lands on
    pub fn status(self) -> DisputeStatus {
        match self {
            DisputeOutcome::Resolved => DisputeStatus::Resolved,
            DisputeOutcome::Rejected => DisputeStatus::Rejected,
            DisputeOutcome::Closed => DisputeStatus::Closed,
        }
    }
}

/// What the arbiter does to the disputed trade alongside the resolution.
/// `NoAction` leaves the trade Disputed permanently (terminal by
/// convention); callers are expected to pair a resolution with a release
/// or cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Release,
    Cancel,
    NoAction,
}

/// Dispute model: at most one per trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    /// Unique dispute ID
    pub id: Uuid,
    /// The disputed trade (unique)
    pub trade_id: Uuid,
    /// User who raised the dispute
    pub raised_by_id: i64,
    /// Current status
    pub status: DisputeStatus,
    /// Reason given by the raiser
    pub reason: String,
    /// Arbiter's note on resolution
    pub resolution_note: Option<String>,
    /// Arbiter who resolved the dispute
    pub resolved_by_id: Option<i64>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Resolution timestamp
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Dispute {
    /// Open a new dispute on a trade
    pub fn new(trade_id: Uuid, raised_by_id: i64, reason: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            trade_id,
            raised_by_id,
            status: DisputeStatus::Open,
            reason,
            resolution_note: None,
            resolved_by_id: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}
