//! Transfer audit records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Amount;

/// Immutable audit record of a balance-changing business event. Written
/// once per event (trade release, direct transfer) and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    /// Unique transfer ID
    pub id: Uuid,
    /// Paying user id
    pub from_user_id: i64,
    /// Receiving user id
    pub to_user_id: i64,
    /// Amount moved
    pub amount: Amount,
    /// Human-readable note (e.g. "trade #<id>")
    pub note: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    /// Create a new transfer record
    pub fn new(from_user_id: i64, to_user_id: i64, amount: Amount, note: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_user_id,
            to_user_id,
            amount,
            note,
            created_at: Utc::now(),
        }
    }
}
