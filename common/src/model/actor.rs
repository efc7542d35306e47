//! Caller identity as resolved by the request layer

use serde::{Deserialize, Serialize};

/// An authenticated caller. The request layer has already verified the
/// session and resolved the internal numeric user id; the engine only
/// checks roles against it. `admin` grants arbitration authority and
/// access to the admin-only ledger operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Internal numeric user id
    pub id: i64,
    /// Admin flag
    pub admin: bool,
}

impl Actor {
    /// Create an ordinary (non-admin) actor
    pub fn new(id: i64) -> Self {
        Self { id, admin: false }
    }

    /// Create an actor with admin authority
    pub fn new_admin(id: i64) -> Self {
        Self { id, admin: true }
    }
}
