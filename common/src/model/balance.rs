//! Ledger balance model
//!
//! A balance is split into `available` and `locked` counters rather than a
//! single pre-debited figure: funds committed to an open SELL offer (or by
//! the acceptor of a BUY offer) move to `locked` and either return via
//! `refund` or leave the ledger via `capture` at release.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Amount;

/// Ledger balance for a single user. One row per user, created lazily.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerBalance {
    /// Internal numeric user id
    pub user_id: i64,
    /// Funds spendable on new commitments
    pub available: Amount,
    /// Funds committed to open offers or pending trades
    pub locked: Amount,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl LedgerBalance {
    /// Create a new balance with zero amounts
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            available: Amount::ZERO,
            locked: Amount::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Total balance across both counters
    pub fn total(&self) -> Amount {
        self.available + self.locked
    }

    /// Move funds from available to locked, as escrow for a commitment
    pub fn reserve(&mut self, amount: Amount) -> Result<(), String> {
        if amount > self.available {
            return Err(format!(
                "short by {}: available {} < required {}",
                amount - self.available,
                self.available,
                amount
            ));
        }

        self.available -= amount;
        self.locked += amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Return previously reserved funds to available (commitment cancelled)
    pub fn refund(&mut self, amount: Amount) -> Result<(), String> {
        if amount > self.locked {
            return Err(format!(
                "refund {} exceeds locked {}",
                amount, self.locked
            ));
        }

        self.locked -= amount;
        self.available += amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Remove reserved funds from the ledger (commitment settled)
    pub fn capture(&mut self, amount: Amount) -> Result<(), String> {
        if amount > self.locked {
            return Err(format!(
                "capture {} exceeds locked {}",
                amount, self.locked
            ));
        }

        self.locked -= amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Add funds to the balance
    pub fn deposit(&mut self, amount: Amount) {
        self.available += amount;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn reserve_then_refund_restores_available() {
        let mut balance = LedgerBalance::new(1);
        balance.deposit(dec!(10));

        balance.reserve(dec!(4)).unwrap();
        assert_eq!(balance.available, dec!(6));
        assert_eq!(balance.locked, dec!(4));
        assert_eq!(balance.total(), dec!(10));

        balance.refund(dec!(4)).unwrap();
        assert_eq!(balance.available, dec!(10));
        assert_eq!(balance.locked, Amount::ZERO);
    }

    #[test]
    fn capture_removes_funds_from_circulation() {
        let mut balance = LedgerBalance::new(1);
        balance.deposit(dec!(5));
        balance.reserve(dec!(5)).unwrap();

        balance.capture(dec!(5)).unwrap();
        assert_eq!(balance.total(), Amount::ZERO);
    }

    #[test]
    fn reserve_shortfall_reports_deficit() {
        let mut balance = LedgerBalance::new(1);
        balance.deposit(dec!(3));

        let err = balance.reserve(dec!(5)).unwrap_err();
        assert!(err.contains("short by 2"), "unexpected message: {}", err);
        // nothing moved
        assert_eq!(balance.available, dec!(3));
        assert_eq!(balance.locked, Amount::ZERO);
    }

    #[test]
    fn capture_cannot_exceed_locked() {
        let mut balance = LedgerBalance::new(1);
        balance.deposit(dec!(2));
        balance.reserve(dec!(1)).unwrap();

        assert!(balance.capture(dec!(2)).is_err());
        assert!(balance.refund(dec!(2)).is_err());
    }
}
