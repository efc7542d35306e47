//! Time-locked holding model

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Amount;
use crate::error::{Error, Result};

/// Parse a holding period code of the form `<months>M` (e.g. `3M`, `12M`)
/// into a month count >= 1.
pub fn parse_period_months(code: &str) -> Result<u32> {
    let digits = code.strip_suffix('M').ok_or_else(|| {
        Error::InvalidPeriod(format!("period must match <months>M, got: {}", code))
    })?;

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidPeriod(format!(
            "period must match <months>M, got: {}",
            code
        )));
    }

    let months: u32 = digits
        .parse()
        .map_err(|_| Error::InvalidPeriod(format!("period out of range: {}", code)))?;

    if months == 0 {
        return Err(Error::InvalidPeriod(format!(
            "period must be at least one month, got: {}",
            code
        )));
    }

    Ok(months)
}

/// Compute an expiry timestamp `months` calendar months after `from`
pub fn expiry_after(from: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>> {
    from.checked_add_months(Months::new(months))
        .ok_or_else(|| Error::InvalidPeriod(format!("period overflows calendar: {}M", months)))
}

/// A time-locked balance increment. The amount sits in the user's balance
/// but is excluded from usable-balance computations until `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    /// Unique holding ID
    pub id: Uuid,
    /// Owning user id
    pub user_id: i64,
    /// Locked amount
    pub amount: Amount,
    /// Original period code (e.g. "6M")
    pub period_code: String,
    /// Lock expiry
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Holding {
    /// Create a holding locking `amount` for the period named by `period_code`
    pub fn new(user_id: i64, amount: Amount, period_code: &str) -> Result<Self> {
        let months = parse_period_months(period_code)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            period_code: period_code.to_string(),
            expires_at: expiry_after(now, months)?,
            created_at: now,
        })
    }

    /// Whether the holding still locks its amount at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn period_codes_parse() {
        assert_eq!(parse_period_months("1M").unwrap(), 1);
        assert_eq!(parse_period_months("12M").unwrap(), 12);
    }

    #[test]
    fn malformed_period_codes_rejected() {
        for code in ["", "M", "3", "3m", "-3M", "3.5M", "0M", "3W", "M3"] {
            assert!(
                matches!(parse_period_months(code), Err(Error::InvalidPeriod(_))),
                "accepted malformed code: {}",
                code
            );
        }
    }

    #[test]
    fn holding_expires_after_its_period() {
        let holding = Holding::new(7, dec!(100), "2M").unwrap();
        let now = Utc::now();
        assert!(holding.is_active(now));
        assert!(!holding.is_active(now + Duration::days(70)));
    }
}
