//! Engine settings
//!
//! Two mutable settings drive the core: the release fee rate and the
//! holding balance floor. They are stored in the settings table and
//! re-read at the start of each operation that needs them, so an admin
//! change takes effect on the next call without a restart.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::precision::SETTING_MAX_SCALE;
use crate::error::{Error, Result};

/// Settings key for the release fee rate (percent, 0-100)
pub const P2P_FEE_RATE: &str = "p2p_fee_rate";

/// Settings key for the holding balance floor
pub const HOLDING_FDA_AMOUNT: &str = "holding_fda_amount";

/// Snapshot of the settings an operation reads at its start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Fee rate applied at trade release, as a percentage (0-100)
    pub fee_rate: Decimal,
    /// Minimum balance excluded from usable-balance computations
    pub holding_floor: Decimal,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fee_rate: Decimal::ZERO,
            holding_floor: Decimal::ZERO,
        }
    }
}

/// Validate a fee rate: a percentage between 0 and 100 inclusive
pub fn validate_fee_rate(rate: Decimal) -> Result<()> {
    if rate < Decimal::ZERO || rate > Decimal::from(100) {
        return Err(Error::ValidationError(format!(
            "fee rate must be a percentage between 0 and 100, got {}",
            rate
        )));
    }
    Ok(())
}

/// Validate a holding floor: non-negative, at most 18 fractional digits
pub fn validate_holding_floor(amount: Decimal) -> Result<()> {
    if amount < Decimal::ZERO {
        return Err(Error::ValidationError(format!(
            "holding floor must be non-negative, got {}",
            amount
        )));
    }
    if amount.scale() > SETTING_MAX_SCALE {
        return Err(Error::ValidationError(format!(
            "holding floor supports at most {} fractional digits, got {}",
            SETTING_MAX_SCALE,
            amount.scale()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fee_rate_bounds() {
        assert!(validate_fee_rate(dec!(0)).is_ok());
        assert!(validate_fee_rate(dec!(2.5)).is_ok());
        assert!(validate_fee_rate(dec!(100)).is_ok());
        assert!(validate_fee_rate(dec!(-1)).is_err());
        assert!(validate_fee_rate(dec!(100.01)).is_err());
    }

    #[test]
    fn holding_floor_bounds() {
        assert!(validate_holding_floor(dec!(0)).is_ok());
        assert!(validate_holding_floor(dec!(0.000000000000000001)).is_ok());
        assert!(validate_holding_floor(dec!(-0.1)).is_err());
    }
}
