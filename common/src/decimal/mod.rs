//! Decimal type utilities for precise financial calculations

pub use rust_decimal::Decimal;
pub use rust_decimal_macros::dec;

/// Price type with high precision
pub type Price = Decimal;

/// Quantity type with high precision
pub type Quantity = Decimal;

/// Amount type with high precision (typically Price * Quantity)
pub type Amount = Decimal;

/// Precision helpers for common operations
pub mod precision {
    use super::*;

    /// Default amount precision (8 decimal places)
    pub const AMOUNT_PRECISION: u32 = 8;

    /// Maximum fractional digits accepted for the holding floor setting
    pub const SETTING_MAX_SCALE: u32 = 18;

    /// Round an amount to standard precision
    pub fn round_amount(amount: Amount) -> Amount {
        amount.round_dp(AMOUNT_PRECISION)
    }
}
