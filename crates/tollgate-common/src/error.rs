//! Error types for money arithmetic

use thiserror::Error;

/// Money arithmetic error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// Two amounts in different currencies were combined
    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch {
        /// Currency of the left-hand amount
        expected: String,
        /// Currency of the right-hand amount
        found: String,
    },

    /// Result does not fit in i64 minor units
    #[error("amount overflow")]
    Overflow,

    /// Negative amount where only non-negative amounts are allowed
    #[error("amount cannot be negative: {0}")]
    NegativeAmount(i64),

    /// Currency code is not a usable code
    #[error("invalid currency code: {0:?}")]
    InvalidCurrency(String),
}

/// Result type for money arithmetic
pub type MoneyResult<T> = Result<T, MoneyError>;
