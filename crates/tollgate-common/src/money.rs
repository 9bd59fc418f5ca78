//! Money Value Object
//!
//! Immutable minor-unit amount with currency, plus the rounding policy shared
//! by every component that scales an amount.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{MoneyError, MoneyResult};

/// 10000 basis points = 100%
pub const BASIS_POINTS_SCALE: i64 = 10_000;

/// Round a decimal minor-unit value to a whole minor unit, half away from zero.
pub fn round_minor(value: Decimal) -> MoneyResult<i64> {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(MoneyError::Overflow)
}

/// Scale a minor-unit amount by `ratio` and round once.
pub fn apply_ratio(amount: i64, ratio: Decimal) -> MoneyResult<i64> {
    let scaled = Decimal::from(amount)
        .checked_mul(ratio)
        .ok_or(MoneyError::Overflow)?;
    round_minor(scaled)
}

/// Decimal ratio for a basis-point value (900 -> 0.09).
pub fn basis_points_ratio(basis_points: i64) -> Decimal {
    Decimal::new(basis_points, 4)
}

/// `amount * basis_points / 10000`, rounded half away from zero.
pub fn apply_basis_points(amount: i64, basis_points: i64) -> MoneyResult<i64> {
    apply_ratio(amount, basis_points_ratio(basis_points))
}

/// Money value object: integer minor units tagged with a currency
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount: i64,
    currency: Currency,
}

impl Money {
    /// Create a new money value from minor units
    pub fn new(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Create zero money
    pub fn zero(currency: Currency) -> Self {
        Self { amount: 0, currency }
    }

    /// Get the amount in minor units
    pub fn amount(&self) -> i64 {
        self.amount
    }

    /// Get the currency
    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Check if same currency
    pub fn same_currency(&self, other: &Money) -> bool {
        self.currency == other.currency
    }

    fn ensure_same_currency(&self, other: &Money) -> MoneyResult<()> {
        if self.same_currency(other) {
            Ok(())
        } else {
            Err(MoneyError::CurrencyMismatch {
                expected: self.currency.code().to_string(),
                found: other.currency.code().to_string(),
            })
        }
    }

    /// Add money (must be same currency)
    pub fn checked_add(&self, other: &Money) -> MoneyResult<Money> {
        self.ensure_same_currency(other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(amount, self.currency.clone()))
    }

    /// Subtract money (must be same currency)
    pub fn checked_sub(&self, other: &Money) -> MoneyResult<Money> {
        self.ensure_same_currency(other)?;
        let amount = self
            .amount
            .checked_sub(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(amount, self.currency.clone()))
    }

    /// Smaller of two amounts (must be same currency)
    pub fn min(&self, other: &Money) -> MoneyResult<Money> {
        self.ensure_same_currency(other)?;
        Ok(Money::new(self.amount.min(other.amount), self.currency.clone()))
    }

    /// Multiply by an integer quantity
    pub fn times(&self, quantity: i64) -> MoneyResult<Money> {
        let amount = self
            .amount
            .checked_mul(quantity)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(amount, self.currency.clone()))
    }

    /// Multiply by a ratio, rounding half away from zero
    pub fn scale(&self, ratio: Decimal) -> MoneyResult<Money> {
        Ok(Money::new(apply_ratio(self.amount, ratio)?, self.currency.clone()))
    }

    /// Same amount, floored at zero
    pub fn clamp_non_negative(&self) -> Money {
        Money::new(self.amount.max(0), self.currency.clone())
    }

    /// Check if positive
    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }

    /// Check if negative
    pub fn is_negative(&self) -> bool {
        self.amount < 0
    }

    /// Check if zero
    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.currency, self.amount)
    }
}

/// ISO currency code. Parsing is case-insensitive; codes are stored upper case.
///
/// Equality and hashing ignore case, so a hand-built `Other("usd")` still
/// equals `USD`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Currency {
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
    JPY,
    CNY,
    INR,
    /// Any other code, upper case
    Other(String),
}

impl Currency {
    /// Code as an upper-case string
    pub fn code(&self) -> &str {
        match self {
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
            Self::CAD => "CAD",
            Self::AUD => "AUD",
            Self::JPY => "JPY",
            Self::CNY => "CNY",
            Self::INR => "INR",
            Self::Other(code) => code,
        }
    }

    /// Parse a currency code, ignoring case and surrounding whitespace
    pub fn parse(code: &str) -> MoneyResult<Self> {
        let normalized = code.trim().to_uppercase();
        if normalized.is_empty() || !normalized.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(MoneyError::InvalidCurrency(code.to_string()));
        }
        Ok(match normalized.as_str() {
            "USD" => Self::USD,
            "EUR" => Self::EUR,
            "GBP" => Self::GBP,
            "CAD" => Self::CAD,
            "AUD" => Self::AUD,
            "JPY" => Self::JPY,
            "CNY" => Self::CNY,
            "INR" => Self::INR,
            _ => Self::Other(normalized),
        })
    }
}

impl Currency {
    fn normalized(&self) -> &str {
        self.code().trim()
    }
}

impl PartialEq for Currency {
    fn eq(&self, other: &Self) -> bool {
        self.normalized().eq_ignore_ascii_case(other.normalized())
    }
}

impl Eq for Currency {}

impl Hash for Currency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.normalized().bytes() {
            state.write_u8(byte.to_ascii_uppercase());
        }
        state.write_u8(0xff);
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        Self::parse(&code)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.normalized().to_ascii_uppercase()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized().to_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_minor(dec!(914.5)).unwrap(), 915);
        assert_eq!(round_minor(dec!(914.49)).unwrap(), 914);
        assert_eq!(round_minor(dec!(-914.5)).unwrap(), -915);
        assert_eq!(round_minor(dec!(0.5)).unwrap(), 1);
    }

    #[test]
    fn test_apply_ratio() {
        assert_eq!(apply_ratio(1000, dec!(0.92)).unwrap(), 920);
        assert_eq!(apply_ratio(1000, dec!(0.915)).unwrap(), 915);
        assert_eq!(apply_ratio(1, dec!(0.5)).unwrap(), 1);
    }

    #[test]
    fn test_basis_points() {
        assert_eq!(apply_basis_points(6300, 900).unwrap(), 567);
        assert_eq!(apply_basis_points(7000, 1000).unwrap(), 700);
        // 5 * 0.01 = 0.05 -> 0
        assert_eq!(apply_basis_points(5, 100).unwrap(), 0);
        // 50 * 0.01 = 0.5 -> 1
        assert_eq!(apply_basis_points(50, 100).unwrap(), 1);
    }

    #[test]
    fn test_money_add() {
        let a = Money::new(1000, Currency::USD);
        let b = Money::new(500, Currency::USD);
        assert_eq!(a.checked_add(&b).unwrap().amount(), 1500);
        assert_eq!(a.checked_sub(&b).unwrap().amount(), 500);
    }

    #[test]
    fn test_money_currency_mismatch() {
        let usd = Money::new(1000, Currency::USD);
        let eur = Money::new(500, Currency::EUR);
        assert!(matches!(
            usd.checked_add(&eur),
            Err(MoneyError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_money_overflow() {
        let big = Money::new(i64::MAX, Currency::USD);
        assert_eq!(big.times(2), Err(MoneyError::Overflow));
        assert_eq!(
            big.checked_add(&Money::new(1, Currency::USD)),
            Err(MoneyError::Overflow)
        );
    }

    #[test]
    fn test_clamp_non_negative() {
        let negative = Money::new(-20, Currency::EUR);
        assert_eq!(negative.clamp_non_negative().amount(), 0);
        assert!(negative.is_negative());
    }

    #[test]
    fn test_currency_case_insensitive() {
        assert_eq!(Currency::parse("usd").unwrap(), Currency::USD);
        assert_eq!(
            Currency::parse(" sek ").unwrap(),
            Currency::Other("SEK".into())
        );
        assert_eq!(Currency::parse("sek").unwrap(), Currency::parse("SEK").unwrap());
        assert!(Currency::parse("").is_err());
        assert!(Currency::parse("U$D").is_err());
    }

    #[test]
    fn test_hand_built_other_matches_known_code() {
        use std::collections::HashSet;

        assert_eq!(Currency::Other("usd".into()), Currency::USD);
        assert_eq!(Currency::Other("USD".into()), Currency::USD);
        assert_eq!(Currency::Other("sek".into()), Currency::Other("SEK".into()));
        assert_ne!(Currency::Other("usd".into()), Currency::EUR);

        let set: HashSet<Currency> = [Currency::USD, Currency::Other("usd".into())].into_iter().collect();
        assert_eq!(set.len(), 1);

        assert_eq!(Currency::Other("sek".into()).to_string(), "SEK");
        let same = Money::new(5, Currency::Other("usd".into()));
        assert!(same.same_currency(&Money::new(1, Currency::USD)));
    }

    #[test]
    fn test_currency_serde_as_code() {
        let json = serde_json::to_string(&Money::new(1050, Currency::EUR)).unwrap();
        assert_eq!(json, r#"{"amount":1050,"currency":"EUR"}"#);

        let parsed: Money = serde_json::from_str(r#"{"amount":5,"currency":"eur"}"#).unwrap();
        assert_eq!(parsed.currency(), &Currency::EUR);
    }
}
