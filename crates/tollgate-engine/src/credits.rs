//! Credits
//!
//! Promo credit is a merchant-granted balance consumed as a discount before
//! discount codes. Main credit is a prepaid balance that settles part of the
//! final invoice total after tax. The engine only proposes payouts; the caller
//! decrements balances atomically at commit time.

use serde::{Deserialize, Serialize};

use tollgate_common::{Currency, Money};

use crate::exchange::ExchangeResolver;
use crate::{BillingError, BillingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditType {
    Main,
    Promo,
}

impl std::fmt::Display for CreditType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Promo => write!(f, "promo"),
        }
    }
}

/// Credit balance as loaded by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditAccount {
    pub credit_type: CreditType,
    pub balance: Money,
}

/// Request to use a credit account on this invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditRequest {
    pub account: CreditAccount,
    /// Amount in the invoice currency; `None` uses as much as allowed
    #[serde(default)]
    pub requested_amount: Option<i64>,
}

impl CreditRequest {
    pub fn new(credit_type: CreditType, balance: Money) -> Self {
        Self {
            account: CreditAccount {
                credit_type,
                balance,
            },
            requested_amount: None,
        }
    }

    pub fn with_requested_amount(mut self, amount: i64) -> Self {
        self.requested_amount = Some(amount);
        self
    }

    /// Caller asked for credit and the account has some
    pub fn is_effective(&self) -> bool {
        self.account.balance.is_positive() && self.requested_amount.map_or(true, |r| r > 0)
    }

    /// Ensure the account is of the expected type
    pub fn expect_type(&self, expected: CreditType) -> BillingResult<()> {
        if self.account.credit_type != expected {
            return Err(BillingError::InvalidInput(format!(
                "{} credit account supplied where {} credit was expected",
                self.account.credit_type, expected
            )));
        }
        if let Some(requested) = self.requested_amount {
            if requested < 0 {
                return Err(BillingError::InvalidInput(format!(
                    "requested {} credit cannot be negative: {}",
                    expected, requested
                )));
            }
        }
        Ok(())
    }

    /// Balance converted to `target`, floored at zero
    pub fn available_in(&self, exchange: &ExchangeResolver<'_>, target: &Currency) -> BillingResult<i64> {
        let converted = exchange.convert(&self.account.balance, target, None)?;
        Ok(converted.amount().max(0))
    }
}

/// `min(available, requested ?? cap, cap)`, never negative
pub fn payout_amount(available: i64, requested: Option<i64>, cap: i64) -> i64 {
    let cap = cap.max(0);
    available.min(requested.unwrap_or(cap)).min(cap).max(0)
}

/// Proposed deduction from a credit account, in the invoice currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPayout {
    pub credit_type: CreditType,
    pub amount: Money,
    /// Balance available before this payout, in the invoice currency
    pub available: i64,
}
