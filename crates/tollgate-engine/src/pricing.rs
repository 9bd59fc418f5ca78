//! Plans and Addons
//!
//! Catalog entries are owned by the caller and priced into [`LineDraft`]s in
//! the invoice currency. Unit prices are converted first, then multiplied by
//! quantity.

use serde::{Deserialize, Serialize};

use tollgate_common::{Currency, Money};

use crate::exchange::{override_for, ExchangeResolver, RateOverride};
use crate::invoicing::{LineDraft, LineKind};
use crate::metering::MetricChargeConfig;
use crate::{BillingError, BillingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Day,
    Week,
    Month,
    Year,
}

/// Billing period, e.g. every 3 months
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingInterval {
    pub unit: IntervalUnit,
    pub count: u32,
}

impl BillingInterval {
    pub fn monthly() -> Self {
        Self {
            unit: IntervalUnit::Month,
            count: 1,
        }
    }

    pub fn yearly() -> Self {
        Self {
            unit: IntervalUnit::Year,
            count: 1,
        }
    }
}

impl Default for BillingInterval {
    fn default() -> Self {
        Self::monthly()
    }
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unit = match self.unit {
            IntervalUnit::Day => "day",
            IntervalUnit::Week => "week",
            IntervalUnit::Month => "month",
            IntervalUnit::Year => "year",
        };
        if self.count == 1 {
            write!(f, "{}", unit)
        } else {
            write!(f, "{} {}s", self.count, unit)
        }
    }
}

/// Subscription plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    /// Price per seat per interval
    pub amount: Money,
    #[serde(default)]
    pub interval: BillingInterval,
    /// Metered charges billed with this plan
    #[serde(default)]
    pub metrics: Vec<MetricChargeConfig>,
    /// Merchant-set rates that win over the currency table
    #[serde(default)]
    pub exchange_rates: Vec<RateOverride>,
}

impl Plan {
    pub fn rate_override(&self, target: &Currency) -> Option<rust_decimal::Decimal> {
        override_for(&self.exchange_rates, target)
    }

    /// Plan line: converted `amount × quantity`
    pub fn line(&self, quantity: i64, exchange: &ExchangeResolver<'_>, target: &Currency) -> BillingResult<LineDraft> {
        if quantity < 0 {
            return Err(BillingError::InvalidInput(format!(
                "plan {} quantity cannot be negative: {}",
                self.id, quantity
            )));
        }
        let unit = exchange.convert(&self.amount, target, self.rate_override(target))?;
        LineDraft::priced(
            LineKind::Plan,
            format!("{} ({} × {})", self.name, quantity, self.interval),
            unit.amount().max(0),
            quantity,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonKind {
    Recurring,
    OneTime,
}

/// Addon purchased alongside a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Addon {
    pub id: String,
    pub name: String,
    pub amount: Money,
    pub quantity: i64,
    pub kind: AddonKind,
    #[serde(default)]
    pub exchange_rates: Vec<RateOverride>,
}

impl Addon {
    pub fn is_one_time(&self) -> bool {
        self.kind == AddonKind::OneTime
    }

    pub fn line(&self, exchange: &ExchangeResolver<'_>, target: &Currency) -> BillingResult<LineDraft> {
        if self.quantity < 0 {
            return Err(BillingError::InvalidInput(format!(
                "addon {} quantity cannot be negative: {}",
                self.id, self.quantity
            )));
        }
        let rate = override_for(&self.exchange_rates, target);
        let unit = exchange.convert(&self.amount, target, rate)?;
        let kind = match self.kind {
            AddonKind::Recurring => LineKind::Addon,
            AddonKind::OneTime => LineKind::OneTimeAddon,
        };
        LineDraft::priced(
            kind,
            format!("{} × {}", self.name, self.quantity),
            unit.amount().max(0),
            self.quantity,
        )
    }
}

/// Plan line followed by one line per addon with a positive quantity.
pub fn subscription_lines(
    plan: Option<(&Plan, i64)>,
    addons: &[Addon],
    exchange: &ExchangeResolver<'_>,
    target: &Currency,
) -> BillingResult<Vec<LineDraft>> {
    let mut lines = Vec::with_capacity(addons.len() + 1);
    if let Some((plan, quantity)) = plan {
        if quantity > 0 {
            lines.push(plan.line(quantity, exchange, target)?);
        }
    }
    for addon in addons.iter().filter(|a| a.quantity != 0) {
        lines.push(addon.line(exchange, target)?);
    }
    Ok(lines)
}
