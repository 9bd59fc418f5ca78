//! Discount & Credit Sequencer
//!
//! Adjustments run as an ordered pipeline. Each stage sees the base left by
//! the stage before it:
//!
//! ```text
//! base ─► [promo credit] ─► base - promo ─► [discount] ─► remaining base
//! ```
//!
//! Promo credit always runs first against the full base; the discount is
//! computed against what the credit left. The two orders are not equivalent.

use serde::{Deserialize, Serialize};
use std::fmt;

use tollgate_common::{apply_basis_points, Currency, Money, MoneyError};

use crate::config::CreditCurrencyConfig;
use crate::credits::{payout_amount, CreditPayout, CreditRequest, CreditType};
use crate::discounts::{validate_percentage, DiscountRequest, DiscountRule, DiscountSource};
use crate::exchange::ExchangeResolver;
use crate::{BillingError, BillingResult, ComputationMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    PromoCredit,
    Discount,
}

/// One step of the pipeline
pub trait AdjustmentStage: fmt::Debug {
    fn kind(&self) -> AdjustmentKind;

    /// Amount to deduct from `remaining`; must lie in `0..=remaining`
    fn deduction(&self, remaining: i64) -> BillingResult<i64>;
}

/// Promo credit: `min(available, requested ?? base, base)`
#[derive(Debug, Clone)]
pub struct PromoCreditStage {
    pub available: i64,
    pub requested: Option<i64>,
}

impl AdjustmentStage for PromoCreditStage {
    fn kind(&self) -> AdjustmentKind {
        AdjustmentKind::PromoCredit
    }

    fn deduction(&self, remaining: i64) -> BillingResult<i64> {
        Ok(payout_amount(self.available, self.requested, remaining))
    }
}

/// Discount resolved to the invoice currency
#[derive(Debug, Clone)]
pub enum DiscountStage {
    Amount(i64),
    Percentage(i64),
    Rule(DiscountRule),
}

impl AdjustmentStage for DiscountStage {
    fn kind(&self) -> AdjustmentKind {
        AdjustmentKind::Discount
    }

    fn deduction(&self, remaining: i64) -> BillingResult<i64> {
        let remaining = remaining.max(0);
        let amount = match self {
            Self::Amount(amount) => *amount,
            Self::Percentage(basis_points) => apply_basis_points(remaining, *basis_points)?,
            Self::Rule(rule) => rule.amount_for(remaining)?,
        };
        Ok(amount.clamp(0, remaining))
    }
}

/// Record of one stage having run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedAdjustment {
    pub kind: AdjustmentKind,
    pub base_before: i64,
    pub amount: i64,
}

/// Ordered list of stages
#[derive(Debug, Default)]
pub struct AdjustmentPipeline {
    stages: Vec<Box<dyn AdjustmentStage>>,
}

impl AdjustmentPipeline {
    /// Promo credit, then discount
    pub fn new(promo_credit: Option<PromoCreditStage>, discount: Option<DiscountStage>) -> Self {
        let mut stages: Vec<Box<dyn AdjustmentStage>> = Vec::with_capacity(2);
        if let Some(stage) = promo_credit {
            stages.push(Box::new(stage));
        }
        if let Some(stage) = discount {
            stages.push(Box::new(stage));
        }
        Self { stages }
    }

    #[cfg(test)]
    pub(crate) fn from_stages(stages: Vec<Box<dyn AdjustmentStage>>) -> Self {
        Self { stages }
    }

    pub fn kinds(&self) -> Vec<AdjustmentKind> {
        self.stages.iter().map(|s| s.kind()).collect()
    }

    /// Run every stage in order
    pub fn run(&self, base: i64) -> BillingResult<Vec<AppliedAdjustment>> {
        let mut remaining = base.max(0);
        let mut applied = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let amount = stage.deduction(remaining)?;
            if !(0..=remaining).contains(&amount) {
                return Err(BillingError::InvariantViolation(format!(
                    "{:?} deducted {} from remaining base {}",
                    stage.kind(),
                    amount,
                    remaining
                )));
            }
            applied.push(AppliedAdjustment {
                kind: stage.kind(),
                base_before: remaining,
                amount,
            });
            remaining = remaining.checked_sub(amount).ok_or(MoneyError::Overflow)?;
        }
        Ok(applied)
    }
}

/// Sequencer result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentOutcome {
    pub base: Money,
    pub remaining_base: i64,
    pub discount_amount: i64,
    pub promo_credit_amount: i64,
    pub applied: Vec<AppliedAdjustment>,
    /// A discount was requested and applied
    pub discount_applied: bool,
    /// Why a requested discount was not applied (preview only)
    pub discount_message: Option<String>,
    pub promo_credit: Option<CreditPayout>,
}

impl AdjustmentOutcome {
    /// Outcome with nothing applied
    pub fn untouched(base: Money) -> Self {
        let amount = base.amount().max(0);
        Self {
            base: Money::new(amount, base.currency().clone()),
            remaining_base: amount,
            discount_amount: 0,
            promo_credit_amount: 0,
            applied: Vec::new(),
            discount_applied: false,
            discount_message: None,
            promo_credit: None,
        }
    }

    fn amount_of(applied: &[AppliedAdjustment], kind: AdjustmentKind) -> i64 {
        applied
            .iter()
            .filter(|a| a.kind == kind)
            .map(|a| a.amount)
            .sum()
    }
}

/// Applies promo credit, then discount, to a taxable base
pub struct DiscountCreditSequencer<'a> {
    exchange: ExchangeResolver<'a>,
    credit_config: Option<&'a CreditCurrencyConfig>,
}

impl<'a> DiscountCreditSequencer<'a> {
    pub fn new(exchange: ExchangeResolver<'a>, credit_config: Option<&'a CreditCurrencyConfig>) -> Self {
        Self {
            exchange,
            credit_config,
        }
    }

    fn mode(&self) -> ComputationMode {
        self.exchange.mode()
    }

    /// Apply promo credit and discount to `base`.
    ///
    /// In preview an inapplicable discount is dropped with a message; in
    /// submit the same condition is an error.
    pub fn apply(
        &self,
        base: &Money,
        discount: Option<&DiscountRequest>,
        promo_credit: Option<&CreditRequest>,
    ) -> BillingResult<AdjustmentOutcome> {
        let currency = base.currency();
        let mut outcome = AdjustmentOutcome::untouched(base.clone());

        let promo_stage = match promo_credit {
            Some(request) => self.promo_stage(request, currency)?,
            None => None,
        };

        let mut discount_stage = None;
        if let Some(request) = discount {
            let conflict = promo_stage.is_some()
                && request.uses_code()
                && self
                    .credit_config
                    .map_or(false, |c| c.promo_exclusive_with_discount_code);

            if conflict {
                let message = format!(
                    "promo credit and discount codes cannot be combined for {}",
                    currency
                );
                if self.mode().is_chargeable() {
                    return Err(BillingError::PromoCreditConflict(message));
                }
                tracing::debug!(%message, "discount code disabled in preview");
                outcome.discount_message = Some(message);
            } else {
                match self.discount_stage(request, currency)? {
                    Ok(stage) => discount_stage = stage,
                    Err(reason) => {
                        if self.mode().is_chargeable() {
                            return Err(BillingError::InvalidDiscount(reason));
                        }
                        outcome.discount_message = Some(reason);
                    }
                }
            }
        }

        let available = promo_stage.as_ref().map(|s| s.available);
        let pipeline = AdjustmentPipeline::new(promo_stage, discount_stage);
        let applied = pipeline.run(outcome.base.amount())?;

        outcome.promo_credit_amount = AdjustmentOutcome::amount_of(&applied, AdjustmentKind::PromoCredit);
        outcome.discount_amount = AdjustmentOutcome::amount_of(&applied, AdjustmentKind::Discount);
        outcome.discount_applied = applied.iter().any(|a| a.kind == AdjustmentKind::Discount);
        outcome.remaining_base = applied.last().map_or(outcome.base.amount(), |a| a.base_before - a.amount);
        outcome.promo_credit = available.map(|available| CreditPayout {
            credit_type: CreditType::Promo,
            amount: Money::new(outcome.promo_credit_amount, currency.clone()),
            available,
        });
        outcome.applied = applied;

        tracing::debug!(
            base = outcome.base.amount(),
            promo_credit = outcome.promo_credit_amount,
            discount = outcome.discount_amount,
            remaining = outcome.remaining_base,
            "adjustments applied"
        );
        Ok(outcome)
    }

    fn promo_stage(&self, request: &CreditRequest, currency: &Currency) -> BillingResult<Option<PromoCreditStage>> {
        request.expect_type(CreditType::Promo)?;
        if !request.is_effective() {
            return Ok(None);
        }
        if let Some(config) = self.credit_config {
            if !config.promo_credit_enabled {
                tracing::debug!(currency = %config.currency, "promo credit disabled, skipped");
                return Ok(None);
            }
        }
        let available = request.available_in(&self.exchange, currency)?;
        Ok(Some(PromoCreditStage {
            available,
            requested: request.requested_amount,
        }))
    }

    /// `Ok(Err(reason))` when the discount does not apply
    fn discount_stage(
        &self,
        request: &DiscountRequest,
        currency: &Currency,
    ) -> BillingResult<Result<Option<DiscountStage>, String>> {
        let stage = match request.source() {
            None => None,
            Some(DiscountSource::ExplicitAmount(amount)) => {
                if amount < 0 {
                    return Ok(Err(format!("discount amount cannot be negative: {}", amount)));
                }
                Some(DiscountStage::Amount(amount))
            }
            Some(DiscountSource::ExplicitPercentage(basis_points)) => {
                if let Err(err) = validate_percentage(basis_points) {
                    return Ok(Err(err.to_string()));
                }
                Some(DiscountStage::Percentage(basis_points))
            }
            Some(DiscountSource::Code(code)) => {
                let validation = code.validate(&request.eligibility);
                if !validation.valid {
                    let reason = validation
                        .reason
                        .unwrap_or_else(|| format!("discount code {} cannot be applied", code.code));
                    return Ok(Err(reason));
                }
                let percentage = match &code.rule {
                    DiscountRule::Percentage { basis_points } => Some(*basis_points),
                    DiscountRule::Formula(formula) => Some(formula.basis_points),
                    DiscountRule::FixedAmount { .. } => None,
                };
                if let Some(Err(err)) = percentage.map(validate_percentage) {
                    return Ok(Err(err.to_string()));
                }
                Some(DiscountStage::Rule(code.rule.in_currency(&self.exchange, currency)?))
            }
        };
        Ok(Ok(stage))
    }
}
