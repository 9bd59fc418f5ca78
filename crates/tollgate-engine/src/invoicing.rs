//! Invoice Line Assembler
//!
//! Combines priced lines with the sequencer's outcome into an invoice:
//!
//! ```text
//! lines ─► Σ amount (base) ─► adjustments ─► excl. tax ─► tax ─► total
//!                                                               │
//!                              main credit payout ◄─────────────┘
//! ```
//!
//! Tax is applied once on the invoice-level base. Discount, promo credit and
//! tax are then spread over the lines by largest remainder so the line figures
//! add up exactly to the invoice figures.

use serde::{Deserialize, Serialize};

use tollgate_common::{Currency, Money, MoneyError};

use crate::adjustments::AdjustmentOutcome;
use crate::credits::{payout_amount, CreditPayout, CreditRequest, CreditType};
use crate::exchange::ExchangeResolver;
use crate::metering::{BreakdownLine, UsageCharge};
use crate::tax::{apply_tax, validate_tax_percentage};
use crate::{BillingError, BillingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Plan,
    Addon,
    OneTimeAddon,
    Usage,
}

/// A priced line before adjustments and tax
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDraft {
    pub kind: LineKind,
    pub description: String,
    pub unit_amount: i64,
    pub quantity: i64,
    pub amount: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breakdown: Vec<BreakdownLine>,
}

impl LineDraft {
    /// `unit_amount × quantity`
    pub fn priced(
        kind: LineKind,
        description: impl Into<String>,
        unit_amount: i64,
        quantity: i64,
    ) -> BillingResult<Self> {
        let amount = unit_amount
            .checked_mul(quantity)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self {
            kind,
            description: description.into(),
            unit_amount,
            quantity,
            amount,
            breakdown: Vec::new(),
        })
    }

    /// Line for a metered usage charge; `None` when nothing is owed
    pub fn usage(charge: &UsageCharge) -> Option<Self> {
        if charge.delta_charge <= 0 {
            return None;
        }
        Some(Self {
            kind: LineKind::Usage,
            description: format!("{} usage", charge.metric_id),
            unit_amount: charge.unit_amount,
            quantity: (charge.new_used - charge.old_used).max(0),
            amount: charge.delta_charge,
            breakdown: charge.breakdown.clone(),
        })
    }
}

/// Finished invoice line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub kind: LineKind,
    pub description: String,
    pub unit_amount_excluding_tax: i64,
    pub quantity: i64,
    /// Line amount before adjustments and tax
    pub origin_amount: i64,
    pub discount_amount: i64,
    pub promo_credit_amount: i64,
    pub amount_excluding_tax: i64,
    pub tax: i64,
    pub amount: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breakdown: Vec<BreakdownLine>,
}

/// Invoice figures, all in minor units of `currency`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub currency: Currency,
    pub tax_basis_points: i64,
    pub lines: Vec<InvoiceLineItem>,
    pub origin_amount: i64,
    pub discount_amount: i64,
    pub promo_credit_discount_amount: i64,
    pub total_amount_excluding_tax: i64,
    pub tax_amount: i64,
    pub total_amount: i64,
    /// Part of `total_amount` settled from the main credit balance
    pub main_credit_paid: i64,
    pub amount_due: i64,
}

impl Invoice {
    /// Check every invoice identity, including the line sums.
    pub fn check_reconciliation(&self) -> BillingResult<()> {
        let amounts = [
            ("origin_amount", self.origin_amount),
            ("discount_amount", self.discount_amount),
            ("promo_credit_discount_amount", self.promo_credit_discount_amount),
            ("total_amount_excluding_tax", self.total_amount_excluding_tax),
            ("tax_amount", self.tax_amount),
            ("total_amount", self.total_amount),
            ("main_credit_paid", self.main_credit_paid),
            ("amount_due", self.amount_due),
        ];
        if let Some((name, value)) = amounts.iter().find(|(_, v)| *v < 0) {
            return violation(format!("{} is negative: {}", name, value));
        }

        let wide = i128::from;
        if wide(self.origin_amount)
            != wide(self.total_amount) + wide(self.discount_amount) + wide(self.promo_credit_discount_amount)
        {
            return violation(format!(
                "origin {} != total {} + discount {} + promo credit {}",
                self.origin_amount,
                self.total_amount,
                self.discount_amount,
                self.promo_credit_discount_amount
            ));
        }
        if wide(self.total_amount) != wide(self.total_amount_excluding_tax) + wide(self.tax_amount) {
            return violation(format!(
                "total {} != excl. tax {} + tax {}",
                self.total_amount, self.total_amount_excluding_tax, self.tax_amount
            ));
        }
        if wide(self.amount_due) != wide(self.total_amount) - wide(self.main_credit_paid) {
            return violation(format!(
                "amount due {} != total {} - main credit {}",
                self.amount_due, self.total_amount, self.main_credit_paid
            ));
        }

        let sum = |f: fn(&InvoiceLineItem) -> i64| self.lines.iter().map(|l| wide(f(l))).sum::<i128>();
        let line_checks = [
            ("discount", sum(|l| l.discount_amount), self.discount_amount),
            ("promo credit", sum(|l| l.promo_credit_amount), self.promo_credit_discount_amount),
            ("excl. tax", sum(|l| l.amount_excluding_tax), self.total_amount_excluding_tax),
            ("tax", sum(|l| l.tax), self.tax_amount),
            ("amount", sum(|l| l.amount), self.total_amount),
        ];
        for (name, lines, invoice) in line_checks {
            if lines != wide(invoice) {
                return violation(format!("line {} sum {} != invoice {}", name, lines, invoice));
            }
        }
        for line in &self.lines {
            let parts = wide(line.discount_amount) + wide(line.promo_credit_amount) + wide(line.amount_excluding_tax);
            let amount = wide(line.amount_excluding_tax) + wide(line.tax);
            if wide(line.origin_amount) != parts || wide(line.amount) != amount {
                return violation(format!("line '{}' does not reconcile", line.description));
            }
        }
        Ok(())
    }

    /// Settle part of the total from a main credit balance.
    ///
    /// Payout is `min(balance, requested ?? total, total)` in the invoice
    /// currency. The caller debits the account at commit time.
    pub fn apply_main_credit(
        &mut self,
        request: &CreditRequest,
        exchange: &ExchangeResolver<'_>,
    ) -> BillingResult<Option<CreditPayout>> {
        request.expect_type(CreditType::Main)?;
        if !request.is_effective() {
            return Ok(None);
        }
        let available = request.available_in(exchange, &self.currency)?;
        let amount = payout_amount(available, request.requested_amount, self.total_amount);
        self.main_credit_paid = amount;
        self.amount_due = self.total_amount.checked_sub(amount).ok_or(MoneyError::Overflow)?;
        tracing::debug!(available, paid = amount, due = self.amount_due, "main credit applied");
        self.check_reconciliation()?;
        Ok(Some(CreditPayout {
            credit_type: CreditType::Main,
            amount: Money::new(amount, self.currency.clone()),
            available,
        }))
    }
}

fn violation<T>(message: String) -> BillingResult<T> {
    tracing::error!(%message, "invoice reconciliation failed");
    Err(BillingError::InvariantViolation(message))
}

fn checked_sum(amounts: &[i64]) -> BillingResult<i64> {
    amounts
        .iter()
        .try_fold(0i64, |total, amount| total.checked_add(*amount))
        .ok_or_else(|| MoneyError::Overflow.into())
}

/// Split `total` across `weights` in proportion, exactly.
///
/// Each share is floored, then the leftover units go to the largest
/// remainders, earlier lines winning ties.
pub fn allocate_largest_remainder(total: i64, weights: &[i64]) -> BillingResult<Vec<i64>> {
    let weight_sum: i128 = weights.iter().map(|w| i128::from((*w).max(0))).sum();
    if total == 0 || weights.is_empty() {
        return Ok(vec![0; weights.len()]);
    }
    if total < 0 || weight_sum == 0 {
        return violation(format!(
            "cannot allocate {} over weights summing to {}",
            total, weight_sum
        ));
    }

    let total = i128::from(total);
    let mut shares = Vec::with_capacity(weights.len());
    let mut remainders = Vec::with_capacity(weights.len());
    for (index, weight) in weights.iter().enumerate() {
        let product = total * i128::from((*weight).max(0));
        shares.push(product / weight_sum);
        remainders.push((product % weight_sum, index));
    }

    let mut leftover = total - shares.iter().sum::<i128>();
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, index) in remainders {
        if leftover == 0 {
            break;
        }
        shares[index] += 1;
        leftover -= 1;
    }

    shares
        .into_iter()
        .map(|share| i64::try_from(share).map_err(|_| BillingError::from(MoneyError::Overflow)))
        .collect()
}

/// Builds invoices in one currency at one tax rate
#[derive(Debug, Clone)]
pub struct InvoiceAssembler {
    currency: Currency,
    tax_basis_points: i64,
}

impl InvoiceAssembler {
    pub fn new(currency: Currency, tax_basis_points: i64) -> BillingResult<Self> {
        validate_tax_percentage(tax_basis_points)?;
        Ok(Self {
            currency,
            tax_basis_points,
        })
    }

    /// Taxable base the sequencer should run against: Σ line amounts
    pub fn base(&self, lines: &[LineDraft]) -> BillingResult<Money> {
        let total = lines
            .iter()
            .try_fold(0i64, |total, line| total.checked_add(line.amount.max(0)))
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(total, self.currency.clone()))
    }

    /// Assemble the invoice. `adjustments` must have been computed against
    /// [`InvoiceAssembler::base`] of the same lines.
    pub fn assemble(&self, lines: Vec<LineDraft>, adjustments: &AdjustmentOutcome) -> BillingResult<Invoice> {
        let base = self.base(&lines)?;
        if adjustments.base != base {
            return violation(format!(
                "adjustments computed on {} but lines sum to {}",
                adjustments.base, base
            ));
        }

        let lines: Vec<LineDraft> = lines
            .into_iter()
            .map(|mut line| {
                if line.amount < 0 {
                    tracing::warn!(description = %line.description, amount = line.amount, "negative line clamped");
                    line.amount = 0;
                }
                line
            })
            .collect();

        let discount = adjustments.discount_amount.max(0);
        let promo_credit = adjustments.promo_credit_amount.max(0);
        let deductions = checked_sum(&[discount, promo_credit])?;
        let excluding_tax = base.amount().checked_sub(deductions).ok_or(MoneyError::Overflow)?.max(0);
        let tax = apply_tax(excluding_tax, self.tax_basis_points)?;
        let total = checked_sum(&[excluding_tax, tax])?;
        let origin = checked_sum(&[total, deductions])?;

        let weights: Vec<i64> = lines.iter().map(|l| l.amount).collect();
        let deducted = allocate_largest_remainder(deductions, &weights)?;
        let promo_shares = allocate_largest_remainder(promo_credit, &deducted)?;
        let excl_shares: Vec<i64> = weights.iter().zip(&deducted).map(|(w, d)| w - d).collect();
        let tax_shares = allocate_largest_remainder(tax, &excl_shares)?;

        let items = lines
            .into_iter()
            .enumerate()
            .map(|(i, line)| InvoiceLineItem {
                kind: line.kind,
                description: line.description,
                unit_amount_excluding_tax: line.unit_amount,
                quantity: line.quantity,
                origin_amount: line.amount,
                discount_amount: deducted[i] - promo_shares[i],
                promo_credit_amount: promo_shares[i],
                amount_excluding_tax: excl_shares[i],
                tax: tax_shares[i],
                amount: excl_shares[i] + tax_shares[i],
                breakdown: line.breakdown,
            })
            .collect();

        let invoice = Invoice {
            currency: self.currency.clone(),
            tax_basis_points: self.tax_basis_points,
            lines: items,
            origin_amount: origin,
            discount_amount: discount,
            promo_credit_discount_amount: promo_credit,
            total_amount_excluding_tax: excluding_tax,
            tax_amount: tax,
            total_amount: total,
            main_credit_paid: 0,
            amount_due: total,
        };
        invoice.check_reconciliation()?;

        tracing::debug!(
            currency = %invoice.currency,
            origin = invoice.origin_amount,
            excl_tax = invoice.total_amount_excluding_tax,
            tax = invoice.tax_amount,
            total = invoice.total_amount,
            "invoice assembled"
        );
        Ok(invoice)
    }
}

/// Assemble `lines` into an invoice with one call.
pub fn assemble(
    lines: Vec<LineDraft>,
    adjustments: &AdjustmentOutcome,
    tax_basis_points: i64,
    currency: Currency,
) -> BillingResult<Invoice> {
    InvoiceAssembler::new(currency, tax_basis_points)?.assemble(lines, adjustments)
}
