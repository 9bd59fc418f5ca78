//! Tollgate Billing Engine
//!
//! Turns a plan, its addons and a metered usage snapshot into a finished
//! invoice. The engine is pure: it reads caller-owned values and proposes
//! amounts; persistence, balance debits and payment collection stay with the
//! caller.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         BILLING ENGINE                                  │
//! │                                                                         │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────────────┐ │
//! │  │  Plan/Addon  │   │   Metering   │   │      Exchange Resolver       │ │
//! │  │    Lines     │   │ (graduated)  │◄──┤ override ► live ► static rate│ │
//! │  └──────┬───────┘   └──────┬───────┘   └──────────────────────────────┘ │
//! │         └────────┬─────────┘                                            │
//! │                  ▼                                                      │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            ADJUSTMENT PIPELINE (fixed order)                     │   │
//! │  │   base ─► Promo Credit ─► Discount ─► taxable base               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                  ▼                                                      │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐                │
//! │  │     Tax      │──►│   Invoice    │──►│ Main Credit  │                │
//! │  │ (basis pts)  │   │  Assembler   │   │   Payout     │                │
//! │  └──────────────┘   └──────────────┘   └──────────────┘                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod adjustments;
pub mod config;
pub mod credits;
pub mod discounts;
pub mod exchange;
pub mod invoicing;
pub mod metering;
pub mod pricing;
pub mod tax;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tollgate_common::{Currency, MoneyError};

pub use adjustments::{AdjustmentOutcome, DiscountCreditSequencer};
pub use config::EngineConfig;
pub use credits::{CreditPayout, CreditRequest, CreditType};
pub use discounts::{DiscountCode, DiscountEligibility, DiscountRequest};
pub use exchange::{ExchangeResolver, LiveRate, RateOverride};
pub use invoicing::{Invoice, InvoiceAssembler, InvoiceLineItem, LineDraft};
pub use metering::{MeteredChargeCalculator, MetricChargeConfig, UsageCharge, UsageSnapshot};
pub use pricing::{Addon, Plan};

/// Billing error types
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("currency exchange {from} -> {to} is not configured")]
    CurrencyNotConfigured { from: String, to: String },

    #[error("currency exchange {from} -> {to} is disabled")]
    CurrencyDisabled { from: String, to: String },

    #[error("invalid tax percentage: {0} basis points")]
    InvalidTaxPercentage(i64),

    #[error("invalid discount: {0}")]
    InvalidDiscount(String),

    #[error("promo credit conflict: {0}")]
    PromoCreditConflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Internal defect; never produced for valid input
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Money(#[from] MoneyError),
}

/// Result type for the billing engine
pub type BillingResult<T> = Result<T, BillingError>;

/// Whether the computation is a quote or a real charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationMode {
    /// Problems become messages on the result
    #[default]
    Preview,
    /// Problems are errors
    Submit,
}

impl ComputationMode {
    pub fn is_chargeable(self) -> bool {
        self == Self::Submit
    }
}

/// Everything one invoice computation reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingContext {
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default = "default_quantity")]
    pub plan_quantity: i64,
    #[serde(default)]
    pub addons: Vec<Addon>,
    #[serde(default)]
    pub usage: Vec<UsageSnapshot>,
    #[serde(default)]
    pub discount: Option<DiscountRequest>,
    #[serde(default)]
    pub promo_credit: Option<CreditRequest>,
    #[serde(default)]
    pub main_credit: Option<CreditRequest>,
    /// Invoice currency
    pub currency: Currency,
    #[serde(default)]
    pub tax_basis_points: i64,
    #[serde(default)]
    pub mode: ComputationMode,
    /// Live rate snapshots for auto-exchange routes
    #[serde(default)]
    pub live_rates: Vec<LiveRate>,
}

fn default_quantity() -> i64 {
    1
}

impl BillingContext {
    pub fn new(currency: Currency, mode: ComputationMode) -> Self {
        Self {
            plan: None,
            plan_quantity: 1,
            addons: Vec::new(),
            usage: Vec::new(),
            discount: None,
            promo_credit: None,
            main_credit: None,
            currency,
            tax_basis_points: 0,
            mode,
            live_rates: Vec::new(),
        }
    }
}

/// Result of [`BillingEngine::compute_invoice`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceComputation {
    pub invoice: Invoice,
    /// One entry per usage snapshot, in input order
    pub usage_charges: Vec<UsageCharge>,
    pub discount_applied: bool,
    /// Why a requested discount was dropped (preview only)
    pub discount_message: Option<String>,
    /// Why the requested tax rate was not applied (preview only)
    pub tax_message: Option<String>,
    pub promo_credit: Option<CreditPayout>,
    pub main_credit: Option<CreditPayout>,
}

/// Billing engine
///
/// Holds only validated configuration; every call works on its own values,
/// so one engine can be shared across threads behind an `Arc`.
#[derive(Debug, Clone)]
pub struct BillingEngine {
    config: EngineConfig,
}

impl BillingEngine {
    /// Create an engine from validated configuration
    pub fn new(config: EngineConfig) -> BillingResult<Self> {
        config.validate()?;
        tracing::info!(
            currencies = config.currencies.len(),
            credit_settings = config.credits.len(),
            "billing engine configured"
        );
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Price lines, apply promo credit then discount, tax the rest, assemble
    /// the invoice and settle main credit.
    pub fn compute_invoice(&self, ctx: &BillingContext) -> BillingResult<InvoiceComputation> {
        let currency = &ctx.currency;
        let (tax_basis_points, tax_message) = match tax::validate_tax_percentage(ctx.tax_basis_points) {
            Ok(()) => (ctx.tax_basis_points, None),
            Err(err) if !ctx.mode.is_chargeable() => {
                tracing::debug!(error = %err, "invalid tax percentage, previewing without tax");
                (0, Some(err.to_string()))
            }
            Err(err) => return Err(err),
        };
        let assembler = InvoiceAssembler::new(currency.clone(), tax_basis_points)?;
        let exchange = ExchangeResolver::new(&self.config, &ctx.live_rates, ctx.mode);

        let plan = ctx.plan.as_ref();
        let mut lines = pricing::subscription_lines(
            plan.map(|p| (p, ctx.plan_quantity)),
            &ctx.addons,
            &exchange,
            currency,
        )?;

        let calculator = MeteredChargeCalculator::new(exchange, plan.and_then(|p| p.rate_override(currency)));
        let metrics = plan.map(|p| p.metrics.as_slice()).unwrap_or_default();
        let usage_charges = ctx
            .usage
            .iter()
            .map(|snapshot| calculator.charge_snapshot(metrics, snapshot, currency))
            .collect::<BillingResult<Vec<_>>>()?;
        lines.extend(usage_charges.iter().filter_map(LineDraft::usage));

        let discount = ctx.discount.clone().map(|mut request| {
            if ctx.addons.iter().any(|a| a.is_one_time() && a.quantity > 0) {
                request.eligibility.has_one_time_addons = true;
            }
            request
        });

        let base = assembler.base(&lines)?;
        let sequencer = DiscountCreditSequencer::new(exchange, self.config.credit_config(currency));
        let adjustments = sequencer.apply(&base, discount.as_ref(), ctx.promo_credit.as_ref())?;

        let mut invoice = assembler.assemble(lines, &adjustments)?;
        let main_credit = match &ctx.main_credit {
            Some(request) => invoice.apply_main_credit(request, &exchange)?,
            None => None,
        };

        tracing::info!(
            currency = %currency,
            mode = ?ctx.mode,
            lines = invoice.lines.len(),
            total = invoice.total_amount,
            amount_due = invoice.amount_due,
            "invoice computed"
        );

        Ok(InvoiceComputation {
            invoice,
            usage_charges,
            discount_applied: adjustments.discount_applied,
            discount_message: adjustments.discount_message,
            tax_message,
            promo_credit: adjustments.promo_credit,
            main_credit,
        })
    }
}
