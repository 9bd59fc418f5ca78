//! Metered Usage Charge Calculator
//!
//! Charges are computed as the difference of a cumulative charge function,
//! `total_at(new_used) - total_at(old_used)`, so re-billing the same interval
//! any number of times adds up to the same amount.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use tollgate_common::{Currency, Money, MoneyError, MoneyResult};

use crate::exchange::ExchangeResolver;
use crate::BillingResult;

/// Pricing for one usage metric bound to a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricChargeConfig {
    pub metric_id: String,
    /// Currency of every amount in `charge`
    pub currency: Currency,
    pub charge: ChargeType,
}

/// How usage is priced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChargeType {
    /// Flat per-unit price after a free allowance
    Standard {
        unit_amount: i64,
        #[serde(default)]
        free_allowance: i64,
    },
    /// Cumulative brackets, each with its own per-unit and flat amount
    Graduated { steps: Vec<GraduatedStep> },
}

/// One graduated bracket. `end_value` of -1 or unset marks the unbounded last step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraduatedStep {
    #[serde(default)]
    pub end_value: Option<i64>,
    pub per_unit_amount: i64,
    #[serde(default)]
    pub flat_amount: i64,
}

impl GraduatedStep {
    pub fn bounded(end_value: i64, per_unit_amount: i64, flat_amount: i64) -> Self {
        Self {
            end_value: Some(end_value),
            per_unit_amount,
            flat_amount,
        }
    }

    pub fn unbounded(per_unit_amount: i64, flat_amount: i64) -> Self {
        Self {
            end_value: None,
            per_unit_amount,
            flat_amount,
        }
    }

    /// Inclusive upper bound, `None` when unbounded
    pub fn upper_bound(&self) -> Option<i64> {
        self.end_value.filter(|end| *end >= 0)
    }
}

/// Cumulative usage of one metric at two points in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub metric_id: String,
    pub old_used: i64,
    pub new_used: i64,
}

/// Charge for one traversed or matched graduated step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCharge {
    /// Position in ascending step order
    pub step_index: usize,
    pub start: i64,
    pub end: Option<i64>,
    pub quantity: i64,
    pub unit_amount: i64,
    pub flat_amount: i64,
    /// `quantity * unit_amount + flat_amount`
    pub amount: i64,
    /// Walk stopped at this step
    pub matched: bool,
}

/// Walks graduated steps in ascending `end_value` order for a cumulative usage.
///
/// Yields every step whose whole span is consumed, then the step in which
/// `used` falls (the first whose bound is `>= used`, or the unbounded step),
/// and stops. The last step in order is treated as unbounded.
pub struct StepWalker<'a> {
    steps: Vec<&'a GraduatedStep>,
    used: i64,
    last_end: i64,
    index: usize,
    done: bool,
}

impl<'a> StepWalker<'a> {
    pub fn new(steps: &'a [GraduatedStep], used: i64) -> Self {
        let mut ordered: Vec<&GraduatedStep> = steps.iter().collect();
        // bounded ascending, unbounded last; stable for equal bounds
        ordered.sort_by_key(|step| step.upper_bound().unwrap_or(i64::MAX));
        Self {
            steps: ordered,
            used,
            last_end: 0,
            index: 0,
            done: used <= 0,
        }
    }

    fn charge(&self, step: &GraduatedStep, quantity: i64, end: Option<i64>, matched: bool) -> MoneyResult<StepCharge> {
        let unit_amount = non_negative(step.per_unit_amount, "per_unit_amount");
        let flat_amount = non_negative(step.flat_amount, "flat_amount");
        let quantity = quantity.max(0);
        let amount = quantity
            .checked_mul(unit_amount)
            .and_then(|a| a.checked_add(flat_amount))
            .ok_or(MoneyError::Overflow)?;
        Ok(StepCharge {
            step_index: self.index,
            start: self.last_end,
            end,
            quantity,
            unit_amount,
            flat_amount,
            amount,
            matched,
        })
    }
}

impl<'a> Iterator for StepWalker<'a> {
    type Item = MoneyResult<StepCharge>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = *self.steps.get(self.index)?;
        let is_last = self.index + 1 == self.steps.len();
        let bound = if is_last { None } else { step.upper_bound() };

        let item = match bound {
            Some(end) if self.used > end => {
                if end < self.last_end {
                    tracing::warn!(end, last_end = self.last_end, "overlapping graduated step has no billable span");
                }
                let charge = self.charge(step, end - self.last_end, Some(end), false);
                self.last_end = self.last_end.max(end);
                charge
            }
            _ => {
                self.done = true;
                let end = step.upper_bound().filter(|end| self.used <= *end);
                self.charge(step, self.used - self.last_end, end, true)
            }
        };
        self.index += 1;
        Some(item)
    }
}

fn non_negative(value: i64, field: &'static str) -> i64 {
    if value < 0 {
        tracing::warn!(field, value, "negative metered value treated as zero");
        0
    } else {
        value
    }
}

/// Cumulative charge for usage from zero up to `used`.
pub fn total_at(charge: &ChargeType, used: i64) -> MoneyResult<i64> {
    match charge {
        ChargeType::Standard {
            unit_amount,
            free_allowance,
        } => {
            let free_allowance = non_negative(*free_allowance, "free_allowance");
            let billable = used.saturating_sub(free_allowance).max(0);
            billable
                .checked_mul(non_negative(*unit_amount, "unit_amount"))
                .ok_or(MoneyError::Overflow)
        }
        ChargeType::Graduated { steps } => StepWalker::new(steps, used)
            .try_fold(0i64, |total, step| {
                total.checked_add(step?.amount).ok_or(MoneyError::Overflow)
            }),
    }
}

/// One display line of a usage charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownLine {
    pub unit_amount: i64,
    pub quantity: i64,
    pub amount: i64,
    pub flat_amount: i64,
    pub range_label: String,
}

impl fmt::Display for BreakdownLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} unit {}", self.range_label, self.unit_amount)?;
        if self.flat_amount > 0 {
            write!(f, " + flat {}", self.flat_amount)?;
        }
        write!(f, " = {}", self.amount)
    }
}

fn walk_total(walk: &[StepCharge]) -> MoneyResult<i64> {
    walk.iter()
        .try_fold(0i64, |total, step| total.checked_add(step.amount))
        .ok_or(MoneyError::Overflow)
}

fn range_label(start: i64, end: Option<i64>) -> String {
    match end {
        Some(end) => format!("({} - {})", start, end),
        None => format!("({} - ∞)", start),
    }
}

/// Result of charging one metric between two cumulative usage values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCharge {
    pub metric_id: String,
    pub currency: Currency,
    pub old_used: i64,
    pub new_used: i64,
    pub delta_charge: i64,
    /// Standard unit price, or the per-unit price of the matched step
    pub unit_amount: i64,
    /// Index of the step `new_used` falls in (graduated only)
    pub matched_step: Option<usize>,
    pub breakdown: Vec<BreakdownLine>,
}

impl UsageCharge {
    /// Informational zero charge (unconfigured metric, no usage growth)
    pub fn zero(metric_id: &str, currency: Currency, old_used: i64, new_used: i64) -> Self {
        Self {
            metric_id: metric_id.to_string(),
            currency,
            old_used,
            new_used,
            delta_charge: 0,
            unit_amount: 0,
            matched_step: None,
            breakdown: Vec::new(),
        }
    }

    pub fn delta(&self) -> Money {
        Money::new(self.delta_charge, self.currency.clone())
    }
}

/// Charge between two cumulative usage values, amounts in `config.currency`.
pub fn charge_between(config: &MetricChargeConfig, old_used: i64, new_used: i64) -> MoneyResult<UsageCharge> {
    let mut result = UsageCharge::zero(&config.metric_id, config.currency.clone(), old_used, new_used);

    match &config.charge {
        ChargeType::Standard {
            unit_amount,
            free_allowance,
        } => {
            let unit_amount = non_negative(*unit_amount, "unit_amount");
            let free_allowance = non_negative(*free_allowance, "free_allowance");
            result.unit_amount = unit_amount;
            let delta = total_at(&config.charge, new_used)? - total_at(&config.charge, old_used)?;
            if delta > 0 {
                let quantity = new_used.saturating_sub(free_allowance).max(0)
                    - old_used.saturating_sub(free_allowance).max(0);
                result.delta_charge = delta;
                result.breakdown.push(BreakdownLine {
                    unit_amount,
                    quantity,
                    amount: delta,
                    flat_amount: 0,
                    range_label: range_label(free_allowance, None),
                });
            }
        }
        ChargeType::Graduated { steps } => {
            let new_walk = StepWalker::new(steps, new_used).collect::<MoneyResult<Vec<_>>>()?;
            let old_walk = StepWalker::new(steps, old_used).collect::<MoneyResult<Vec<_>>>()?;

            if let Some(matched) = new_walk.iter().find(|s| s.matched) {
                result.matched_step = Some(matched.step_index);
                result.unit_amount = matched.unit_amount;
            }

            let delta = walk_total(&new_walk)? - walk_total(&old_walk)?;

            if delta > 0 {
                result.delta_charge = delta;
                for step in &new_walk {
                    let before = old_walk.iter().find(|s| s.step_index == step.step_index);
                    let quantity = step.quantity - before.map_or(0, |s| s.quantity);
                    let amount = step.amount - before.map_or(0, |s| s.amount);
                    let flat_amount = step.flat_amount - before.map_or(0, |s| s.flat_amount);
                    if quantity > 0 || amount > 0 {
                        result.breakdown.push(BreakdownLine {
                            unit_amount: step.unit_amount,
                            quantity,
                            amount,
                            flat_amount,
                            range_label: range_label(step.start, step.end),
                        });
                    }
                }
            }
        }
    }

    if result.delta_charge == 0 && new_used < old_used {
        tracing::warn!(
            metric_id = %config.metric_id,
            old_used,
            new_used,
            "usage decreased, charge clamped to zero"
        );
    }
    Ok(result)
}

impl MetricChargeConfig {
    /// Same pricing with every amount converted to `target`
    pub fn in_currency(
        &self,
        exchange: &ExchangeResolver<'_>,
        target: &Currency,
        explicit_rate: Option<Decimal>,
    ) -> BillingResult<MetricChargeConfig> {
        if &self.currency == target {
            return Ok(self.clone());
        }
        let convert = |amount: i64| exchange.convert_amount(amount, &self.currency, target, explicit_rate);
        let charge = match &self.charge {
            ChargeType::Standard {
                unit_amount,
                free_allowance,
            } => ChargeType::Standard {
                unit_amount: convert(*unit_amount)?,
                free_allowance: *free_allowance,
            },
            ChargeType::Graduated { steps } => ChargeType::Graduated {
                steps: steps
                    .iter()
                    .map(|step| {
                        Ok(GraduatedStep {
                            end_value: step.end_value,
                            per_unit_amount: convert(step.per_unit_amount)?,
                            flat_amount: convert(step.flat_amount)?,
                        })
                    })
                    .collect::<BillingResult<Vec<_>>>()?,
            },
        };
        Ok(MetricChargeConfig {
            metric_id: self.metric_id.clone(),
            currency: target.clone(),
            charge,
        })
    }
}

/// Computes usage charges in a target currency
pub struct MeteredChargeCalculator<'a> {
    exchange: ExchangeResolver<'a>,
    explicit_rate: Option<Decimal>,
}

impl<'a> MeteredChargeCalculator<'a> {
    /// `explicit_rate` is the owning plan's override for the target currency
    pub fn new(exchange: ExchangeResolver<'a>, explicit_rate: Option<Decimal>) -> Self {
        Self {
            exchange,
            explicit_rate,
        }
    }

    /// Charge for `config` between two cumulative usages, in `target`.
    pub fn compute_charge(
        &self,
        config: &MetricChargeConfig,
        old_used: i64,
        new_used: i64,
        target: &Currency,
    ) -> BillingResult<UsageCharge> {
        let converted = config.in_currency(&self.exchange, target, self.explicit_rate)?;
        let charge = charge_between(&converted, old_used, new_used)?;
        tracing::debug!(
            metric_id = %config.metric_id,
            old_used,
            new_used,
            delta = charge.delta_charge,
            "usage charge computed"
        );
        Ok(charge)
    }

    /// Charge for a snapshot against the plan's metric configs.
    ///
    /// Usage on a metric the plan does not price is informational: the
    /// result is a zero charge, not an error.
    pub fn charge_snapshot(
        &self,
        configs: &[MetricChargeConfig],
        snapshot: &UsageSnapshot,
        target: &Currency,
    ) -> BillingResult<UsageCharge> {
        match configs.iter().find(|c| c.metric_id == snapshot.metric_id) {
            Some(config) => self.compute_charge(config, snapshot.old_used, snapshot.new_used, target),
            None => {
                tracing::debug!(metric_id = %snapshot.metric_id, "usage on unconfigured metric");
                Ok(UsageCharge::zero(
                    &snapshot.metric_id,
                    target.clone(),
                    snapshot.old_used,
                    snapshot.new_used,
                ))
            }
        }
    }
}
