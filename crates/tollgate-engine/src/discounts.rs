//! Discount Codes
//!
//! Validity is checked before any amount is computed. A failed check carries a
//! human-readable reason so previews can show why a code does not apply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tollgate_common::{apply_basis_points, Currency, Money, BASIS_POINTS_SCALE};

use crate::exchange::ExchangeResolver;
use crate::{BillingError, BillingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountStatus {
    Active,
    Inactive,
    Expired,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountBillingType {
    /// First invoice only
    OneTime,
    /// Every cycle, optionally limited by `cycle_limit`
    Recurring,
}

/// How a code computes its amount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscountRule {
    Percentage { basis_points: i64 },
    FixedAmount { amount: Money },
    Formula(DiscountFormula),
}

/// Merchant formula: `base * basis_points / 10000 + amount_off`, capped at `max_discount`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountFormula {
    #[serde(default)]
    pub basis_points: i64,
    #[serde(default)]
    pub amount_off: Option<Money>,
    #[serde(default)]
    pub max_discount: Option<Money>,
}

impl DiscountRule {
    /// Same rule with every money amount converted to `target`
    pub fn in_currency(&self, exchange: &ExchangeResolver<'_>, target: &Currency) -> BillingResult<Self> {
        let convert = |money: &Money| exchange.convert(money, target, None);
        Ok(match self {
            Self::Percentage { basis_points } => Self::Percentage {
                basis_points: *basis_points,
            },
            Self::FixedAmount { amount } => Self::FixedAmount {
                amount: convert(amount)?,
            },
            Self::Formula(formula) => Self::Formula(DiscountFormula {
                basis_points: formula.basis_points,
                amount_off: formula.amount_off.as_ref().map(convert).transpose()?,
                max_discount: formula.max_discount.as_ref().map(convert).transpose()?,
            }),
        })
    }

    /// Discount on `base`, capped at `base`. Amounts must already be in the base currency.
    pub fn amount_for(&self, base: i64) -> BillingResult<i64> {
        let base = base.max(0);
        let raw = match self {
            Self::Percentage { basis_points } => {
                validate_percentage(*basis_points)?;
                apply_basis_points(base, *basis_points)?
            }
            Self::FixedAmount { amount } => amount.amount(),
            Self::Formula(formula) => {
                validate_percentage(formula.basis_points)?;
                let percentage = apply_basis_points(base, formula.basis_points)?;
                let off = formula.amount_off.as_ref().map_or(0, |m| m.amount().max(0));
                let total = percentage.saturating_add(off);
                match &formula.max_discount {
                    Some(max) => total.min(max.amount().max(0)),
                    None => total,
                }
            }
        };
        Ok(raw.clamp(0, base))
    }
}

/// Percentage discounts are 0..=100%
pub fn validate_percentage(basis_points: i64) -> BillingResult<()> {
    if !(0..=BASIS_POINTS_SCALE).contains(&basis_points) {
        return Err(BillingError::InvalidDiscount(format!(
            "discount percentage must be between 0 and {} basis points, got {}",
            BASIS_POINTS_SCALE, basis_points
        )));
    }
    Ok(())
}

/// Stored discount code record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountCode {
    pub code: String,
    pub name: String,
    pub status: DiscountStatus,
    pub billing_type: DiscountBillingType,
    pub rule: DiscountRule,
    /// Cycles a recurring code applies for; 0 means unlimited
    #[serde(default)]
    pub cycle_limit: u32,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    /// Plans the code applies to; empty means any plan
    #[serde(default)]
    pub plan_ids: Vec<String>,
    #[serde(default)]
    pub new_user_only: bool,
    #[serde(default)]
    pub upgrade_only: bool,
    #[serde(default)]
    pub renewal_only: bool,
}

/// Facts about the purchase a code is checked against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountEligibility {
    pub plan_id: String,
    pub now: DateTime<Utc>,
    #[serde(default)]
    pub is_new_user: bool,
    #[serde(default)]
    pub is_upgrade: bool,
    #[serde(default)]
    pub is_renewal: bool,
    /// Invoice contains one-time addons
    #[serde(default)]
    pub has_one_time_addons: bool,
    /// Cycles this code has already been applied to the subscription
    #[serde(default)]
    pub applied_cycles: u32,
}

impl DiscountEligibility {
    pub fn new(plan_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            plan_id: plan_id.into(),
            now,
            is_new_user: false,
            is_upgrade: false,
            is_renewal: false,
            has_one_time_addons: false,
            applied_cycles: 0,
        }
    }
}

/// Outcome of a validity check: `(valid, reason)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountValidation {
    pub valid: bool,
    pub reason: Option<String>,
}

impl DiscountValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn rejected(reason: String) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

impl DiscountCode {
    /// Evaluate every applicability predicate, first failure wins
    pub fn validate(&self, ctx: &DiscountEligibility) -> DiscountValidation {
        match self.first_violation(ctx) {
            Some(reason) => {
                tracing::debug!(code = %self.code, %reason, "discount code rejected");
                DiscountValidation::rejected(reason)
            }
            None => DiscountValidation::ok(),
        }
    }

    fn first_violation(&self, ctx: &DiscountEligibility) -> Option<String> {
        if self.status != DiscountStatus::Active {
            return Some(format!("discount code {} is not active", self.code));
        }
        if let Some(starts_at) = self.starts_at {
            if ctx.now < starts_at {
                return Some(format!("discount code {} is not yet valid", self.code));
            }
        }
        if let Some(ends_at) = self.ends_at {
            if ctx.now > ends_at {
                return Some(format!("discount code {} has expired", self.code));
            }
        }
        if !self.plan_ids.is_empty() && !self.plan_ids.iter().any(|p| p == &ctx.plan_id) {
            return Some(format!(
                "discount code {} does not apply to plan {}",
                self.code, ctx.plan_id
            ));
        }
        if self.new_user_only && !ctx.is_new_user {
            return Some(format!("discount code {} is for new users only", self.code));
        }
        if self.upgrade_only && !ctx.is_upgrade {
            return Some(format!("discount code {} is for upgrades only", self.code));
        }
        if self.renewal_only && !ctx.is_renewal {
            return Some(format!("discount code {} is for renewals only", self.code));
        }
        match self.billing_type {
            DiscountBillingType::Recurring => {
                if ctx.has_one_time_addons {
                    return Some(format!(
                        "recurring discount code {} cannot be used with one-time addons",
                        self.code
                    ));
                }
                if self.cycle_limit > 0 && ctx.applied_cycles >= self.cycle_limit {
                    return Some(format!(
                        "discount code {} already used for {} cycles",
                        self.code, self.cycle_limit
                    ));
                }
            }
            DiscountBillingType::OneTime => {
                if ctx.applied_cycles > 0 {
                    return Some(format!("discount code {} has already been used", self.code));
                }
            }
        }
        None
    }
}

/// Caller's discount input. Sources are mutually exclusive and taken in
/// priority order: explicit amount, explicit percentage, stored code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountRequest {
    /// Absolute amount in the invoice currency (API only)
    #[serde(default)]
    pub explicit_amount: Option<i64>,
    /// Basis points (API only)
    #[serde(default)]
    pub explicit_percentage: Option<i64>,
    #[serde(default)]
    pub code: Option<DiscountCode>,
    pub eligibility: DiscountEligibility,
}

impl DiscountRequest {
    pub fn code(code: DiscountCode, eligibility: DiscountEligibility) -> Self {
        Self {
            explicit_amount: None,
            explicit_percentage: None,
            code: Some(code),
            eligibility,
        }
    }

    /// Source that will be applied, after priority resolution
    pub fn source(&self) -> Option<DiscountSource<'_>> {
        if let Some(amount) = self.explicit_amount {
            Some(DiscountSource::ExplicitAmount(amount))
        } else if let Some(basis_points) = self.explicit_percentage {
            Some(DiscountSource::ExplicitPercentage(basis_points))
        } else {
            self.code.as_ref().map(DiscountSource::Code)
        }
    }

    /// A stored code will be applied
    pub fn uses_code(&self) -> bool {
        matches!(self.source(), Some(DiscountSource::Code(_)))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum DiscountSource<'a> {
    ExplicitAmount(i64),
    ExplicitPercentage(i64),
    Code(&'a DiscountCode),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn code(rule: DiscountRule) -> DiscountCode {
        DiscountCode {
            code: "SPRING10".into(),
            name: "Spring".into(),
            status: DiscountStatus::Active,
            billing_type: DiscountBillingType::OneTime,
            rule,
            cycle_limit: 0,
            starts_at: None,
            ends_at: None,
            plan_ids: vec![],
            new_user_only: false,
            upgrade_only: false,
            renewal_only: false,
        }
    }

    fn ten_percent() -> DiscountCode {
        code(DiscountRule::Percentage { basis_points: 1000 })
    }

    #[test]
    fn test_percentage_amount() {
        let rule = DiscountRule::Percentage { basis_points: 1000 };
        assert_eq!(rule.amount_for(7000).unwrap(), 700);
        assert_eq!(rule.amount_for(0).unwrap(), 0);
        // 5 * 10% = 0.5 rounds away from zero
        assert_eq!(rule.amount_for(5).unwrap(), 1);
    }

    #[test]
    fn test_fixed_amount_capped() {
        let rule = DiscountRule::FixedAmount {
            amount: Money::new(2500, Currency::USD),
        };
        assert_eq!(rule.amount_for(10_000).unwrap(), 2500);
        assert_eq!(rule.amount_for(1000).unwrap(), 1000);

        let negative = DiscountRule::FixedAmount {
            amount: Money::new(-10, Currency::USD),
        };
        assert_eq!(negative.amount_for(1000).unwrap(), 0);
    }

    #[test]
    fn test_formula() {
        let rule = DiscountRule::Formula(DiscountFormula {
            basis_points: 500,
            amount_off: Some(Money::new(100, Currency::USD)),
            max_discount: Some(Money::new(400, Currency::USD)),
        });
        // 5% of 2000 + 100
        assert_eq!(rule.amount_for(2000).unwrap(), 200);
        // 5% of 10000 + 100 capped at 400
        assert_eq!(rule.amount_for(10_000).unwrap(), 400);
        assert_eq!(rule.amount_for(50).unwrap(), 50);
    }

    #[test]
    fn test_percentage_out_of_range() {
        let rule = DiscountRule::Percentage { basis_points: 10_001 };
        assert!(matches!(
            rule.amount_for(100),
            Err(BillingError::InvalidDiscount(_))
        ));
        assert!(validate_percentage(10_000).is_ok());
        assert!(validate_percentage(-1).is_err());
    }

    #[test]
    fn test_valid_code() {
        let ctx = DiscountEligibility::new("pro", now());
        assert!(ten_percent().validate(&ctx).valid);
    }

    #[test]
    fn test_inactive_code() {
        let mut code = ten_percent();
        code.status = DiscountStatus::Archived;
        let result = code.validate(&DiscountEligibility::new("pro", now()));
        assert!(!result.valid);
        assert!(result.reason.unwrap().contains("not active"));
    }

    #[test]
    fn test_date_window() {
        let mut code = ten_percent();
        code.starts_at = Some(now() + Duration::days(1));
        assert!(!code.validate(&DiscountEligibility::new("pro", now())).valid);

        code.starts_at = Some(now() - Duration::days(10));
        code.ends_at = Some(now() - Duration::days(1));
        let expired = code.validate(&DiscountEligibility::new("pro", now()));
        assert!(expired.reason.unwrap().contains("expired"));

        code.ends_at = Some(now() + Duration::days(1));
        assert!(code.validate(&DiscountEligibility::new("pro", now())).valid);
    }

    #[test]
    fn test_plan_applicability() {
        let mut code = ten_percent();
        code.plan_ids = vec!["enterprise".into()];
        assert!(!code.validate(&DiscountEligibility::new("pro", now())).valid);
        assert!(code.validate(&DiscountEligibility::new("enterprise", now())).valid);
    }

    #[test]
    fn test_user_predicates() {
        let mut code = ten_percent();
        code.new_user_only = true;
        let mut ctx = DiscountEligibility::new("pro", now());
        assert!(!code.validate(&ctx).valid);
        ctx.is_new_user = true;
        assert!(code.validate(&ctx).valid);

        code.upgrade_only = true;
        assert!(!code.validate(&ctx).valid);
        ctx.is_upgrade = true;
        assert!(code.validate(&ctx).valid);

        code.renewal_only = true;
        assert!(!code.validate(&ctx).valid);
        ctx.is_renewal = true;
        assert!(code.validate(&ctx).valid);
    }

    #[test]
    fn test_recurring_with_one_time_addons() {
        let mut code = ten_percent();
        let mut ctx = DiscountEligibility::new("pro", now());
        ctx.has_one_time_addons = true;

        // a one-time code is fine
        assert!(code.validate(&ctx).valid);

        code.billing_type = DiscountBillingType::Recurring;
        let result = code.validate(&ctx);
        assert!(!result.valid);
        assert!(result.reason.unwrap().contains("one-time addons"));
    }

    #[test]
    fn test_cycle_limits() {
        let mut code = ten_percent();
        let mut ctx = DiscountEligibility::new("pro", now());
        ctx.applied_cycles = 1;
        assert!(!code.validate(&ctx).valid);

        code.billing_type = DiscountBillingType::Recurring;
        code.cycle_limit = 3;
        assert!(code.validate(&ctx).valid);
        ctx.applied_cycles = 3;
        assert!(!code.validate(&ctx).valid);

        code.cycle_limit = 0;
        ctx.applied_cycles = 100;
        assert!(code.validate(&ctx).valid);
    }

    #[test]
    fn test_source_priority() {
        let ctx = DiscountEligibility::new("pro", now());
        let mut request = DiscountRequest::code(ten_percent(), ctx);
        assert!(request.uses_code());

        request.explicit_percentage = Some(2000);
        assert!(matches!(
            request.source(),
            Some(DiscountSource::ExplicitPercentage(2000))
        ));
        assert!(!request.uses_code());

        request.explicit_amount = Some(150);
        assert!(matches!(
            request.source(),
            Some(DiscountSource::ExplicitAmount(150))
        ));
    }

    #[test]
    fn test_deserialize_code() {
        let json = r#"{
            "code": "FLAT5",
            "name": "Five off",
            "status": "active",
            "billing_type": "recurring",
            "rule": { "type": "fixed_amount", "amount": { "amount": 500, "currency": "usd" } },
            "cycle_limit": 2
        }"#;
        let code: DiscountCode = serde_json::from_str(json).unwrap();
        assert_eq!(code.billing_type, DiscountBillingType::Recurring);
        assert_eq!(code.rule.amount_for(300).unwrap(), 300);
        assert!(code.plan_ids.is_empty());
    }
}
