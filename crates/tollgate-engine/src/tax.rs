//! Tax Calculator
//!
//! Tax percentages are basis points: 10000 = 100%, so 900 = 9%.

use tollgate_common::{apply_basis_points, BASIS_POINTS_SCALE};

use crate::{BillingError, BillingResult};

/// Reject negative percentages and anything at or above 100%.
pub fn validate_tax_percentage(basis_points: i64) -> BillingResult<()> {
    if !(0..BASIS_POINTS_SCALE).contains(&basis_points) {
        return Err(BillingError::InvalidTaxPercentage(basis_points));
    }
    Ok(())
}

/// `round(base * basis_points / 10000)`, half away from zero.
///
/// A negative base is taxed as zero.
pub fn apply_tax(base: i64, basis_points: i64) -> BillingResult<i64> {
    validate_tax_percentage(basis_points)?;
    if base <= 0 || basis_points == 0 {
        return Ok(0);
    }
    Ok(apply_basis_points(base, basis_points)?)
}
