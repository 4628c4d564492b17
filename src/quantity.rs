//! Decimal-exact quantity arithmetic.
//!
//! Every stock and allocation quantity in the engine is a [`Decimal`]. Binary floating point
//! would break the equality comparisons the availability invariants rely on.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Default precision for allocation and stock quantities.
pub const DEFAULT_PRECISION: u32 = 2;

/// Tolerance used when comparing available against required quantity under lock.
pub const COMMIT_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundingMode {
    Ceil,
    Floor,
    HalfUp,
}

impl Default for RoundingMode {
    fn default() -> Self {
        RoundingMode::HalfUp
    }
}

impl RoundingMode {
    fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingMode::Ceil => RoundingStrategy::ToPositiveInfinity,
            RoundingMode::Floor => RoundingStrategy::ToNegativeInfinity,
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
        }
    }
}

pub fn round_quantity(value: Decimal, mode: RoundingMode, precision: u32) -> Decimal {
    value.round_dp_with_strategy(precision, mode.strategy())
}

/// HALF_UP at two decimals.
pub fn round_default(value: Decimal) -> Decimal {
    round_quantity(value, RoundingMode::HalfUp, DEFAULT_PRECISION)
}

/// Unit definition of one item, as far as conversion is concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitProfile<'a> {
    pub product_id: i64,
    pub internal_unit: &'a str,
}

/// Converts an externally expressed quantity into the item's internal unit.
///
/// Same unit: returned unchanged. Otherwise `factor` must be present (one external unit equals
/// `factor` internal units); the product is rounded HALF_UP to two decimals.
pub fn to_internal(
    item: &UnitProfile<'_>,
    qty_external: Decimal,
    external_unit: &str,
    factor: Option<Decimal>,
) -> Result<Decimal, ServiceError> {
    if qty_external.is_sign_negative() && !qty_external.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "Quantity must not be negative, got {} {}",
            qty_external, external_unit
        )));
    }

    if units_match(item.internal_unit, external_unit) {
        return Ok(qty_external);
    }

    let factor = positive_factor(item, external_unit, factor)?;
    Ok(round_default(qty_external * factor))
}

/// Inverse of [`to_internal`]: internal quantity back into `external_unit`.
pub fn from_internal(
    item: &UnitProfile<'_>,
    qty_internal: Decimal,
    external_unit: &str,
    factor: Option<Decimal>,
) -> Result<Decimal, ServiceError> {
    if qty_internal.is_sign_negative() && !qty_internal.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "Quantity must not be negative, got {} {}",
            qty_internal, item.internal_unit
        )));
    }

    if units_match(item.internal_unit, external_unit) {
        return Ok(qty_internal);
    }

    let factor = positive_factor(item, external_unit, factor)?;
    Ok(round_default(qty_internal / factor))
}

fn units_match(internal: &str, external: &str) -> bool {
    internal.trim().eq_ignore_ascii_case(external.trim())
}

fn positive_factor(
    item: &UnitProfile<'_>,
    external_unit: &str,
    factor: Option<Decimal>,
) -> Result<Decimal, ServiceError> {
    match factor {
        Some(f) if f > Decimal::ZERO => Ok(f),
        _ => Err(ServiceError::Conversion {
            product_id: item.product_id,
            unit: external_unit.to_string(),
        }),
    }
}
