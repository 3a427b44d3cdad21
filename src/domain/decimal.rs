//! Lossless decimal numeric type backed by rust_decimal.
//!
//! Provides canonical parsing from strings, conversion from on-chain
//! fixed-point integers, and formatting without exponent notation.

use alloy_primitives::U256;
use rust_decimal::{Decimal as RustDecimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest decimal scale rust_decimal can represent.
pub const MAX_SCALE: u32 = 28;

/// Lossless decimal numeric type for collateral and debt amounts.
///
/// Backed by rust_decimal to avoid floating-point drift.
/// Serializes to JSON number (not string) by default.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FixedPointError {
    #[error("decimal scale {0} exceeds maximum of {MAX_SCALE}")]
    ScaleTooLarge(u32),
    #[error("fixed-point value {0} does not fit in a 96-bit decimal mantissa")]
    Overflow(String),
}

impl Decimal {
    /// Create a Decimal from a RustDecimal.
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a Decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Decimal)
    }

    /// Convert an on-chain fixed-point integer to a decimal by dividing by
    /// `10^scale`. Exact: no float round trip.
    ///
    /// # Errors
    /// Fails if `scale` exceeds [`MAX_SCALE`] or the raw value does not fit
    /// the decimal mantissa.
    pub fn from_fixed_point(raw: U256, scale: u32) -> Result<Self, FixedPointError> {
        if scale > MAX_SCALE {
            return Err(FixedPointError::ScaleTooLarge(scale));
        }
        let overflow = || FixedPointError::Overflow(raw.to_string());
        let as_u128 = u128::try_from(raw).map_err(|_| overflow())?;
        let as_i128 = i128::try_from(as_u128).map_err(|_| overflow())?;
        RustDecimal::try_from_i128_with_scale(as_i128, scale)
            .map(|d| Decimal(d.normalize()))
            .map_err(|_| overflow())
    }

    /// Debt-to-collateral ratio as a percentage rounded to 2 decimal places
    /// (half away from zero). Zero when collateral is zero. Saturates at
    /// `Decimal::MAX` if the quotient overflows.
    pub fn health_ratio(debt: Decimal, collateral: Decimal) -> Decimal {
        if collateral.is_zero() {
            return Decimal::zero();
        }
        let ratio = debt
            .0
            .checked_div(collateral.0)
            .and_then(|r| r.checked_mul(RustDecimal::ONE_HUNDRED))
            .unwrap_or(RustDecimal::MAX);
        Decimal(
            ratio
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
                .normalize(),
        )
    }

    /// Format the Decimal as a canonical string (no exponent notation).
    pub fn to_canonical_string(&self) -> String {
        // Use normalize() to remove trailing zeros, then format without exponent
        let normalized = self.0.normalize();
        format!("{}", normalized)
    }

    /// Get the underlying RustDecimal.
    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    /// The additive identity (0).
    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    /// Returns true if the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Checked addition, `None` on overflow.
    pub fn checked_add(&self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_add(rhs.0).map(Decimal)
    }

    /// Checked multiplication, `None` on overflow.
    pub fn checked_mul(&self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_mul(rhs.0).map(Decimal)
    }

    /// Checked division, `None` on overflow or division by zero.
    pub fn checked_div(&self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_div(rhs.0).map(Decimal)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<Decimal> for RustDecimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}
