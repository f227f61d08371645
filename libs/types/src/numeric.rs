//! Fixed-point decimal types for prices and quantities
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! `Price` and `Quantity` are never negative; constructors reject negative
//! inputs so balance invariants cannot be violated by arithmetic alone.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use std::str::FromStr;

/// Price per unit, a non-negative fixed-point decimal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// Create from a decimal, rejecting negative values.
    pub fn try_new(value: Decimal) -> Option<Self> {
        if value.is_sign_negative() {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Create from an integer number of price units.
    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    /// Parse from a decimal string (e.g. "9.50").
    pub fn from_str(s: &str) -> Option<Self> {
        Decimal::from_str(s).ok().and_then(Self::try_new)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// True when strictly greater than zero.
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Quantity of credits, a non-negative fixed-point decimal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Quantity(Decimal);

impl Quantity {
    /// Create from a decimal, rejecting negative values.
    pub fn try_new(value: Decimal) -> Option<Self> {
        if value.is_sign_negative() {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Create from an integer number of units.
    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    /// Parse from a decimal string (e.g. "2.5").
    pub fn from_str(s: &str) -> Option<Self> {
        Decimal::from_str(s).ok().and_then(Self::try_new)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// True when strictly greater than zero.
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Subtraction that fails instead of going negative.
    pub fn checked_sub(&self, other: Quantity) -> Option<Quantity> {
        Self::try_new(self.0 - other.0)
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(&self, other: Quantity) -> Quantity {
        self.checked_sub(other).unwrap_or_else(Quantity::zero)
    }

    /// The smaller of two quantities.
    pub fn min(self, other: Quantity) -> Quantity {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity(self.0 + rhs.0)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
