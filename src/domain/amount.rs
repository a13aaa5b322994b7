//! Amount type
//!
//! Domain primitive for point amounts with business rule validation.
//! Points are stored as integer minor units (hundredths of a point); the
//! decimal form only exists at the HTTP boundary.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

/// Minor units per point
pub const MINOR_UNITS: i64 = 100;

/// Decimal places of the minor unit
const MINOR_SCALE: u32 = 2;

/// Maximum single amount (10 billion points)
const MAX_MINOR: i64 = 1_000_000_000_000;

/// Amount represents a validated, strictly positive number of minor units.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - Maximum value is 10 billion points
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use loyalty_ledger::domain::Amount;
///
/// let amount = Amount::from_points(Decimal::new(75150, 2)).unwrap();
/// assert_eq!(amount.minor(), 75150);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    /// Create an Amount from minor units.
    pub fn from_minor(minor: i64) -> Result<Self, DomainError> {
        if minor <= 0 {
            return Err(DomainError::InvalidAmount(format!(
                "must be positive (got {})",
                to_points(minor)
            )));
        }

        if minor > MAX_MINOR {
            return Err(DomainError::InvalidAmount(format!(
                "exceeds maximum of {}",
                to_points(MAX_MINOR)
            )));
        }

        Ok(Self(minor))
    }

    /// Create an Amount from a decimal number of points.
    ///
    /// At most two fractional digits are accepted; anything finer cannot be
    /// represented in minor units and is rejected rather than rounded.
    pub fn from_points(points: Decimal) -> Result<Self, DomainError> {
        let normalized = points.normalize();
        if normalized.scale() > MINOR_SCALE {
            return Err(DomainError::InvalidAmount(format!(
                "too many decimal places (max {}, got {})",
                MINOR_SCALE,
                normalized.scale()
            )));
        }

        let minor = normalized
            .checked_mul(Decimal::from(MINOR_UNITS))
            .and_then(|d| d.to_i64())
            .ok_or_else(|| DomainError::InvalidAmount(format!("out of range: {}", points)))?;

        Self::from_minor(minor)
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    pub fn points(&self) -> Decimal {
        to_points(self.0)
    }
}

/// Render minor units as a decimal number of points.
pub fn to_points(minor: i64) -> Decimal {
    Decimal::new(minor, MINOR_SCALE)
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.points())
    }
}

impl FromStr for Amount {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let points = Decimal::from_str(s.trim())
            .map_err(|e| DomainError::InvalidAmount(e.to_string()))?;
        Amount::from_points(points)
    }
}

impl TryFrom<i64> for Amount {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Amount::from_minor(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}
