//! Order number checksum
//!
//! Luhn (mod 10) validation for the external numbers of purchase orders.
//! Catches every single-digit transcription error and most adjacent swaps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

/// Validate a number against the Luhn checksum.
///
/// Digits are taken least significant first; every digit at an even 1-based
/// position is doubled, and doubled values above 9 are reduced by 9.
/// The number is valid iff the digit sum is divisible by 10.
/// Zero and negative numbers have no usable digit sequence and are rejected.
pub fn validate(number: i64) -> Result<(), DomainError> {
    if number <= 0 {
        return Err(DomainError::Checksum(number));
    }

    if luhn_sum(number) % 10 != 0 {
        return Err(DomainError::Checksum(number));
    }

    Ok(())
}

/// Weighted Luhn digit sum of a positive number.
fn luhn_sum(number: i64) -> u32 {
    digits_reversed(number)
        .enumerate()
        .map(|(idx, digit)| {
            if (idx + 1) % 2 == 0 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum()
}

/// Decimal digits, least significant first.
fn digits_reversed(number: i64) -> impl Iterator<Item = u32> {
    let mut rest = number;
    std::iter::from_fn(move || {
        if rest <= 0 {
            return None;
        }
        let digit = (rest % 10) as u32;
        rest /= 10;
        Some(digit)
    })
}

/// Validated external order number.
///
/// Only constructible through [`OrderNumber::parse`] / [`OrderNumber::new`],
/// so holding one means the checksum already passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct OrderNumber(i64);

impl OrderNumber {
    /// Wrap a numeric order number after checking it.
    pub fn new(number: i64) -> Result<Self, DomainError> {
        validate(number)?;
        Ok(Self(number))
    }

    /// Parse raw order number text as submitted by a client.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::MalformedNumber(trimmed.to_string()));
        }

        let number: i64 = trimmed
            .parse()
            .map_err(|_| DomainError::MalformedNumber(trimmed.to_string()))?;

        Self::new(number)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrderNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<i64> for OrderNumber {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OrderNumber> for i64 {
    fn from(number: OrderNumber) -> Self {
        number.0
    }
}
