//! Fixed-point money with two decimal places.
//!
//! Amounts are held as an integer count of cents (smallest currency unit) so
//! arithmetic is exact. Amounts are never negative.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Non-negative monetary amount in cents.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Money {
    cents: i64,
}

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money { cents: 0 };

    pub fn from_cents(cents: i64) -> DomainResult<Self> {
        if cents < 0 {
            return Err(DomainError::invalid_argument(format!(
                "amount cannot be negative (got {cents} cents)"
            )));
        }
        Ok(Self { cents })
    }

    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// `self * quantity`, overflow-checked.
    pub fn times(self, quantity: i64) -> DomainResult<Money> {
        if quantity < 0 {
            return Err(DomainError::invalid_argument(format!(
                "cannot price a negative quantity ({quantity})"
            )));
        }
        self.cents
            .checked_mul(quantity)
            .map(|cents| Money { cents })
            .ok_or_else(|| DomainError::invariant(format!("{self} x {quantity} overflows")))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.cents / 100, self.cents % 100)
    }
}

/// Running sum of amounts for reporting.
///
/// Each `Money` fits in `i64` cents; the sum of many of them may not, so the
/// total is carried in `i128`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoneyTotal {
    cents: i128,
}

impl ValueObject for MoneyTotal {}

impl MoneyTotal {
    pub const ZERO: MoneyTotal = MoneyTotal { cents: 0 };

    pub fn cents(&self) -> i128 {
        self.cents
    }

    pub fn add(self, amount: Money) -> MoneyTotal {
        MoneyTotal {
            cents: self.cents + i128::from(amount.cents),
        }
    }

    /// Mean over `count` amounts, rounded half-up to the cent.
    /// Zero when `count` is zero.
    pub fn average(self, count: u64) -> Money {
        if count == 0 {
            return Money::ZERO;
        }
        let count = i128::from(count);
        let cents = (self.cents * 2 + count) / (count * 2);
        Money {
            cents: i64::try_from(cents).unwrap_or(i64::MAX),
        }
    }
}

impl From<Money> for MoneyTotal {
    fn from(value: Money) -> Self {
        MoneyTotal {
            cents: i128::from(value.cents),
        }
    }
}

impl core::fmt::Display for MoneyTotal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.cents / 100, self.cents % 100)
    }
}

impl TryFrom<i64> for Money {
    type Error = DomainError;

    fn try_from(cents: i64) -> Result<Self, Self::Error> {
        Money::from_cents(cents)
    }
}

impl From<Money> for i64 {
    fn from(value: Money) -> Self {
        value.cents
    }
}

impl FromStr for Money {
    type Err = DomainError;

    /// Parses `"5"`, `"5.0"` and `"5.00"`. More than two decimals is rejected
    /// rather than silently rounded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || DomainError::invalid_argument(format!("invalid amount: {s:?}"));

        let (units, fraction) = match s.split_once('.') {
            Some((u, f)) => (u, f),
            None => (s, ""),
        };
        if units.is_empty() || !units.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if fraction.len() > 2 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let units: i64 = units.parse().map_err(|_| invalid())?;
        let fraction_cents: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => fraction.parse::<i64>().map_err(|_| invalid())?,
        };

        units
            .checked_mul(100)
            .and_then(|c| c.checked_add(fraction_cents))
            .map(|cents| Money { cents })
            .ok_or_else(invalid)
    }
}
