//! Exact money amounts.
//!
//! Every monetary value in the ledger (balances, transaction amounts, cash-up
//! variances) is a [`Money`], stored as signed **integer cents** so that no
//! floating-point drift can creep into balances.

use crate::errors::Error;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    ops::{Add, AddAssign, Neg, Sub},
    str::FromStr,
};

/// Signed amount with exactly two fractional digits, held as cents.
///
/// ```rust
/// use tag_ledger::money::Money;
///
/// let amount: Money = "12.30".parse().unwrap();
/// assert_eq!(amount.cents(), 1230);
/// assert_eq!(amount.to_string(), "12.30");
/// assert!("12.345".parse::<Money>().is_err());
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Money(i64);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Largest amount a single ledger entry may carry (1,000,000.00).
    pub const MAX_ENTRY: Self = Self(100_000_000);

    /// Creates an amount from integer cents.
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Raw value in cents.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Absolute value.
    #[must_use]
    pub const fn abs(self) -> Self {
        Self(self.0.abs())
    }

    /// Checked addition (returns `None` on overflow).
    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Checked subtraction (returns `None` on overflow).
    #[must_use]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Rejects anything below the smallest ledger amount (0.01) or above
    /// [`Money::MAX_ENTRY`].
    pub fn ensure_positive(self) -> Result<Self, Error> {
        if self.0 < 1 || self > Self::MAX_ENTRY {
            return Err(Error::InvalidAmount {
                amount: self.to_string(),
            });
        }
        Ok(self)
    }

    /// Ratio `self / base` as a percentage, rounded to two decimals.
    ///
    /// Returns `0.0` when `base` is zero.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percentage_of(self, base: Self) -> f64 {
        if base.0 == 0 {
            return 0.0;
        }
        let ratio = (self.0 as f64 / base.0 as f64) * 100.0;
        (ratio * 100.0).round() / 100.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

// Operators saturate at the i64 bounds; use `checked_add`/`checked_sub`
// where overflow must be detected.
impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(self.0.saturating_neg())
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, m| acc + m)
    }
}

impl FromStr for Money {
    type Err = Error;

    /// Parses `"10"`, `"10.5"`, `"10.50"`, `"-0.01"`; `,` is accepted as the
    /// decimal separator. More than two fractional digits is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidAmount {
            amount: s.to_string(),
        };

        let trimmed = s.trim();
        let (negative, rest) = match trimmed.strip_prefix('-') {
            Some(stripped) => (true, stripped),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let rest = rest.replace(',', ".");
        let (units_str, frac_str) = match rest.split_once('.') {
            Some((units, frac)) => (units, frac),
            None => (rest.as_str(), ""),
        };

        if units_str.is_empty() || !units_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac_str.len() > 2 || !frac_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let units: i64 = units_str.parse().map_err(|_| invalid())?;
        let cents: i64 = match frac_str.len() {
            0 => 0,
            1 => frac_str.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac_str.parse().map_err(|_| invalid())?,
        };

        let total = units
            .checked_mul(100)
            .and_then(|v| v.checked_add(cents))
            .ok_or_else(invalid)?;

        Ok(Self(if negative { -total } else { total }))
    }
}

impl TryFrom<String> for Money {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Money> for String {
    fn from(value: Money) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;

    #[test]
    fn display_always_has_two_decimals() {
        assert_eq!(Money::ZERO.to_string(), "0.00");
        assert_eq!(Money::from_cents(1).to_string(), "0.01");
        assert_eq!(Money::from_cents(4500).to_string(), "45.00");
        assert_eq!(Money::from_cents(-100).to_string(), "-1.00");
    }

    #[test]
    fn parse_accepts_common_forms() {
        assert_eq!("50".parse::<Money>().unwrap().cents(), 5000);
        assert_eq!("50.5".parse::<Money>().unwrap().cents(), 5050);
        assert_eq!("0,99".parse::<Money>().unwrap().cents(), 99);
        assert_eq!(" -1.00 ".parse::<Money>().unwrap().cents(), -100);
        assert_eq!("+2.30".parse::<Money>().unwrap().cents(), 230);
    }

    #[test]
    fn parse_rejects_bad_precision_and_garbage() {
        assert!("12.345".parse::<Money>().is_err());
        assert!("".parse::<Money>().is_err());
        assert!(".5".parse::<Money>().is_err());
        assert!("1.2.3".parse::<Money>().is_err());
        assert!("abc".parse::<Money>().is_err());
    }

    #[test]
    fn ensure_positive_rejects_zero_and_negative() {
        assert!(Money::ZERO.ensure_positive().is_err());
        assert!(Money::from_cents(-5).ensure_positive().is_err());
        assert_eq!(Money::from_cents(1).ensure_positive().unwrap().cents(), 1);
    }

    #[test]
    fn ensure_positive_rejects_amounts_above_entry_limit() {
        assert!(Money::MAX_ENTRY.ensure_positive().is_ok());
        assert!(Money::from_cents(100_000_001).ensure_positive().is_err());
        assert!(Money::from_cents(i64::MAX).ensure_positive().is_err());
    }

    #[test]
    fn sums_saturate_instead_of_overflowing() {
        let huge = [Money::from_cents(i64::MAX), Money::from_cents(1)];
        assert_eq!(huge.into_iter().sum::<Money>().cents(), i64::MAX);
        assert_eq!((Money::from_cents(i64::MIN) - Money::from_cents(1)).cents(), i64::MIN);
        assert_eq!((-Money::from_cents(i64::MIN)).cents(), i64::MAX);
        assert!(Money::from_cents(i64::MAX).checked_add(Money::from_cents(1)).is_none());
    }

    #[test]
    fn percentage_rounds_to_two_decimals() {
        let variance = Money::from_cents(-100);
        let expected = Money::from_cents(4500);
        assert_eq!(variance.percentage_of(expected), -2.22);
        assert_eq!(variance.percentage_of(Money::ZERO), 0.0);
    }

    #[test]
    fn serde_uses_decimal_strings() {
        let json = serde_json::to_string(&Money::from_cents(500)).unwrap();
        assert_eq!(json, "\"5.00\"");
        let back: Money = serde_json::from_str("\"5.00\"").unwrap();
        assert_eq!(back.cents(), 500);
    }
}
