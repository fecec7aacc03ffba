// SPDX-License-Identifier: MIT OR Apache-2.0
//! Monetary amounts as integer cents.

use crate::error::MoneyError;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A monetary amount held as integer cents.
///
/// Amounts enter the relay as decimal strings with at most two
/// fractional digits ("15.99", "-18.38") and are converted once at the
/// boundary; all arithmetic and canonical encoding operate on cents.
///
/// # Examples
///
/// ```
/// use srm_core::Money;
///
/// let m: Money = "15.99".parse().unwrap();
/// assert_eq!(m.cents(), 1599);
/// assert_eq!(m.to_string(), "15.99");
///
/// let n: Money = "-18.38".parse().unwrap();
/// assert_eq!(n.cents(), -1838);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money(i64);

impl Money {
    /// Construct from an integer number of cents.
    #[must_use]
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// The amount in integer cents.
    #[must_use]
    pub fn cents(&self) -> i64 {
        self.0
    }

    /// Negate the amount (cancellations carry negated lines).
    #[must_use]
    pub fn negate(&self) -> Self {
        Self(-self.0)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(MoneyError::Invalid(s.to_string()));
        }
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(MoneyError::Invalid(s.to_string()));
        }
        if frac.len() > 2 {
            return Err(MoneyError::TooManyDecimals(s.to_string()));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(MoneyError::Invalid(s.to_string()));
        }
        let whole_part: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| MoneyError::Invalid(s.to_string()))?
        };
        let frac_part: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| MoneyError::Invalid(s.to_string()))? * 10,
            _ => frac.parse().map_err(|_| MoneyError::Invalid(s.to_string()))?,
        };
        let cents = whole_part
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac_part))
            .ok_or_else(|| MoneyError::Invalid(s.to_string()))?;
        Ok(Self(if negative { -cents } else { cents }))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
