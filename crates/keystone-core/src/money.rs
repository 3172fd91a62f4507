//! # Money — Integer Cents
//!
//! Every monetary quantity in the ledger is a non-negative count of cents.
//! Floating point never appears: `Cents` wraps an `i64` (matching the
//! Postgres `BIGINT` column type) and every arithmetic operation is checked.

use serde::{Deserialize, Serialize};

use crate::error::MoneyError;

/// A non-negative amount in cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Cents(i64);

impl Cents {
    /// Zero cents.
    pub const ZERO: Cents = Cents(0);

    /// Construct from a raw cent count, rejecting negatives.
    pub fn new(cents: i64) -> Result<Self, MoneyError> {
        if cents < 0 {
            return Err(MoneyError::Negative(cents));
        }
        Ok(Self(cents))
    }

    /// The raw cent count.
    pub fn get(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition.
    pub fn checked_add(self, other: Cents) -> Result<Cents, MoneyError> {
        self.0
            .checked_add(other.0)
            .map(Cents)
            .ok_or(MoneyError::Overflow)
    }

    /// Checked subtraction; never produces a negative amount.
    pub fn checked_sub(self, other: Cents) -> Result<Cents, MoneyError> {
        if other.0 > self.0 {
            return Err(MoneyError::Insufficient {
                available: self.0,
                requested: other.0,
            });
        }
        Ok(Cents(self.0 - other.0))
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(self, other: Cents) -> Cents {
        Cents((self.0 - other.0).max(0))
    }

    /// Sum an iterator of amounts with overflow checking.
    pub fn checked_sum<I: IntoIterator<Item = Cents>>(iter: I) -> Result<Cents, MoneyError> {
        iter.into_iter()
            .try_fold(Cents::ZERO, |acc, c| acc.checked_add(c))
    }
}

impl TryFrom<i64> for Cents {
    type Error = MoneyError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Cents::new(value)
    }
}

impl From<Cents> for i64 {
    fn from(c: Cents) -> i64 {
        c.0
    }
}

impl std::fmt::Display for Cents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_rejected() {
        assert_eq!(Cents::new(-1), Err(MoneyError::Negative(-1)));
    }

    #[test]
    fn sub_never_goes_negative() {
        let a = Cents::new(500).unwrap();
        let b = Cents::new(700).unwrap();
        assert!(matches!(
            a.checked_sub(b),
            Err(MoneyError::Insufficient { available: 500, requested: 700 })
        ));
        assert_eq!(a.saturating_sub(b), Cents::ZERO);
        assert_eq!(b.checked_sub(a).unwrap().get(), 200);
    }

    #[test]
    fn add_overflow_detected() {
        let max = Cents::new(i64::MAX).unwrap();
        assert_eq!(max.checked_add(Cents::new(1).unwrap()), Err(MoneyError::Overflow));
    }

    #[test]
    fn checked_sum_adds_all() {
        let total = Cents::checked_sum([5000, 2500, 1].into_iter().map(|c| Cents::new(c).unwrap()));
        assert_eq!(total.unwrap().get(), 7501);
    }

    #[test]
    fn serde_rejects_negative() {
        assert!(serde_json::from_str::<Cents>("-5").is_err());
        assert_eq!(serde_json::from_str::<Cents>("7500").unwrap().get(), 7500);
        assert_eq!(serde_json::to_string(&Cents::new(42).unwrap()).unwrap(), "42");
    }
}
