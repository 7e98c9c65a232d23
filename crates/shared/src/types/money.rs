//! Fixed-point money with a mandatory rounding policy.
//!
//! CRITICAL: Never use floating-point for money calculations.
//! Every `Money` value holds a `rust_decimal::Decimal` rounded half away from
//! zero to [`MONEY_SCALE`] decimal places, and every arithmetic operation
//! re-applies that rounding, so silent truncation cannot happen.

use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Number of decimal places money is kept at.
pub const MONEY_SCALE: u32 = 2;

/// Rounds a raw decimal to money precision (half away from zero).
///
/// ```
/// use rust_decimal_macros::dec;
/// use tally_shared::types::money::round_money;
///
/// assert_eq!(round_money(dec!(0.005)), dec!(0.01));
/// assert_eq!(round_money(dec!(-0.005)), dec!(-0.01));
/// ```
#[must_use]
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    if rounded.is_zero() {
        rounded.set_sign_positive(true);
    }
    rounded
}

/// A signed monetary amount at fixed precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Creates a money value, rounding to money precision.
    #[must_use]
    pub fn new(amount: Decimal) -> Self {
        Self(round_money(amount))
    }

    /// The zero amount.
    #[must_use]
    pub fn zero() -> Self {
        Self::new(Decimal::ZERO)
    }

    /// Returns the underlying decimal.
    #[must_use]
    pub const fn amount(self) -> Decimal {
        self.0
    }

    /// Returns true if the amount is zero.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the amount is strictly negative.
    #[must_use]
    pub fn is_negative(self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Returns true if the amount is strictly positive.
    #[must_use]
    pub fn is_positive(self) -> bool {
        self.0 > Decimal::ZERO
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.0 + rhs.0)
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
        Self::new(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(dec!(0.005), dec!(0.01))]
    #[case(dec!(-0.005), dec!(-0.01))]
    #[case(dec!(1.234), dec!(1.23))]
    #[case(dec!(1.235), dec!(1.24))]
    #[case(dec!(2.5), dec!(2.50))]
    #[case(dec!(-2.345), dec!(-2.35))]
    #[case(dec!(100), dec!(100.00))]
    fn test_rounds_half_away_from_zero(#[case] raw: Decimal, #[case] expected: Decimal) {
        assert_eq!(Money::new(raw).amount(), expected);
    }

    #[test]
    fn test_money_keeps_two_places() {
        assert_eq!(Money::new(dec!(12.3)).to_string(), "12.30");
        assert_eq!(Money::zero().to_string(), "0.00");
    }

    #[test]
    fn test_negative_zero_is_normalized() {
        let money = Money::new(dec!(-0.001));
        assert!(money.is_zero());
        assert!(!money.is_negative());
        assert_eq!(money.to_string(), "0.00");
    }

    #[test]
    fn test_arithmetic_rounds() {
        let a = Money::new(dec!(100));
        let b = Money::new(dec!(50));
        let c = Money::new(dec!(-30));
        assert_eq!((a + b + c).amount(), dec!(120));
        assert_eq!((a - b).amount(), dec!(50));
        assert_eq!((-c).amount(), dec!(30));

        let mut total = Money::zero();
        total += Money::new(dec!(0.333));
        total += Money::new(dec!(0.333));
        total -= Money::new(dec!(0.001));
        assert_eq!(total.amount(), dec!(0.66));
    }

    #[test]
    fn test_sum() {
        let values = [Money::new(dec!(1.10)), Money::new(dec!(2.20)), Money::new(dec!(-0.30))];
        let owned: Money = values.iter().copied().sum();
        let borrowed: Money = values.iter().sum();
        assert_eq!(owned.amount(), dec!(3.00));
        assert_eq!(owned, borrowed);
    }

    #[test]
    fn test_sign_predicates() {
        assert!(Money::new(dec!(0.01)).is_positive());
        assert!(Money::new(dec!(-0.01)).is_negative());
        assert!(Money::zero().is_zero());
        assert!(!Money::zero().is_positive());
    }

    #[test]
    fn test_serde_rounds_on_the_way_in() {
        let money: Money = serde_json::from_str("\"10.005\"").unwrap();
        assert_eq!(money.amount(), dec!(10.01));
        assert_eq!(serde_json::to_string(&money).unwrap(), "\"10.01\"");
    }
}
