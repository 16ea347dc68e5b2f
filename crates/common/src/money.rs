//! Money in minor currency units.

use serde::{Deserialize, Serialize};

/// Money amount held in minor units (paise, cents) to avoid floating point
/// drift in totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a money amount from minor units (e.g. `1050` = 10.50).
    pub fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Creates a money amount from whole major units.
    pub fn from_major(major: i64) -> Self {
        Self(major * 100)
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in minor units.
    pub fn minor(&self) -> i64 {
        self.0
    }

    /// Returns the whole major-unit portion.
    pub fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor-unit remainder after the major portion.
    pub fn minor_part(&self) -> i64 {
        self.0.abs() % 100
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies by a quantity.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money(self.0 * i64::from(quantity))
    }

    /// Returns `percent`% of this amount, rounded half away from zero to the
    /// nearest minor unit.
    pub fn percent(&self, percent: u32) -> Money {
        let scaled = self.0 * i64::from(percent);
        let rounded = if scaled >= 0 {
            (scaled + 50) / 100
        } else {
            (scaled - 50) / 100
        };
        Money(rounded)
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 < 0 {
            write!(f, "-{}.{:02}", self.major().abs(), self.minor_part())
        } else {
            write!(f, "{}.{:02}", self.major(), self.minor_part())
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_major_scales_to_minor_units() {
        let money = Money::from_major(50);
        assert_eq!(money.minor(), 5000);
        assert_eq!(money.major(), 50);
        assert_eq!(money.minor_part(), 0);
    }

    #[test]
    fn display_uses_two_decimals() {
        assert_eq!(Money::from_minor(1234).to_string(), "12.34");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
        assert_eq!(Money::from_minor(-1234).to_string(), "-12.34");
    }

    #[test]
    fn arithmetic() {
        let a = Money::from_minor(1000);
        let b = Money::from_minor(500);
        assert_eq!((a + b).minor(), 1500);
        assert_eq!((a - b).minor(), 500);
        assert_eq!(a.multiply(3).minor(), 3000);
    }

    #[test]
    fn percent_of_whole_amounts_is_exact() {
        assert_eq!(Money::from_major(200).percent(18), Money::from_major(36));
    }

    #[test]
    fn percent_rounds_half_away_from_zero() {
        // 18% of 0.25 = 0.045 -> 0.05
        assert_eq!(Money::from_minor(25).percent(18).minor(), 5);
        // 18% of 0.22 = 0.0396 -> 0.04
        assert_eq!(Money::from_minor(22).percent(18).minor(), 4);
        assert_eq!(Money::from_minor(-25).percent(18).minor(), -5);
    }

    #[test]
    fn sums_an_iterator() {
        let total: Money = [100, 250, 650].into_iter().map(Money::from_minor).sum();
        assert_eq!(total.minor(), 1000);
    }
}
