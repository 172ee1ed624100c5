//! # Quantity Module
//!
//! Stock quantities in thousandths of a unit.
//!
//! Products sold by weight or volume need fractional quantities, down to
//! `0.001`. Storing them as integer milli-units keeps stock arithmetic exact,
//! the same way [`Money`](crate::Money) keeps amounts exact.
//!
//! ```rust
//! use tally_core::Quantity;
//!
//! let a = Quantity::from_units(2);
//! let b = Quantity::from_milli(250);
//! assert_eq!((a + b).to_string(), "2.250");
//! assert_eq!(Quantity::from_units(4).to_string(), "4");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Number of stored steps per whole unit.
pub const MILLI_PER_UNIT: i64 = 1_000;

/// A signed stock quantity in thousandths of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Quantity(i64);

impl Quantity {
    /// Creates a quantity from whole units.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Quantity(units * MILLI_PER_UNIT)
    }

    /// Creates a quantity from thousandths of a unit.
    #[inline]
    pub const fn from_milli(milli: i64) -> Self {
        Quantity(milli)
    }

    /// Returns the raw value in thousandths of a unit.
    #[inline]
    pub const fn milli(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Quantity(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the smaller of two quantities.
    #[inline]
    pub fn min(self, other: Quantity) -> Quantity {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }

    /// Returns the larger of two quantities.
    #[inline]
    pub fn max(self, other: Quantity) -> Quantity {
        if self.0 >= other.0 {
            self
        } else {
            other
        }
    }
}

/// Whole quantities print without decimals, fractional ones with three.
impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let units = abs / MILLI_PER_UNIT;
        let frac = abs % MILLI_PER_UNIT;
        if frac == 0 {
            write!(f, "{}{}", sign, units)
        } else {
            write!(f, "{}{}.{:03}", sign, units, frac)
        }
    }
}

impl Add for Quantity {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Quantity(self.0 + other.0)
    }
}

impl AddAssign for Quantity {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Quantity {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Quantity(self.0 - other.0)
    }
}

impl SubAssign for Quantity {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Quantity {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Quantity(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_and_milli() {
        assert_eq!(Quantity::from_units(3).milli(), 3_000);
        assert_eq!(Quantity::from_milli(1).milli(), 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(Quantity::from_units(10).to_string(), "10");
        assert_eq!(Quantity::from_milli(1_500).to_string(), "1.500");
        assert_eq!(Quantity::from_milli(1).to_string(), "0.001");
        assert_eq!(Quantity::from_units(-4).to_string(), "-4");
    }

    #[test]
    fn test_min_max_neg() {
        let a = Quantity::from_units(2);
        let b = Quantity::from_units(5);
        assert_eq!(a.min(b), a);
        assert_eq!(a.max(b), b);
        assert_eq!((-a).milli(), -2_000);
        assert_eq!((b - a).milli(), 3_000);
    }
}
