//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  0.1 + 0.2 = 0.30000000000000004   (f64)                                │
//! │  10  + 20  = 30                    (cents, i64)                         │
//! │                                                                         │
//! │  Every amount in the engine (prices, discounts, cost layers, refunds,  │
//! │  credit balances) is stored and computed in the smallest currency      │
//! │  unit. "Rounded to 2 decimals" means rounded half-up to whole cents.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tally_core::{Money, Quantity};
//!
//! let unit_cost = Money::from_cents(1250); // 12.50
//! let cost = unit_cost.times(Quantity::from_units(3));
//! assert_eq!(cost.cents(), 3750);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::quantity::{Quantity, MILLI_PER_UNIT};

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: Allows negative deltas for reversals
/// - **Single field tuple struct**: Zero-cost abstraction over i64
/// - **Quantity products**: computed in i128, rounded once
/// - **Operators saturate**: `+`/`-` never wrap or panic; validation keeps
///   real amounts far below the limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// ```rust
    /// use tally_core::Money;
    ///
    /// assert_eq!(Money::from_major_minor(10, 75).cents(), 1075);
    /// assert_eq!(Money::from_major_minor(-5, 50).cents(), -550);
    /// ```
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is greater than zero.
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is less than zero.
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies a unit price/cost by a quantity, rounding half-up to cents.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::{Money, Quantity};
    ///
    /// let unit = Money::from_cents(1000);
    /// assert_eq!(unit.times(Quantity::from_milli(2_500)).cents(), 2500);
    /// // 0.333 × 10.00 = 3.33
    /// assert_eq!(unit.times(Quantity::from_milli(333)).cents(), 333);
    /// ```
    ///
    /// Saturates at the `i64` range; use [`Money::checked_times`] where an
    /// out-of-range product must be reported.
    pub fn times(&self, qty: Quantity) -> Money {
        Money::from_scaled(i128::from(self.0) * i128::from(qty.milli()))
    }

    /// Like [`Money::times`], but `None` when the result leaves the `i64` range.
    ///
    /// ```rust
    /// use tally_core::{Money, Quantity};
    ///
    /// let huge = Money::from_cents(i64::MAX / 2 + 1);
    /// assert!(huge.checked_times(Quantity::from_units(2)).is_none());
    /// ```
    pub fn checked_times(&self, qty: Quantity) -> Option<Money> {
        let scaled = i128::from(self.0) * i128::from(qty.milli());
        i64::try_from(round_div(scaled, i128::from(MILLI_PER_UNIT)))
            .ok()
            .map(Money)
    }

    #[inline]
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    #[inline]
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Divides a total by a quantity, giving a per-unit amount rounded half-up.
    ///
    /// Returns zero when the quantity is not positive.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::{Money, Quantity};
    ///
    /// let total = Money::from_cents(8600);
    /// assert_eq!(total.per_unit(Quantity::from_units(8)).cents(), 1075);
    /// ```
    pub fn per_unit(&self, qty: Quantity) -> Money {
        let milli = i128::from(qty.milli());
        if milli <= 0 {
            return Money::zero();
        }
        let scaled = i128::from(self.0) * i128::from(MILLI_PER_UNIT);
        Money::saturating(round_div(scaled, milli))
    }

    /// Converts a `cents × milli-units` product back to cents, saturating.
    pub(crate) fn from_scaled(scaled: i128) -> Money {
        Money::saturating(round_div(scaled, i128::from(MILLI_PER_UNIT)))
    }

    fn saturating(cents: i128) -> Money {
        match i64::try_from(cents) {
            Ok(cents) => Money(cents),
            Err(_) if cents < 0 => Money(i64::MIN),
            Err(_) => Money(i64::MAX),
        }
    }

    /// Returns the smaller of two amounts.
    #[inline]
    pub fn min(self, other: Money) -> Money {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }
}

/// Integer division rounding half away from zero.
fn round_div(numerator: i128, denominator: i128) -> i128 {
    let half = denominator / 2;
    if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        (numerator - half) / denominator
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain decimal rendering, e.g. `10.75` or `-5.50`.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.minor())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0.saturating_add(other.0))
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 = self.0.saturating_add(other.0);
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0.saturating_sub(other.0))
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 = self.0.saturating_sub(other.0);
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
