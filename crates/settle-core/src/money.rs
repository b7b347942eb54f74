//! # Money Module
//!
//! Provides the `Money` type and the cents/decimal conversions used at the
//! edge of the engine.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In JavaScript/floating point:                                          │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  A 10% code on 19.99 computed in floats may store 1.9990000000000001   │
//! │  and drift by a cent once it is summed across thousands of orders.     │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents                                            │
//! │    Prices, discounts and totals are i64 minor units end to end.        │
//! │    Decimals exist only at the boundary (admin input, display).         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use settle_core::money::{to_cents, to_decimal, Money};
//! use rust_decimal::Decimal;
//!
//! let price = Money::from_cents(1099);
//! let doubled = price * 2;
//! assert_eq!(doubled.cents(), 2198);
//!
//! // Admin typed "10.995" -> rounded half away from zero
//! assert_eq!(to_cents(Decimal::new(10995, 3)).unwrap(), 1100);
//! assert_eq!(to_decimal(1099), Decimal::new(1099, 2));
//! ```

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

use crate::error::ValidationError;

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: differences (subtotal - discount) may go below zero
///   before they are clamped
/// - **Single field tuple struct**: Zero-cost abstraction over i64
///
/// ## Where Money is Used
/// ```text
/// Product.price_cents ──► OrderItem.unit_price_cents (snapshot)
///                                   │
///                                   ▼
///                         subtotal ──► discounts ──► total (clamped ≥ 0)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents (smallest currency unit).
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

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies money by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use settle_core::money::Money;
    ///
    /// let unit_price = Money::from_cents(299);
    /// assert_eq!(unit_price.multiply_quantity(3).cents(), 897);
    /// ```
    ///
    /// Saturates at the i64 bounds. Pricing paths use
    /// [`Money::checked_multiply_quantity`] instead.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0.saturating_mul(qty))
    }

    /// Multiplies by a quantity, `None` on overflow.
    #[inline]
    pub const fn checked_multiply_quantity(&self, qty: i64) -> Option<Self> {
        match self.0.checked_mul(qty) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Adds two amounts, `None` on overflow.
    #[inline]
    pub const fn checked_add(&self, other: Money) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Returns `floor(self * percent / 100)`.
    ///
    /// Percentage discounts always round down to the cent.
    ///
    /// ## Example
    /// ```rust
    /// use settle_core::money::Money;
    ///
    /// // 15% of 9.99 = 1.4985 -> 1.49
    /// assert_eq!(Money::from_cents(999).percent_floor(15).cents(), 149);
    /// ```
    pub fn percent_floor(&self, percent: i64) -> Money {
        // i128 so large subtotals × 100 cannot overflow
        let raw = (self.0 as i128 * percent as i128).div_euclid(100);
        Money::from_cents(raw as i64)
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

    /// Clamps a negative amount to zero.
    #[inline]
    pub fn clamp_non_negative(self) -> Money {
        if self.0 < 0 {
            Money::zero()
        } else {
            self
        }
    }

    /// Converts to a decimal display value.
    #[inline]
    pub fn to_decimal(&self) -> Decimal {
        to_decimal(self.0)
    }

    /// Formats with an ISO currency code, e.g. `MYR 10.99`.
    ///
    /// Display only; the output never feeds back into stored values.
    pub fn format_with_currency(&self, currency: &str) -> String {
        format!("{} {}", currency, self)
    }
}

// =============================================================================
// Boundary Conversions
// =============================================================================

/// Converts a decimal major-unit value into integer cents.
///
/// Rounds half away from zero to the nearest cent (`10.005 → 1001`).
///
/// ## Errors
/// `OutOfRange` when the value does not fit in i64 cents.
pub fn to_cents(value: Decimal) -> Result<i64, ValidationError> {
    let out_of_range = || ValidationError::OutOfRange {
        field: "amount".to_string(),
        min: i64::MIN,
        max: i64::MAX,
    };

    value
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|scaled| scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|scaled| scaled.to_i64())
        .ok_or_else(out_of_range)
}

/// Converts integer cents into a decimal major-unit value (`1099 → 10.99`).
#[inline]
pub fn to_decimal(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display shows the bare amount with two decimals (`-5.50`).
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

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        self.multiply_quantity(qty)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
