//! Value Objects for the store

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Money value object, always held at two decimal places.
///
/// The store charges in a single configured currency, so the currency code
/// lives in the payment configuration rather than on every amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub fn new(amount: Decimal) -> Self {
        Self(amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }
    pub fn zero() -> Self { Self(Decimal::ZERO) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn is_zero(&self) -> bool { self.0.is_zero() }

    pub fn add(&self, other: &Money) -> Money { Money::new(self.0 + other.0) }

    /// Difference floored at zero.
    pub fn saturating_sub(&self, other: &Money) -> Money {
        Money::new((self.0 - other.0).max(Decimal::ZERO))
    }

    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.0 * Decimal::from(qty)) }

    /// Applies a percentage discount, rounding half away from zero.
    pub fn percent_off(&self, discount: DiscountPercent) -> Money {
        let factor = Decimal::from(100 - u32::from(discount.value())) / Decimal::ONE_HUNDRED;
        Money::new(self.0 * factor)
    }

    /// Amount in minor currency units (cents), as the payment processor expects.
    pub fn minor_units(&self) -> Option<i64> {
        (self.0 * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
    }
}

impl Default for Money { fn default() -> Self { Self::zero() } }

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:.2}", self.0) }
}

impl std::str::FromStr for Money {
    type Err = rust_decimal::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Ok(Money::new(s.trim().parse::<Decimal>()?)) }
}

/// Integer percentage discount in 0..=100
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscountPercent(u8);

impl DiscountPercent {
    pub const NONE: DiscountPercent = DiscountPercent(0);
    pub fn new(value: u8) -> Self { Self(value.min(100)) }
    pub fn value(&self) -> u8 { self.0 }
}

/// Quantity of a store item on one cart line, always within 1..=99
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineQuantity(u8);

/// How a requested quantity had to be adjusted to fit the line bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityAdjustment { RaisedToMinimum, CappedAtMaximum }

impl LineQuantity {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 99;
    pub const ONE: LineQuantity = LineQuantity(1);

    /// Clamps any requested quantity into range, reporting the adjustment if one was made.
    pub fn clamp(requested: i64) -> (Self, Option<QuantityAdjustment>) {
        if requested < i64::from(Self::MIN) {
            (Self(Self::MIN), Some(QuantityAdjustment::RaisedToMinimum))
        } else if requested > i64::from(Self::MAX) {
            (Self(Self::MAX), Some(QuantityAdjustment::CappedAtMaximum))
        } else {
            (Self(requested as u8), None)
        }
    }

    /// Adds to this quantity, capping at the maximum.
    pub fn merge(&self, extra: LineQuantity) -> (Self, Option<QuantityAdjustment>) {
        Self::clamp(i64::from(self.0) + i64::from(extra.0))
    }

    pub fn value(&self) -> u8 { self.0 }
}

/// Remaining stock of a store item.
///
/// Persisted as an integer column where `-1` means unlimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stock { Unlimited, Remaining(u32) }

impl Stock {
    pub const UNLIMITED_SENTINEL: i32 = -1;

    pub fn from_column(value: i32) -> Self {
        if value < 0 { Stock::Unlimited } else { Stock::Remaining(value as u32) }
    }

    pub fn to_column(&self) -> i32 {
        match self {
            Stock::Unlimited => Self::UNLIMITED_SENTINEL,
            Stock::Remaining(n) => i32::try_from(*n).unwrap_or(i32::MAX),
        }
    }

    /// Stock left after selling `qty` units, never below zero.
    pub fn after_sale(&self, qty: u32) -> Stock {
        match self {
            Stock::Unlimited => Stock::Unlimited,
            Stock::Remaining(n) => Stock::Remaining(n.saturating_sub(qty)),
        }
    }

    pub fn is_sold_out(&self) -> bool { matches!(self, Stock::Remaining(0)) }
}

/// In-game player name value object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MinecraftUsername(String);

impl MinecraftUsername {
    pub fn new(value: impl Into<String>) -> Result<Self, UsernameError> {
        let value = value.into().trim().to_string();
        if value.len() < 3 { return Err(UsernameError::TooShort); }
        if value.len() > 16 { return Err(UsernameError::TooLong); }
        if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') { return Err(UsernameError::InvalidCharacter); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for MinecraftUsername {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl TryFrom<String> for MinecraftUsername {
    type Error = UsernameError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<MinecraftUsername> for String {
    fn from(value: MinecraftUsername) -> Self { value.0 }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum UsernameError { TooShort, TooLong, InvalidCharacter }
impl std::error::Error for UsernameError {}
impl fmt::Display for UsernameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "Username must be at least 3 characters"),
            Self::TooLong => write!(f, "Username must be at most 16 characters"),
            Self::InvalidCharacter => write!(f, "Username may only contain letters, digits and underscores"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_rounds_half_away_from_zero() {
        assert_eq!(Money::new(dec!(2.345)).amount(), dec!(2.35));
        assert_eq!(Money::new(dec!(2.344)).amount(), dec!(2.34));
    }

    #[test]
    fn test_percent_off() {
        let price = Money::new(dec!(20.00));
        assert_eq!(price.percent_off(DiscountPercent::new(15)).amount(), dec!(17.00));
        assert_eq!(Money::new(dec!(4.99)).percent_off(DiscountPercent::new(5)).amount(), dec!(4.74));
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(Money::new(dec!(5.00)).minor_units(), Some(500));
        assert_eq!(Money::new(dec!(12.34)).minor_units(), Some(1234));
    }

    #[test]
    fn test_saturating_sub_floors_at_zero() {
        let a = Money::new(dec!(10));
        let b = Money::new(dec!(30));
        assert!(a.saturating_sub(&b).is_zero());
    }

    #[test]
    fn test_line_quantity_clamp() {
        assert_eq!(LineQuantity::clamp(0), (LineQuantity(1), Some(QuantityAdjustment::RaisedToMinimum)));
        assert_eq!(LineQuantity::clamp(150), (LineQuantity(99), Some(QuantityAdjustment::CappedAtMaximum)));
        assert_eq!(LineQuantity::clamp(7), (LineQuantity(7), None));
        let (merged, note) = LineQuantity(95).merge(LineQuantity(10));
        assert_eq!(merged.value(), 99);
        assert_eq!(note, Some(QuantityAdjustment::CappedAtMaximum));
    }

    #[test]
    fn test_stock_sentinel() {
        assert_eq!(Stock::from_column(-1), Stock::Unlimited);
        assert_eq!(Stock::Unlimited.after_sale(5), Stock::Unlimited);
        assert_eq!(Stock::Remaining(3).after_sale(5), Stock::Remaining(0));
        assert_eq!(Stock::Remaining(3).to_column(), 3);
    }

    #[test]
    fn test_username() {
        assert!(MinecraftUsername::new("Notch").is_ok());
        assert_eq!(MinecraftUsername::new("ab"), Err(UsernameError::TooShort));
        assert_eq!(MinecraftUsername::new("bad name"), Err(UsernameError::InvalidCharacter));
    }
}
