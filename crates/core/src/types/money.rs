//! Minor-unit money representation.
//!
//! All cart arithmetic happens in the currency's smallest unit (cents for
//! USD) as signed integers, which keeps totals exact across additions and
//! clamps. `rust_decimal` is only used at the display boundary and for
//! percentage discount math, where fractional intermediate values appear.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// A monetary amount in minor units with its currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the smallest currency unit (e.g., cents for USD).
    pub amount: i64,
    /// ISO 4217 currency code.
    pub currency_code: CurrencyCode,
}

impl Money {
    /// Create a new amount in minor units.
    #[must_use]
    pub const fn new(amount: i64, currency_code: CurrencyCode) -> Self {
        Self {
            amount,
            currency_code,
        }
    }

    /// Format for display (e.g., `$19.99`).
    #[must_use]
    pub fn display(&self) -> String {
        let major = Decimal::new(self.amount, u32::from(self.currency_code.minor_digits()));
        format!("{}{major:.2}", self.currency_code.symbol())
    }
}

/// Percentage of an amount, rounded half-up to the nearest minor unit.
///
/// Used for percentage promotions: `percentage_of(10_000, 10) == 1_000`.
#[must_use]
pub fn percentage_of(amount: i64, percentage: Decimal) -> i64 {
    (Decimal::from(amount) * percentage / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

/// ISO 4217 currency codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
}

impl CurrencyCode {
    /// Currency symbol for display.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::USD | Self::CAD | Self::AUD => "$",
            Self::EUR => "\u{20ac}",
            Self::GBP => "\u{a3}",
        }
    }

    /// Number of minor-unit digits (all supported currencies use 2).
    #[must_use]
    pub const fn minor_digits(self) -> u8 {
        2
    }
}

impl std::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
            Self::CAD => "CAD",
            Self::AUD => "AUD",
        };
        write!(f, "{code}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_usd() {
        let price = Money::new(1999, CurrencyCode::USD);
        assert_eq!(price.display(), "$19.99");
    }

    #[test]
    fn test_display_whole_amount() {
        let price = Money::new(5000, CurrencyCode::USD);
        assert_eq!(price.display(), "$50.00");
    }

    #[test]
    fn test_percentage_of_exact() {
        assert_eq!(percentage_of(10_000, Decimal::from(10)), 1_000);
    }

    #[test]
    fn test_percentage_of_rounds_half_up() {
        // 15% of $0.55 = 8.25 cents -> 8; 15% of $0.50 = 7.5 cents -> 8
        assert_eq!(percentage_of(55, Decimal::from(15)), 8);
        assert_eq!(percentage_of(50, Decimal::from(15)), 8);
    }

    #[test]
    fn test_percentage_of_zero() {
        assert_eq!(percentage_of(0, Decimal::from(25)), 0);
    }
}
