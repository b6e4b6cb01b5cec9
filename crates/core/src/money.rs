//! Currency codes and the `Money` value object.

use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// ISO-4217 currency supported by wallets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Usd,
    Eur,
    Gbp,
    Inr,
    Aed,
    Jpy,
}

impl Currency {
    pub const ALL: [Currency; 6] = [
        Currency::Usd,
        Currency::Eur,
        Currency::Gbp,
        Currency::Inr,
        Currency::Aed,
        Currency::Jpy,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Inr => "INR",
            Currency::Aed => "AED",
            Currency::Jpy => "JPY",
        }
    }

    /// Number of decimal places an amount in this currency may carry.
    pub fn minor_units(self) -> u32 {
        match self {
            Currency::Jpy => 0,
            _ => 2,
        }
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Currency::ALL
            .into_iter()
            .find(|c| c.code() == upper)
            .ok_or_else(|| DomainError::validation(format!("unsupported currency '{s}'")))
    }
}

/// An amount in a specific currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl ValueObject for Money {}

impl Money {
    /// Largest amount a single operation may move (one trillion).
    pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

    /// Ceiling for a wallet's balance and lifetime totals (ten trillion).
    ///
    /// Fits the ledger's `NUMERIC(20,4)` columns and keeps two-decimal values
    /// below 2^53 minor units, so they stay exact as JSON numbers.
    pub const MAX_BALANCE: Decimal = Decimal::from_parts(0x4E72_A000, 0x918, 0, false, 0);

    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    /// Whether the amount can be represented in the currency's minor units.
    pub fn fits_precision(&self) -> bool {
        self.amount.normalize().scale() <= self.currency.minor_units()
    }

    /// Validate a positive, representable amount.
    pub fn ensure_positive(&self) -> Result<(), DomainError> {
        if self.amount <= Decimal::ZERO {
            return Err(DomainError::validation("amount must be positive"));
        }
        if self.amount > Self::MAX_AMOUNT {
            return Err(DomainError::validation(format!(
                "amount may not exceed {}",
                Self::MAX_AMOUNT
            )));
        }
        if !self.fits_precision() {
            return Err(DomainError::validation(format!(
                "amount has more than {} decimal places for {}",
                self.currency.minor_units(),
                self.currency
            )));
        }
        Ok(())
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn currency_codes_parse_case_insensitively() {
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::Usd);
        assert_eq!(" JPY ".parse::<Currency>().unwrap(), Currency::Jpy);
        assert!("XYZ".parse::<Currency>().is_err());
    }

    #[test]
    fn currency_serializes_as_three_letter_code() {
        assert_eq!(serde_json::to_string(&Currency::Gbp).unwrap(), "\"GBP\"");
        let parsed: Currency = serde_json::from_str("\"EUR\"").unwrap();
        assert_eq!(parsed, Currency::Eur);
    }

    #[test]
    fn precision_follows_minor_units() {
        assert!(Money::new(dec!(10.25), Currency::Usd).fits_precision());
        assert!(Money::new(dec!(10.250), Currency::Usd).fits_precision());
        assert!(!Money::new(dec!(10.255), Currency::Usd).fits_precision());
        assert!(!Money::new(dec!(10.5), Currency::Jpy).fits_precision());
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        assert!(Money::new(dec!(0), Currency::Usd).ensure_positive().is_err());
        assert!(Money::new(dec!(-1), Currency::Usd).ensure_positive().is_err());
        assert!(Money::new(dec!(0.01), Currency::Usd).ensure_positive().is_ok());
    }

    #[test]
    fn amount_ceiling_is_enforced() {
        assert_eq!(Money::MAX_AMOUNT, dec!(1000000000000));
        assert_eq!(Money::MAX_BALANCE, dec!(10000000000000));
        assert!(Money::new(Money::MAX_AMOUNT, Currency::Usd).ensure_positive().is_ok());
        assert!(Money::new(dec!(1000000000000.01), Currency::Usd).ensure_positive().is_err());
        assert!(
            Money::new(dec!(79000000000000000000000000000), Currency::Usd)
                .ensure_positive()
                .is_err()
        );
    }
}
