use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ISO-4217 currencies the ledger knows how to account for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    Jpy,
    Chf,
}

impl Currency {
    pub const ALL: [Currency; 5] = [
        Currency::Usd,
        Currency::Eur,
        Currency::Gbp,
        Currency::Jpy,
        Currency::Chf,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Jpy => "JPY",
            Currency::Chf => "CHF",
        }
    }

    /// Number of decimal places between the major and the minor unit.
    pub fn exponent(&self) -> u32 {
        match self {
            Currency::Jpy => 0,
            _ => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        let code = s.trim().to_ascii_uppercase();
        Currency::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .ok_or_else(|| PaymentError::InvalidCurrency(s.trim().to_string()))
    }
}

/// Represents a positive monetary amount for transactions, in minor units.
///
/// Ledger arithmetic is done on integers only; `rust_decimal` is used at the
/// edges to convert from and to major-unit text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(i64);

impl Amount {
    pub fn new(minor_units: i64) -> Result<Self> {
        if minor_units > 0 {
            Ok(Self(minor_units))
        } else {
            Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    /// Converts a major-unit decimal (`4.25` dollars) into minor units.
    ///
    /// Rejects values with more fractional digits than the currency carries.
    pub fn from_major(value: Decimal, currency: Currency) -> Result<Self> {
        let normalized = value.normalize();
        if normalized.scale() > currency.exponent() {
            return Err(PaymentError::ValidationError(format!(
                "{} allows at most {} decimal places, got {}",
                currency,
                currency.exponent(),
                value
            )));
        }
        let factor = Decimal::from(10i64.pow(currency.exponent()));
        let minor = (normalized * factor).to_i64().ok_or_else(|| {
            PaymentError::ValidationError(format!("Amount {} is out of range", value))
        })?;
        Self::new(minor)
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = PaymentError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Renders a signed minor-unit value as major units (`-1250` USD -> `-12.50`).
pub fn to_major(minor_units: i64, currency: Currency) -> Decimal {
    Decimal::new(minor_units, currency.exponent())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(1).is_ok());
        assert!(matches!(
            Amount::new(0),
            Err(PaymentError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(-1),
            Err(PaymentError::ValidationError(_))
        ));
    }

    #[test]
    fn test_currency_parsing() {
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::Usd);
        assert_eq!(" EUR ".parse::<Currency>().unwrap(), Currency::Eur);
        assert!(matches!(
            "XYZ".parse::<Currency>(),
            Err(PaymentError::InvalidCurrency(code)) if code == "XYZ"
        ));
    }

    #[test]
    fn test_major_unit_conversion() {
        assert_eq!(
            Amount::from_major(dec!(4.25), Currency::Usd).unwrap().minor_units(),
            425
        );
        assert_eq!(
            Amount::from_major(dec!(10), Currency::Jpy).unwrap().minor_units(),
            10
        );
        // trailing zeros do not count as extra precision
        assert_eq!(
            Amount::from_major(dec!(1.500), Currency::Eur).unwrap().minor_units(),
            150
        );
        assert!(Amount::from_major(dec!(1.005), Currency::Usd).is_err());
        assert!(Amount::from_major(dec!(0.5), Currency::Jpy).is_err());
        assert!(Amount::from_major(dec!(-3), Currency::Usd).is_err());
        assert!(Amount::from_major(Decimal::MAX, Currency::Usd).is_err());
    }

    #[test]
    fn test_to_major_rendering() {
        assert_eq!(to_major(60000, Currency::Usd).to_string(), "600.00");
        assert_eq!(to_major(-1250, Currency::Gbp), dec!(-12.50));
        assert_eq!(to_major(700, Currency::Jpy).to_string(), "700");
    }
}
