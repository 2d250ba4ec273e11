//! Amount type
//!
//! Domain primitive for monetary amounts moved by the ledger.
//! All amounts are validated at construction time, ensuring invalid values
//! cannot reach the stores.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fractional digits kept for every amount and balance (`NUMERIC(11, 2)`)
pub const SCALE: u32 = 2;

/// Largest value a `NUMERIC(11, 2)` column can hold
const MAX_AMOUNT: Decimal = Decimal::from_parts(1_215_752_191, 23, 0, false, 2);

/// Amount represents a validated, strictly positive monetary value.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - At most 2 significant decimal places, stored rescaled to exactly 2
/// - Fits a `NUMERIC(11, 2)` column
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use balance_ledger::domain::Amount;
///
/// let amount = Amount::new(Decimal::new(1005, 1)).unwrap();
/// assert_eq!(amount.to_string(), "100.50");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(Decimal);

/// Errors that can occur when creating an Amount
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("Amount has too many decimal places (max {SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Amount exceeds maximum allowed value ({MAX_AMOUNT})")]
    Overflow,

    #[error("Amount is below the minimum of {minimum} (got {got})")]
    BelowMinimum { minimum: Decimal, got: Decimal },

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `AmountError::NotPositive` if value <= 0
    /// - `AmountError::TooManyDecimals` if more than 2 significant decimal places
    /// - `AmountError::Overflow` if the value does not fit `NUMERIC(11, 2)`
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }

        // "10.500" is accepted, "10.505" is not
        let normalized = value.normalize();
        if normalized.scale() > SCALE {
            return Err(AmountError::TooManyDecimals(normalized.scale()));
        }

        if normalized > MAX_AMOUNT {
            return Err(AmountError::Overflow);
        }

        let mut scaled = normalized;
        scaled.rescale(SCALE);
        Ok(Self(scaled))
    }

    /// Create an Amount and require it to be at least `minimum`.
    ///
    /// This is the caller-facing business rule (minimum transactable unit);
    /// the ledger itself only requires positivity.
    pub fn at_least(value: Decimal, minimum: Decimal) -> Result<Self, AmountError> {
        let amount = Self::new(value)?;
        if amount.0 < minimum {
            return Err(AmountError::BelowMinimum {
                minimum,
                got: amount.0,
            });
        }
        Ok(amount)
    }

    /// Create an Amount from an integer (no decimal places).
    pub fn from_integer(value: i64) -> Result<Self, AmountError> {
        Self::new(Decimal::from(value))
    }

    /// Get the underlying Decimal value (always scale 2).
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s.trim())
            .map_err(|e| AmountError::ParseError(e.to_string()))?;
        Amount::new(decimal)
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Amount::from_str(&value)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.to_string()
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_positive() {
        let amount = Amount::new(dec!(100)).unwrap();
        assert_eq!(amount.value(), dec!(100));
        assert_eq!(amount.value().scale(), 2);
    }

    #[test]
    fn test_amount_zero_rejected() {
        let amount = Amount::new(Decimal::ZERO);
        assert!(matches!(amount, Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_amount_negative_rejected() {
        let amount = Amount::new(dec!(-5));
        assert_eq!(amount, Err(AmountError::NotPositive(dec!(-5))));
    }

    #[test]
    fn test_amount_too_many_decimals() {
        let amount = Amount::new(dec!(10.005));
        assert!(matches!(amount, Err(AmountError::TooManyDecimals(3))));
    }

    #[test]
    fn test_amount_trailing_zeros_accepted() {
        let amount = Amount::new(dec!(10.500)).unwrap();
        assert_eq!(amount.to_string(), "10.50");
    }

    #[test]
    fn test_amount_overflow() {
        assert!(Amount::new(dec!(999999999.99)).is_ok());
        assert_eq!(Amount::new(dec!(1000000000)), Err(AmountError::Overflow));
    }

    #[test]
    fn test_amount_at_least() {
        assert!(Amount::at_least(dec!(10), dec!(10)).is_ok());
        assert!(matches!(
            Amount::at_least(dec!(9.99), dec!(10)),
            Err(AmountError::BelowMinimum { .. })
        ));
    }

    #[test]
    fn test_amount_from_str() {
        let amount: Amount = " 42.1 ".parse().unwrap();
        assert_eq!(amount.value(), dec!(42.10));

        let bad: Result<Amount, _> = "forty".parse();
        assert!(matches!(bad, Err(AmountError::ParseError(_))));
    }

    #[test]
    fn test_amount_serde_as_string() {
        let amount = Amount::from_integer(15).unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"15.00\"");

        let back: Amount = serde_json::from_str("\"15\"").unwrap();
        assert_eq!(back, amount);
    }
}
