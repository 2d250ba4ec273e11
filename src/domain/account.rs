//! Account balance aggregate
//!
//! The mutable half of the ledger. An account never references its
//! transaction records; its balance is the derived aggregate of them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Amount, DomainError};

/// Account identity, supplied by the user subsystem
pub type AccountId = i64;

/// Account row as seen inside a unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: AccountId,
    /// Never negative, 2 fractional digits
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// New account with a zero balance
    pub fn open(id: AccountId) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance: Decimal::new(0, 2),
            created_at: now,
            updated_at: now,
        }
    }

    /// Balance after debiting `amount`, or `InsufficientFunds`.
    pub fn debited(&self, amount: &Amount) -> Result<Decimal, DomainError> {
        if self.balance < amount.value() {
            return Err(DomainError::insufficient_funds(amount.value(), self.balance));
        }
        Ok(self.balance - amount.value())
    }

    /// Balance after crediting `amount`
    pub fn credited(&self, amount: &Amount) -> Decimal {
        self.balance + amount.value()
    }

    pub fn has_balance(&self) -> bool {
        !self.balance.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn account_with(balance: Decimal) -> Account {
        Account {
            balance,
            ..Account::open(7)
        }
    }

    #[test]
    fn test_open_account_is_empty() {
        let account = Account::open(1);
        assert_eq!(account.balance, Decimal::ZERO);
        assert!(!account.has_balance());
    }

    #[test]
    fn test_debit_exact_balance() {
        let account = account_with(dec!(100.00));
        let amount = Amount::from_integer(100).unwrap();
        assert_eq!(account.debited(&amount).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_debit_insufficient() {
        let account = account_with(dec!(30.00));
        let amount = Amount::from_integer(50).unwrap();
        assert_eq!(
            account.debited(&amount),
            Err(DomainError::InsufficientFunds {
                required: dec!(50.00),
                available: dec!(30.00),
            })
        );
    }

    #[test]
    fn test_credit() {
        let account = account_with(dec!(0.50));
        let amount = Amount::new(dec!(10.25)).unwrap();
        assert_eq!(account.credited(&amount), dec!(10.75));
    }
}
