//! Domain Error Types
//!
//! Business rule violations surfaced to callers unchanged.

use rust_decimal::Decimal;
use thiserror::Error;

use super::{AccountId, AmountError};

/// Ledger business errors
///
/// These never hide an infrastructure failure; those are classified as
/// internal errors by the layers above.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// No live account with this id
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// A live account with this id already exists
    #[error("Account already exists: {0}")]
    AccountExists(AccountId),

    /// Amount is zero or negative
    #[error("Amount must be positive (got {0})")]
    NegativeAmount(Decimal),

    /// Amount is positive but otherwise unusable (scale, range, minimum)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Balance lower than the requested debit
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    /// Transfer with identical sender and recipient
    #[error("Cannot transfer to the same account")]
    SameAccount,
}

impl DomainError {
    pub fn insufficient_funds(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientFunds {
            required,
            available,
        }
    }

    /// Stable machine-readable code used in API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccountNotFound(_) => "account_not_found",
            Self::AccountExists(_) => "account_exists",
            Self::NegativeAmount(_) => "negative_amount",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::SameAccount => "same_account",
        }
    }
}

impl From<AmountError> for DomainError {
    fn from(err: AmountError) -> Self {
        match err {
            AmountError::NotPositive(value) => Self::NegativeAmount(value),
            other => Self::InvalidAmount(other.to_string()),
        }
    }
}
