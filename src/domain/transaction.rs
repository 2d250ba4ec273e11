//! Transaction records
//!
//! The immutable half of the ledger. Direction is carried by the type,
//! the amount is always positive.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{AccountId, Amount};

/// Direction of a balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "transaction_type", rename_all = "lowercase")]
pub enum TransactionType {
    Adding,
    Subtraction,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Adding => "adding",
            TransactionType::Subtraction => "subtraction",
        }
    }

    /// Sign applied to the amount when reconciling a balance
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            TransactionType::Adding => amount,
            TransactionType::Subtraction => -amount,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record waiting to be appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub kind: TransactionType,
    pub user_id: AccountId,
    pub amount: Amount,
}

impl NewTransaction {
    pub fn adding(user_id: AccountId, amount: Amount) -> Self {
        Self {
            kind: TransactionType::Adding,
            user_id,
            amount,
        }
    }

    pub fn subtraction(user_id: AccountId, amount: Amount) -> Self {
        Self {
            kind: TransactionType::Subtraction,
            user_id,
            amount,
        }
    }
}

/// A stored transaction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionRecord {
    pub id: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: TransactionType,
    pub amount: Decimal,
    pub user_id: AccountId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    /// Signed contribution of this record to its account balance
    pub fn signed_amount(&self) -> Decimal {
        self.kind.signed(self.amount)
    }
}

/// Both halves of a transfer, written in the same unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecords {
    pub sender_transaction: TransactionRecord,
    pub recipient_transaction: TransactionRecord,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_signed_amounts() {
        assert_eq!(TransactionType::Adding.signed(dec!(10)), dec!(10));
        assert_eq!(TransactionType::Subtraction.signed(dec!(10)), dec!(-10));
    }

    #[test]
    fn test_record_serializes_type_field() {
        let now = Utc::now();
        let record = TransactionRecord {
            id: 3,
            kind: TransactionType::Subtraction,
            amount: dec!(40.00),
            user_id: 9,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "subtraction");
        assert_eq!(json["amount"], "40.00");
        assert!(json.get("deleted_at").is_none());
    }

    #[test]
    fn test_new_transaction_constructors() {
        let amount = Amount::from_integer(25).unwrap();
        let tx = NewTransaction::adding(1, amount);
        assert_eq!(tx.kind, TransactionType::Adding);
        assert_eq!(NewTransaction::subtraction(1, amount).kind, TransactionType::Subtraction);
    }
}
