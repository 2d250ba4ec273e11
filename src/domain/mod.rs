//! Domain module
//!
//! Core ledger types and business rules, independent of storage and HTTP.

pub mod account;
pub mod amount;
pub mod context;
pub mod error;
pub mod pagination;
pub mod transaction;

pub use account::{Account, AccountId};
pub use amount::{Amount, AmountError};
pub use context::OperationContext;
pub use error::DomainError;
pub use pagination::{PageData, PageInfo, Pagination};
pub use transaction::{NewTransaction, TransactionRecord, TransactionType, TransferRecords};
