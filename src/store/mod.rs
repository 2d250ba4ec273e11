//! Ledger storage
//!
//! The account store and the transaction log store are both expressed as
//! operations on a unit of work: a database transaction that the caller
//! opens, threads through every mutation, and finally commits or rolls
//! back. Stores never decide transaction boundaries themselves.

mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::domain::{Account, AccountId, Amount, NewTransaction, TransactionRecord};

pub use error::StoreError;
pub use memory::{MemoryStore, MemoryUnit};
pub use postgres::{PgStore, PgUnit};

/// Account store operations, valid only inside a unit of work
#[async_trait]
pub trait AccountStore: Send {
    /// Read an account holding an exclusive row lock until the unit ends.
    /// Locking a row the unit already holds returns immediately.
    async fn lock_and_get(&mut self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Increase the balance. Fails with `AccountNotFound`.
    async fn credit(&mut self, id: AccountId, amount: &Amount) -> Result<Account, StoreError>;

    /// Decrease the balance. Fails with `AccountNotFound` or `InsufficientFunds`.
    async fn debit(&mut self, id: AccountId, amount: &Amount) -> Result<Account, StoreError>;

    /// Every live account with a non-zero balance, locked, ascending by id
    async fn list_nonzero_locked(&mut self) -> Result<Vec<Account>, StoreError>;

    /// Zero the non-zero balances locked by a preceding `list_nonzero_locked`
    /// (locking them first when nothing is held), returning the accounts with
    /// the balance they held right before zeroing, ascending by id.
    ///
    /// The Postgres store zeroes every non-zero row in one statement, which
    /// may also lock rows that turned non-zero since; a lock inversion there
    /// is broken by the database deadlock detector.
    async fn zero_all(&mut self) -> Result<Vec<Account>, StoreError>;

    /// Create a zero-balance account. Fails with `AccountExists`.
    async fn open(&mut self, id: AccountId) -> Result<Account, StoreError>;

    /// Soft-remove an account. Fails with `AccountNotFound`.
    async fn close(&mut self, id: AccountId) -> Result<(), StoreError>;
}

/// Transaction log writes, valid only inside a unit of work
#[async_trait]
pub trait TransactionLogStore: Send {
    async fn append(&mut self, record: &NewTransaction) -> Result<TransactionRecord, StoreError>;

    /// Bulk insert; output order matches input order
    async fn append_many(
        &mut self,
        records: &[NewTransaction],
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Soft-delete every record of an account, returning how many were deleted
    async fn delete_all_for_account(&mut self, id: AccountId) -> Result<u64, StoreError>;
}

/// One atomic unit spanning both stores
///
/// Dropping a unit without committing rolls it back.
#[async_trait]
pub trait UnitOfWork: AccountStore + TransactionLogStore + Send + 'static {
    async fn commit(self) -> Result<(), StoreError>;
    async fn rollback(self) -> Result<(), StoreError>;
}

/// Entry point to a ledger backend
///
/// Read-only queries run outside any unit and take no locks.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Unit: UnitOfWork;

    async fn begin(&self) -> Result<Self::Unit, StoreError>;

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Number of non-deleted records of an account
    async fn count_for_account(&self, id: AccountId) -> Result<i64, StoreError>;

    /// Non-deleted records of an account, newest first (`id DESC`)
    async fn page_for_account(
        &self,
        id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, StoreError>;
}
