//! Postgres ledger store
//!
//! A unit of work is a sqlx transaction. Row locks come from
//! `SELECT ... FOR UPDATE` and are bounded by `lock_timeout`.

mod accounts;
mod transactions;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

use crate::domain::{Account, AccountId, Amount, NewTransaction, TransactionRecord};

use super::{AccountStore, LedgerStore, StoreError, TransactionLogStore, UnitOfWork};

pub use accounts::AccountRepository;
pub use transactions::TransactionRepository;

/// Postgres-backed ledger store
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    /// Create a new store. `lock_timeout` bounds every row-lock wait.
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    type Unit = PgUnit;

    async fn begin(&self) -> Result<PgUnit, StoreError> {
        let mut tx = self.pool.begin().await?;

        // SET does not take bind parameters
        let sql = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&sql).execute(&mut *tx).await?;

        Ok(PgUnit { tx })
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(AccountRepository::find(&mut conn, id).await?)
    }

    async fn count_for_account(&self, id: AccountId) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(TransactionRepository::count_for_account(&mut conn, id).await?)
    }

    async fn page_for_account(
        &self,
        id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(TransactionRepository::page_for_account(&mut conn, id, limit, offset).await?)
    }
}

/// One Postgres transaction spanning both stores
pub struct PgUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AccountStore for PgUnit {
    async fn lock_and_get(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(AccountRepository::lock_and_get(&mut self.tx, id).await?)
    }

    async fn credit(&mut self, id: AccountId, amount: &Amount) -> Result<Account, StoreError> {
        AccountRepository::credit(&mut self.tx, id, amount).await
    }

    async fn debit(&mut self, id: AccountId, amount: &Amount) -> Result<Account, StoreError> {
        AccountRepository::debit(&mut self.tx, id, amount).await
    }

    async fn list_nonzero_locked(&mut self) -> Result<Vec<Account>, StoreError> {
        Ok(AccountRepository::list_nonzero_locked(&mut self.tx).await?)
    }

    async fn zero_all(&mut self) -> Result<Vec<Account>, StoreError> {
        Ok(AccountRepository::zero_all(&mut self.tx).await?)
    }

    async fn open(&mut self, id: AccountId) -> Result<Account, StoreError> {
        AccountRepository::open(&mut self.tx, id).await
    }

    async fn close(&mut self, id: AccountId) -> Result<(), StoreError> {
        AccountRepository::close(&mut self.tx, id).await
    }
}

#[async_trait]
impl TransactionLogStore for PgUnit {
    async fn append(&mut self, record: &NewTransaction) -> Result<TransactionRecord, StoreError> {
        Ok(TransactionRepository::append(&mut self.tx, record).await?)
    }

    async fn append_many(
        &mut self,
        records: &[NewTransaction],
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(TransactionRepository::append_many(&mut self.tx, records).await?)
    }

    async fn delete_all_for_account(&mut self, id: AccountId) -> Result<u64, StoreError> {
        Ok(TransactionRepository::delete_all_for_account(&mut self.tx, id).await?)
    }
}

#[async_trait]
impl UnitOfWork for PgUnit {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
