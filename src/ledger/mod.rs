//! Ledger Coordinator
//!
//! Runs every balance mutation and its transaction log append as one
//! atomic unit of work. A unit either commits both halves or neither.
//!
//! Each unit runs on its own task under a timeout: a caller that stops
//! waiting does not cancel it, and a unit that outlives the timeout is
//! dropped (rolled back) and reported as an internal error.

mod error;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::domain::{
    Account, AccountId, Amount, DomainError, NewTransaction, PageData, Pagination,
    TransactionRecord, TransferRecords,
};
use crate::store::{AccountStore, LedgerStore, StoreError, TransactionLogStore, UnitOfWork};

pub use error::LedgerError;

/// Default upper bound on a single unit of work
pub const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Upper bound on one unit, lock waits included
    pub unit_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
        }
    }
}

/// Outcome of a bulk reset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetReport {
    pub accounts_reset: usize,
    pub total_amount: Decimal,
}

/// One page of an account's transaction log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionPage {
    pub transactions: Vec<TransactionRecord>,
    pub pagination: PageData,
}

/// Outcome of closing an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedAccount {
    pub account_id: AccountId,
    pub transactions_deleted: u64,
}

/// Balance ledger over a store backend
pub struct Ledger<S> {
    store: Arc<S>,
    config: LedgerConfig,
}

impl<S> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: Arc<S>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Credit an account and log an `adding` record
    pub async fn add(
        &self,
        account_id: AccountId,
        amount: Amount,
    ) -> Result<TransactionRecord, LedgerError> {
        tracing::debug!(account_id, %amount, "add: starting unit");
        let store = Arc::clone(&self.store);

        let record = self
            .spawn_unit("add", async move {
                let mut unit = store.begin().await?;
                let result: Result<_, StoreError> = async {
                    let account = unit.credit(account_id, &amount).await?;
                    tracing::debug!(account_id, balance = %account.balance, "add: balance credited");
                    unit.append(&NewTransaction::adding(account_id, amount)).await
                }
                .await;
                finish(unit, result).await
            })
            .await
            .map_err(|e| log_rejection("add", e))?;

        tracing::info!(account_id, %amount, record_id = record.id, "add committed");
        Ok(record)
    }

    /// Debit an account and log a `subtraction` record
    pub async fn subtract(
        &self,
        account_id: AccountId,
        amount: Amount,
    ) -> Result<TransactionRecord, LedgerError> {
        tracing::debug!(account_id, %amount, "subtract: starting unit");
        let store = Arc::clone(&self.store);

        let record = self
            .spawn_unit("subtract", async move {
                let mut unit = store.begin().await?;
                let result: Result<_, StoreError> = async {
                    let account = unit.debit(account_id, &amount).await?;
                    tracing::debug!(account_id, balance = %account.balance, "subtract: balance debited");
                    unit.append(&NewTransaction::subtraction(account_id, amount)).await
                }
                .await;
                finish(unit, result).await
            })
            .await
            .map_err(|e| log_rejection("subtract", e))?;

        tracing::info!(account_id, %amount, record_id = record.id, "subtract committed");
        Ok(record)
    }

    /// Move `amount` from `sender` to `recipient`.
    ///
    /// Both rows are locked in ascending id order before either is touched,
    /// so two opposite transfers cannot deadlock.
    pub async fn transfer(
        &self,
        sender: AccountId,
        recipient: AccountId,
        amount: Amount,
    ) -> Result<TransferRecords, LedgerError> {
        if sender == recipient {
            tracing::warn!(account_id = sender, "transfer rejected: same account");
            return Err(DomainError::SameAccount.into());
        }

        tracing::debug!(sender, recipient, %amount, "transfer: starting unit");
        let store = Arc::clone(&self.store);

        let records = self
            .spawn_unit("transfer", async move {
                let mut unit = store.begin().await?;
                let result: Result<_, StoreError> = async {
                    let (first, second) = if sender < recipient {
                        (sender, recipient)
                    } else {
                        (recipient, sender)
                    };
                    unit.lock_and_get(first).await?;
                    unit.lock_and_get(second).await?;

                    unit.debit(sender, &amount).await?;
                    unit.credit(recipient, &amount).await?;
                    tracing::debug!(sender, recipient, "transfer: balances moved");

                    let mut stored = unit
                        .append_many(&[
                            NewTransaction::subtraction(sender, amount),
                            NewTransaction::adding(recipient, amount),
                        ])
                        .await?
                        .into_iter();

                    match (stored.next(), stored.next()) {
                        (Some(sender_transaction), Some(recipient_transaction)) => {
                            Ok(TransferRecords {
                                sender_transaction,
                                recipient_transaction,
                            })
                        }
                        _ => Err(StoreError::Constraint(
                            "transfer insert returned fewer than two records".to_string(),
                        )),
                    }
                }
                .await;
                finish(unit, result).await
            })
            .await
            .map_err(|e| log_rejection("transfer", e))?;

        tracing::info!(
            sender,
            recipient,
            %amount,
            sender_record_id = records.sender_transaction.id,
            recipient_record_id = records.recipient_transaction.id,
            "transfer committed"
        );
        Ok(records)
    }

    /// Zero every non-zero balance, logging one subtraction per account.
    ///
    /// Running it again with nothing left to zero appends nothing.
    pub async fn reset_all_balances(&self) -> Result<ResetReport, LedgerError> {
        tracing::debug!("reset: starting unit");
        let store = Arc::clone(&self.store);

        let report = self
            .spawn_unit("reset_all_balances", async move {
                let mut unit = store.begin().await?;
                let result: Result<_, StoreError> = async {
                    let locked = unit.list_nonzero_locked().await?;
                    tracing::debug!(accounts = locked.len(), "reset: accounts locked");

                    let zeroed = unit.zero_all().await?;
                    if zeroed.is_empty() {
                        return Ok(ResetReport {
                            accounts_reset: 0,
                            total_amount: Decimal::ZERO,
                        });
                    }

                    let records = zeroed
                        .iter()
                        .map(|account| -> Result<NewTransaction, StoreError> {
                            let amount =
                                Amount::try_from(account.balance).map_err(DomainError::from)?;
                            Ok(NewTransaction::subtraction(account.id, amount))
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    unit.append_many(&records).await?;

                    Ok(ResetReport {
                        accounts_reset: zeroed.len(),
                        total_amount: zeroed.iter().map(|account| account.balance).sum(),
                    })
                }
                .await;
                finish(unit, result).await
            })
            .await
            .map_err(|e| log_rejection("reset_all_balances", e))?;

        tracing::info!(
            accounts_reset = report.accounts_reset,
            total_amount = %report.total_amount,
            "reset committed"
        );
        Ok(report)
    }

    /// Newest-first page of an account's log. Takes no locks.
    pub async fn list_transactions(
        &self,
        account_id: AccountId,
        limit: i64,
        page: i64,
    ) -> Result<TransactionPage, LedgerError> {
        let total = self.store.count_for_account(account_id).await?;
        let pagination = Pagination::new(limit, page, total);

        let transactions = self
            .store
            .page_for_account(account_id, pagination.limit(), pagination.offset())
            .await?;

        tracing::debug!(
            account_id,
            total,
            returned = transactions.len(),
            "transactions listed"
        );

        Ok(TransactionPage {
            transactions,
            pagination: pagination.page_data(),
        })
    }

    /// Current account state. Takes no locks.
    pub async fn balance(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.store
            .find_account(account_id)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(account_id).into())
    }

    /// Create a zero-balance account for a new user
    pub async fn open_account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        let store = Arc::clone(&self.store);

        let account = self
            .spawn_unit("open_account", async move {
                let mut unit = store.begin().await?;
                let result = unit.open(account_id).await;
                finish(unit, result).await
            })
            .await
            .map_err(|e| log_rejection("open_account", e))?;

        tracing::info!(account_id, "account opened");
        Ok(account)
    }

    /// Remove an account and soft-delete its transaction log in one unit
    pub async fn close_account(&self, account_id: AccountId) -> Result<ClosedAccount, LedgerError> {
        let store = Arc::clone(&self.store);

        let closed = self
            .spawn_unit("close_account", async move {
                let mut unit = store.begin().await?;
                let result: Result<_, StoreError> = async {
                    unit.lock_and_get(account_id).await?;
                    unit.close(account_id).await?;
                    let transactions_deleted = unit.delete_all_for_account(account_id).await?;
                    Ok(ClosedAccount {
                        account_id,
                        transactions_deleted,
                    })
                }
                .await;
                finish(unit, result).await
            })
            .await
            .map_err(|e| log_rejection("close_account", e))?;

        tracing::info!(
            account_id,
            transactions_deleted = closed.transactions_deleted,
            "account closed"
        );
        Ok(closed)
    }

    /// Run one unit on its own task, bounded by the unit timeout
    async fn spawn_unit<T, F>(&self, operation: &'static str, unit: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let timeout = self.config.unit_timeout;
        // The unit task keeps the caller's span, and with it the correlation id
        let handle = tokio::spawn(tokio::time::timeout(timeout, unit).in_current_span());

        match handle.await {
            Ok(Ok(result)) => result.map_err(LedgerError::from),
            Ok(Err(_elapsed)) => {
                tracing::error!(
                    operation,
                    timeout_ms = timeout.as_millis() as u64,
                    "unit timed out and was rolled back"
                );
                Err(LedgerError::Internal(format!(
                    "{operation} timed out after {}ms",
                    timeout.as_millis()
                )))
            }
            Err(e) => {
                tracing::error!(operation, error = %e, "unit task failed");
                Err(LedgerError::Internal(format!("{operation} task failed: {e}")))
            }
        }
    }
}

/// Commit on success, roll back on failure
async fn finish<U, T>(unit: U, result: Result<T, StoreError>) -> Result<T, StoreError>
where
    U: UnitOfWork,
{
    match result {
        Ok(value) => {
            unit.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = unit.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

fn log_rejection(operation: &'static str, err: LedgerError) -> LedgerError {
    if let Some(domain) = err.as_domain() {
        tracing::warn!(operation, error_code = domain.code(), error = %domain, "rejected");
    }
    err
}
