//! In-memory ledger store
//!
//! Same contract as the Postgres store, used by tests and local runs.
//! Row locks are per-account async mutexes owned by the unit until it
//! ends; writes are staged in the unit and published on commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use crate::domain::{Account, AccountId, Amount, DomainError, NewTransaction, TransactionRecord};

use super::{AccountStore, LedgerStore, StoreError, TransactionLogStore, UnitOfWork};

/// Largest balance a `NUMERIC(11, 2)` column accepts
const MAX_BALANCE: Decimal = Decimal::from_parts(1_215_752_191, 23, 0, false, 2);

#[derive(Debug, Clone)]
struct AccountRow {
    account: Account,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    accounts: BTreeMap<AccountId, AccountRow>,
    records: Vec<TransactionRecord>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    row_locks: Mutex<HashMap<AccountId, Arc<RowLock<()>>>>,
    next_record_id: AtomicI64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_locks(&self) -> MutexGuard<'_, HashMap<AccountId, Arc<RowLock<()>>>> {
        self.row_locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, id: AccountId) -> Arc<RowLock<()>> {
        Arc::clone(self.row_locks().entry(id).or_default())
    }

    /// Forget released locks nobody else holds or waits on
    fn prune_row_locks(&self, ids: impl IntoIterator<Item = AccountId>) {
        let mut locks = self.row_locks();
        for id in ids {
            if locks.get(&id).map_or(false, |lock| Arc::strong_count(lock) == 1) {
                locks.remove(&id);
            }
        }
    }
}

/// In-memory ledger store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every live record of an account in insertion order
    pub fn records_for(&self, id: AccountId) -> Vec<TransactionRecord> {
        self.shared
            .state()
            .records
            .iter()
            .filter(|record| record.user_id == id && record.deleted_at.is_none())
            .cloned()
            .collect()
    }

    /// Number of records ever stored, deleted ones included
    pub fn record_count(&self) -> usize {
        self.shared.state().records.len()
    }

    /// Row locks currently tracked, held or awaited
    pub fn tracked_row_locks(&self) -> usize {
        self.shared.row_locks().len()
    }

    /// Sum of all live balances
    pub fn total_balance(&self) -> Decimal {
        self.shared
            .state()
            .accounts
            .values()
            .filter(|row| row.deleted_at.is_none())
            .map(|row| row.account.balance)
            .sum()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> Result<MemoryUnit, StoreError> {
        Ok(MemoryUnit {
            shared: Arc::clone(&self.shared),
            held: BTreeMap::new(),
            staged: BTreeMap::new(),
            appended: Vec::new(),
            cleared_logs: BTreeSet::new(),
        })
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self
            .shared
            .state()
            .accounts
            .get(&id)
            .filter(|row| row.deleted_at.is_none())
            .map(|row| row.account.clone()))
    }

    async fn count_for_account(&self, id: AccountId) -> Result<i64, StoreError> {
        let count = self.records_for(id).len();
        i64::try_from(count).map_err(|e| StoreError::Constraint(e.to_string()))
    }

    async fn page_for_account(
        &self,
        id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);

        let mut records = self.records_for(id);
        records.reverse();
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }
}

#[derive(Debug, Clone)]
enum Staged {
    Live(Account),
    Removed,
}

/// One in-memory unit of work
pub struct MemoryUnit {
    shared: Arc<Shared>,
    held: BTreeMap<AccountId, OwnedMutexGuard<()>>,
    staged: BTreeMap<AccountId, Staged>,
    appended: Vec<TransactionRecord>,
    cleared_logs: BTreeSet<AccountId>,
}

impl MemoryUnit {
    async fn lock(&mut self, id: AccountId) {
        if self.held.contains_key(&id) {
            return;
        }
        let row = self.shared.row_lock(id);
        let guard = row.lock_owned().await;
        self.held.insert(id, guard);
    }

    /// Account as this unit sees it: staged writes first, then committed state
    fn view(&self, id: AccountId) -> Option<Account> {
        match self.staged.get(&id) {
            Some(Staged::Live(account)) => Some(account.clone()),
            Some(Staged::Removed) => None,
            None => self
                .shared
                .state()
                .accounts
                .get(&id)
                .filter(|row| row.deleted_at.is_none())
                .map(|row| row.account.clone()),
        }
    }

    fn stage_balance(&mut self, mut account: Account, balance: Decimal) -> Result<Account, StoreError> {
        if balance > MAX_BALANCE {
            return Err(StoreError::Constraint(format!(
                "numeric field overflow for account {}",
                account.id
            )));
        }
        account.balance = balance;
        account.updated_at = Utc::now();
        self.staged.insert(account.id, Staged::Live(account.clone()));
        Ok(account)
    }

    /// Ids with a non-zero balance, committed or staged
    fn nonzero_candidates(&self) -> BTreeSet<AccountId> {
        let mut ids: BTreeSet<AccountId> = self
            .shared
            .state()
            .accounts
            .iter()
            .filter(|(_, row)| row.deleted_at.is_none() && row.account.has_balance())
            .map(|(id, _)| *id)
            .collect();
        for (id, staged) in &self.staged {
            if let Staged::Live(account) = staged {
                if account.has_balance() {
                    ids.insert(*id);
                }
            }
        }
        ids
    }
}

#[async_trait]
impl AccountStore for MemoryUnit {
    async fn lock_and_get(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.lock(id).await;
        Ok(self.view(id))
    }

    async fn credit(&mut self, id: AccountId, amount: &Amount) -> Result<Account, StoreError> {
        let account = self
            .lock_and_get(id)
            .await?
            .ok_or(DomainError::AccountNotFound(id))?;
        let balance = account.credited(amount);
        self.stage_balance(account, balance)
    }

    async fn debit(&mut self, id: AccountId, amount: &Amount) -> Result<Account, StoreError> {
        let account = self
            .lock_and_get(id)
            .await?
            .ok_or(DomainError::AccountNotFound(id))?;
        let balance = account.debited(amount)?;
        self.stage_balance(account, balance)
    }

    async fn list_nonzero_locked(&mut self) -> Result<Vec<Account>, StoreError> {
        // Lock in ascending id order, then re-read: balances may have moved
        // while we waited
        let mut accounts = Vec::new();
        for id in self.nonzero_candidates() {
            if let Some(account) = self.lock_and_get(id).await? {
                if account.has_balance() {
                    accounts.push(account);
                }
            }
        }
        Ok(accounts)
    }

    async fn zero_all(&mut self) -> Result<Vec<Account>, StoreError> {
        // Locking more rows now could take a lower id after a higher one,
        // so only rows already held are zeroed
        if self.held.is_empty() {
            self.list_nonzero_locked().await?;
        }
        let held: Vec<AccountId> = self.held.keys().copied().collect();
        let prior: Vec<Account> = held
            .into_iter()
            .filter_map(|id| self.view(id))
            .filter(Account::has_balance)
            .collect();

        for account in &prior {
            self.stage_balance(account.clone(), Decimal::new(0, 2))?;
        }
        Ok(prior)
    }

    async fn open(&mut self, id: AccountId) -> Result<Account, StoreError> {
        self.lock(id).await;
        if self.view(id).is_some() {
            return Err(DomainError::AccountExists(id).into());
        }
        let account = Account::open(id);
        self.staged.insert(id, Staged::Live(account.clone()));
        Ok(account)
    }

    async fn close(&mut self, id: AccountId) -> Result<(), StoreError> {
        self.lock(id).await;
        if self.view(id).is_none() {
            return Err(DomainError::AccountNotFound(id).into());
        }
        self.staged.insert(id, Staged::Removed);
        Ok(())
    }
}

#[async_trait]
impl TransactionLogStore for MemoryUnit {
    async fn append(&mut self, record: &NewTransaction) -> Result<TransactionRecord, StoreError> {
        let now = Utc::now();
        let stored = TransactionRecord {
            id: self.shared.next_record_id.fetch_add(1, Ordering::SeqCst) + 1,
            kind: record.kind,
            amount: record.amount.value(),
            user_id: record.user_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.appended.push(stored.clone());
        Ok(stored)
    }

    async fn append_many(
        &mut self,
        records: &[NewTransaction],
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            stored.push(self.append(record).await?);
        }
        Ok(stored)
    }

    async fn delete_all_for_account(&mut self, id: AccountId) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut deleted = self
            .shared
            .state()
            .records
            .iter()
            .filter(|record| record.user_id == id && record.deleted_at.is_none())
            .count() as u64;

        for record in self.appended.iter_mut() {
            if record.user_id == id && record.deleted_at.is_none() {
                record.deleted_at = Some(now);
                deleted += 1;
            }
        }
        self.cleared_logs.insert(id);
        Ok(deleted)
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn commit(self) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut state = self.shared.state();

        for (id, staged) in &self.staged {
            match staged {
                Staged::Live(account) => {
                    state.accounts.insert(
                        *id,
                        AccountRow {
                            account: account.clone(),
                            deleted_at: None,
                        },
                    );
                }
                Staged::Removed => {
                    if let Some(row) = state.accounts.get_mut(id) {
                        row.deleted_at = Some(now);
                    }
                }
            }
        }

        for record in state.records.iter_mut() {
            if self.cleared_logs.contains(&record.user_id) && record.deleted_at.is_none() {
                record.deleted_at = Some(now);
                record.updated_at = now;
            }
        }
        state.records.extend(self.appended.iter().cloned());

        // Row locks are released when `self.held` drops, after publishing
        drop(state);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        let released: Vec<AccountId> = self.held.keys().copied().collect();
        self.held.clear();
        self.shared.prune_row_locks(released);
    }
}
