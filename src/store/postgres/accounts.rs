//! Account Store (Postgres)
//!
//! Balance rows in `accounts`. Every function runs on the connection of
//! the caller's transaction.

use sqlx::PgConnection;

use crate::domain::{Account, AccountId, Amount, DomainError};
use crate::store::StoreError;

const ACCOUNT_COLUMNS: &str = "id, balance, created_at, updated_at";

/// Queries against the `accounts` table
pub struct AccountRepository;

impl AccountRepository {
    /// Read without locking
    pub async fn find(
        conn: &mut PgConnection,
        id: AccountId,
    ) -> Result<Option<Account>, sqlx::Error> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 AND deleted_at IS NULL"
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Read holding the row lock until the transaction ends
    pub async fn lock_and_get(
        conn: &mut PgConnection,
        id: AccountId,
    ) -> Result<Option<Account>, sqlx::Error> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    pub async fn credit(
        conn: &mut PgConnection,
        id: AccountId,
        amount: &Amount,
    ) -> Result<Account, StoreError> {
        let sql = format!(
            r#"
            UPDATE accounts
            SET balance = balance + $2, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .bind(amount.value())
            .fetch_optional(conn)
            .await?;

        tracing::debug!(account_id = id, amount = %amount, "Credited account balance");

        account.ok_or_else(|| DomainError::AccountNotFound(id).into())
    }

    pub async fn debit(
        conn: &mut PgConnection,
        id: AccountId,
        amount: &Amount,
    ) -> Result<Account, StoreError> {
        let account = Self::lock_and_get(&mut *conn, id)
            .await?
            .ok_or(DomainError::AccountNotFound(id))?;

        // Row is locked, the balance cannot move under us
        account.debited(amount)?;

        let sql = format!(
            r#"
            UPDATE accounts
            SET balance = balance - $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .bind(amount.value())
            .fetch_one(conn)
            .await?;

        tracing::debug!(account_id = id, amount = %amount, "Debited account balance");

        Ok(account)
    }

    pub async fn list_nonzero_locked(conn: &mut PgConnection) -> Result<Vec<Account>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}
            FROM accounts
            WHERE balance <> 0 AND deleted_at IS NULL
            ORDER BY id
            FOR UPDATE
            "#
        );
        sqlx::query_as::<_, Account>(&sql).fetch_all(conn).await
    }

    /// Prior balances are read by the same statement that zeroes them
    pub async fn zero_all(conn: &mut PgConnection) -> Result<Vec<Account>, sqlx::Error> {
        let mut zeroed = sqlx::query_as::<_, Account>(
            r#"
            WITH prior AS (
                SELECT id, balance
                FROM accounts
                WHERE balance <> 0 AND deleted_at IS NULL
                ORDER BY id
                FOR UPDATE
            )
            UPDATE accounts a
            SET balance = 0, updated_at = NOW()
            FROM prior
            WHERE a.id = prior.id
            RETURNING a.id, prior.balance AS balance, a.created_at, a.updated_at
            "#,
        )
        .fetch_all(conn)
        .await?;

        zeroed.sort_by_key(|account| account.id);
        Ok(zeroed)
    }

    /// Insert a zero-balance row, reviving a soft-removed one with the same id
    pub async fn open(conn: &mut PgConnection, id: AccountId) -> Result<Account, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO accounts (id, balance)
            VALUES ($1, 0)
            ON CONFLICT (id) DO UPDATE
            SET balance = 0, deleted_at = NULL, created_at = NOW(), updated_at = NOW()
            WHERE accounts.deleted_at IS NOT NULL
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?;

        account.ok_or_else(|| DomainError::AccountExists(id).into())
    }

    pub async fn close(conn: &mut PgConnection, id: AccountId) -> Result<(), StoreError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE accounts
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(conn)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DomainError::AccountNotFound(id).into());
        }
        Ok(())
    }
}
