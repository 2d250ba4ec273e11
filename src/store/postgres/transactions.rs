//! Transaction Log Store (Postgres)
//!
//! Append-only rows in `transactions`. Records are soft-deleted, never
//! updated otherwise.

use sqlx::{PgConnection, Postgres, QueryBuilder};

use crate::domain::{AccountId, NewTransaction, TransactionRecord};

const RECORD_COLUMNS: &str = "id, type, amount, user_id, created_at, updated_at, deleted_at";

/// Rows per bulk INSERT, keeps bind parameters well below the protocol limit
const BULK_CHUNK: usize = 5_000;

/// Queries against the `transactions` table
pub struct TransactionRepository;

impl TransactionRepository {
    pub async fn append(
        conn: &mut PgConnection,
        record: &NewTransaction,
    ) -> Result<TransactionRecord, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO transactions (type, amount, user_id)
            VALUES ($1, $2, $3)
            RETURNING {RECORD_COLUMNS}
            "#
        );
        let stored = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(record.kind)
            .bind(record.amount.value())
            .bind(record.user_id)
            .fetch_one(conn)
            .await?;

        tracing::debug!(
            record_id = stored.id,
            account_id = stored.user_id,
            kind = %stored.kind,
            "Appended transaction record"
        );

        Ok(stored)
    }

    /// Multi-row INSERT. Ids come from one sequence in row order, so sorting
    /// the returned rows by id restores input order.
    pub async fn append_many(
        conn: &mut PgConnection,
        records: &[NewTransaction],
    ) -> Result<Vec<TransactionRecord>, sqlx::Error> {
        let mut stored = Vec::with_capacity(records.len());

        for chunk in records.chunks(BULK_CHUNK) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO transactions (type, amount, user_id) ");
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.kind)
                    .push_bind(record.amount.value())
                    .push_bind(record.user_id);
            });
            builder.push(" RETURNING ");
            builder.push(RECORD_COLUMNS);

            let mut rows = builder
                .build_query_as::<TransactionRecord>()
                .fetch_all(&mut *conn)
                .await?;
            rows.sort_by_key(|record| record.id);
            stored.extend(rows);
        }

        tracing::debug!(count = stored.len(), "Appended transaction records");

        Ok(stored)
    }

    pub async fn delete_all_for_account(
        conn: &mut PgConnection,
        id: AccountId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE user_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn count_for_account(conn: &mut PgConnection, id: AccountId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM transactions WHERE user_id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_one(conn)
        .await
    }

    pub async fn page_for_account(
        conn: &mut PgConnection,
        id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM transactions
            WHERE user_id = $1 AND deleted_at IS NULL
            ORDER BY id DESC
            LIMIT $2 OFFSET $3
            "#
        );
        sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(id)
            .bind(limit)
            .bind(offset)
            .fetch_all(conn)
            .await
    }
}
