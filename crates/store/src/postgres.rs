//! Postgres-backed ledger store.
//!
//! This is the transactional core of the service. Each mutating operation is
//! one database transaction that:
//!
//! 1. Takes `pg_advisory_xact_lock` keyed by a stable 64-bit hash of the
//!    balance id, serializing all record/cancel calls against that balance
//!    across every process instance. The lock is released automatically at
//!    transaction end; it is never a persisted row.
//! 2. Applies the balance mutation, relying on the `amount >= 0` check
//!    constraint for the non-negativity invariant.
//! 3. Inserts or soft-deletes tx rows.
//!
//! Dropping an uncommitted [`sqlx::Transaction`] rolls it back, so every
//! early-return and panic path leaves nothing partially applied.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | Where | StoreError |
//! |-----------------------|-------|------------|
//! | `23505` (unique violation) | balance insert / tx insert | `AlreadyExists` |
//! | `23514` (check violation) | balance update | `NegativeBalance` |
//! | anything else | any | `Backend` |

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use tally_core::{Balance, BalanceId, Tx, TxId};

use crate::error::{is_check_violation, is_unique_violation, map_sqlx_error, StoreError};
use crate::ledger::LedgerStore;

/// Postgres-backed ledger store.
///
/// Holds a connection pool; cheap to clone and share across request handlers.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedger {
    #[instrument(skip(self), fields(balance_id = %balance_id), err)]
    async fn open_balance(&self, balance_id: BalanceId) -> Result<(), StoreError> {
        // Uniqueness on the primary key suffices; no lock needed.
        sqlx::query("INSERT INTO balances (balance_id, amount) VALUES ($1, 0)")
            .bind(balance_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::AlreadyExists
                } else {
                    map_sqlx_error("open_balance", e)
                }
            })?;

        Ok(())
    }

    #[instrument(skip(self), fields(balance_id = %balance_id), err)]
    async fn balance(&self, balance_id: BalanceId) -> Result<Balance, StoreError> {
        let row = sqlx::query("SELECT balance_id, amount FROM balances WHERE balance_id = $1")
            .bind(balance_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_balance", e))?
            .ok_or(StoreError::NotFound)?;

        BalanceRow::from_row(&row)
            .map(Balance::from)
            .map_err(|e| StoreError::Backend("decode_balance_row", e.to_string()))
    }

    #[instrument(skip(self, tx), fields(balance_id = %tx.balance_id, tx_id = %tx.tx_id), err)]
    async fn record_tx(&self, tx: Tx) -> Result<(), StoreError> {
        let mut dbtx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        lock_balance(&mut dbtx, tx.balance_id).await?;

        // The balance update runs before the uniqueness-checked insert:
        // a duplicate tx id must be rejected without its delta ever being
        // applied a second time.
        let updated = sqlx::query("UPDATE balances SET amount = amount + $2 WHERE balance_id = $1")
            .bind(tx.balance_id.as_uuid())
            .bind(tx.delta())
            .execute(&mut *dbtx)
            .await
            .map_err(|e| {
                if is_check_violation(&e) {
                    StoreError::NegativeBalance
                } else {
                    map_sqlx_error("update_balance", e)
                }
            })?
            .rows_affected();

        if updated == 0 {
            return Err(StoreError::NotFound);
        }

        sqlx::query(
            "INSERT INTO txs (tx_id, balance_id, source, state, amount) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(tx.tx_id.as_uuid())
        .bind(tx.balance_id.as_uuid())
        .bind(tx.source.as_str())
        .bind(tx.state.as_str())
        .bind(tx.amount)
        .execute(&mut *dbtx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::AlreadyExists
            } else {
                map_sqlx_error("insert_tx", e)
            }
        })?;

        dbtx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        Ok(())
    }

    #[instrument(skip(self, tx_ids), fields(balance_id = %balance_id, batch = tx_ids.len()), err)]
    async fn cancel_txs(&self, balance_id: BalanceId, tx_ids: &[TxId]) -> Result<(), StoreError> {
        let ids: Vec<Uuid> = tx_ids.iter().map(|id| *id.as_uuid()).collect();

        let mut dbtx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        lock_balance(&mut dbtx, balance_id).await?;

        // Only still-active rows participate: the aggregate reversal must
        // cover exactly the rows that get marked below, so already-cancelled
        // ids contribute nothing and can never double-reverse the balance.
        let rows = sqlx::query(
            r#"
            SELECT tx_id, balance_id, source, state, amount, created_at, deleted_at
            FROM txs
            WHERE balance_id = $1 AND tx_id = ANY($2) AND deleted_at IS NULL
            "#,
        )
        .bind(balance_id.as_uuid())
        .bind(&ids)
        .fetch_all(&mut *dbtx)
        .await
        .map_err(|e| map_sqlx_error("fetch_txs", e))?;

        if rows.is_empty() {
            return Err(StoreError::NotFound);
        }

        let mut change = Decimal::ZERO;
        for row in &rows {
            let tx: Tx = TxRow::from_row(row)
                .map_err(|e| StoreError::Backend("decode_tx_row", e.to_string()))?
                .try_into()?;
            change += tx.reversal();
        }

        let updated = sqlx::query("UPDATE balances SET amount = amount + $2 WHERE balance_id = $1")
            .bind(balance_id.as_uuid())
            .bind(change)
            .execute(&mut *dbtx)
            .await
            .map_err(|e| {
                if is_check_violation(&e) {
                    StoreError::NegativeBalance
                } else {
                    map_sqlx_error("update_balance", e)
                }
            })?
            .rows_affected();

        if updated == 0 {
            return Err(StoreError::NotFound);
        }

        let marked = sqlx::query(
            r#"
            UPDATE txs
            SET deleted_at = now()
            WHERE balance_id = $1 AND tx_id = ANY($2) AND deleted_at IS NULL
            "#,
        )
        .bind(balance_id.as_uuid())
        .bind(&ids)
        .execute(&mut *dbtx)
        .await
        .map_err(|e| map_sqlx_error("mark_txs_deleted", e))?
        .rows_affected();

        if marked == 0 {
            return Err(StoreError::NotFound);
        }

        dbtx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(balance_id = %balance_id), err)]
    async fn recent_txs(
        &self,
        balance_id: BalanceId,
        include_deleted: bool,
        limit: i64,
    ) -> Result<Vec<Tx>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT tx_id, balance_id, source, state, amount, created_at, deleted_at
            FROM txs
            WHERE balance_id = $1 AND ($2 OR deleted_at IS NULL)
            ORDER BY tx_id DESC
            LIMIT $3
            "#,
        )
        .bind(balance_id.as_uuid())
        .bind(include_deleted)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_recent_txs", e))?;

        decode_tx_rows(rows)
    }

    #[instrument(skip(self), fields(balance_id = %balance_id, before = %before), err)]
    async fn previous_txs(
        &self,
        balance_id: BalanceId,
        include_deleted: bool,
        before: TxId,
        limit: i64,
    ) -> Result<Vec<Tx>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT tx_id, balance_id, source, state, amount, created_at, deleted_at
            FROM txs
            WHERE balance_id = $1 AND tx_id < $2 AND ($3 OR deleted_at IS NULL)
            ORDER BY tx_id DESC
            LIMIT $4
            "#,
        )
        .bind(balance_id.as_uuid())
        .bind(before.as_uuid())
        .bind(include_deleted)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_previous_txs", e))?;

        decode_tx_rows(rows)
    }
}

/// Take the transaction-scoped advisory lock for one balance.
///
/// `hashtextextended` gives a stable 64-bit key from the id's text form, so
/// every process instance maps the same balance to the same lock.
async fn lock_balance(
    dbtx: &mut Transaction<'_, Postgres>,
    balance_id: BalanceId,
) -> Result<(), StoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
        .bind(balance_id.as_uuid())
        .execute(&mut **dbtx)
        .await
        .map_err(|e| map_sqlx_error("lock_balance", e))?;

    Ok(())
}

fn decode_tx_rows(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Tx>, StoreError> {
    let mut txs = Vec::with_capacity(rows.len());
    for row in rows {
        let tx: Tx = TxRow::from_row(&row)
            .map_err(|e| StoreError::Backend("decode_tx_row", e.to_string()))?
            .try_into()?;
        txs.push(tx);
    }

    Ok(txs)
}

// SQLx row types

#[derive(Debug)]
struct TxRow {
    tx_id: Uuid,
    balance_id: Uuid,
    source: String,
    state: String,
    amount: Decimal,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for TxRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(TxRow {
            tx_id: row.try_get("tx_id")?,
            balance_id: row.try_get("balance_id")?,
            source: row.try_get("source")?,
            state: row.try_get("state")?,
            amount: row.try_get("amount")?,
            created_at: row.try_get("created_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

impl TryFrom<TxRow> for Tx {
    type Error = StoreError;

    fn try_from(row: TxRow) -> Result<Self, Self::Error> {
        let source = row
            .source
            .parse()
            .map_err(|e| StoreError::Backend("decode_tx_row", format!("{e}")))?;
        let state = row
            .state
            .parse()
            .map_err(|e| StoreError::Backend("decode_tx_row", format!("{e}")))?;

        Ok(Tx {
            tx_id: TxId::from_uuid(row.tx_id),
            balance_id: BalanceId::from_uuid(row.balance_id),
            source,
            state,
            amount: row.amount,
            created_at: row.created_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(Debug)]
struct BalanceRow {
    balance_id: Uuid,
    amount: Decimal,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for BalanceRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(BalanceRow {
            balance_id: row.try_get("balance_id")?,
            amount: row.try_get("amount")?,
        })
    }
}

impl From<BalanceRow> for Balance {
    fn from(row: BalanceRow) -> Self {
        Balance {
            balance_id: BalanceId::from_uuid(row.balance_id),
            amount: row.amount,
        }
    }
}
