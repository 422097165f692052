//! Ledger store abstraction.

use async_trait::async_trait;

use tally_core::{Balance, BalanceId, Tx, TxId};

use crate::error::StoreError;

/// The five ledger operations plus the point balance read.
///
/// Each mutating operation is a single all-or-nothing unit: either the whole
/// effect (balance mutation + tx row change) commits, or nothing does.
/// `created_at` and `deleted_at` on [`Tx`] are assigned by the store; values
/// supplied by the caller on `record_tx` are ignored.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a zero-amount balance row. Fails with
    /// [`StoreError::AlreadyExists`] if the balance is already open.
    async fn open_balance(&self, balance_id: BalanceId) -> Result<(), StoreError>;

    /// Point read of the current balance.
    async fn balance(&self, balance_id: BalanceId) -> Result<Balance, StoreError>;

    /// Apply one transaction's effect to its balance exactly once.
    ///
    /// A retried or duplicated call with the same tx id fails with
    /// [`StoreError::AlreadyExists`] and has no additional balance effect.
    async fn record_tx(&self, tx: Tx) -> Result<(), StoreError>;

    /// Cancel a batch of previously recorded, still-active transactions,
    /// reversing their aggregate balance effect atomically.
    ///
    /// Already-cancelled ids are inert; if no id in the batch matches an
    /// active tx the call fails with [`StoreError::NotFound`]. Partial
    /// cancellation across the batch is not a valid outcome.
    async fn cancel_txs(&self, balance_id: BalanceId, tx_ids: &[TxId]) -> Result<(), StoreError>;

    /// Up to `limit` transactions ordered by tx id descending (creation
    /// order descending). Cancelled transactions are excluded unless
    /// `include_deleted` is set.
    async fn recent_txs(
        &self,
        balance_id: BalanceId,
        include_deleted: bool,
        limit: i64,
    ) -> Result<Vec<Tx>, StoreError>;

    /// Same as [`LedgerStore::recent_txs`], additionally constrained to
    /// tx ids strictly less than `before` (keyset pagination).
    async fn previous_txs(
        &self,
        balance_id: BalanceId,
        include_deleted: bool,
        before: TxId,
        limit: i64,
    ) -> Result<Vec<Tx>, StoreError>;
}
