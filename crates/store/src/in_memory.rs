//! In-memory ledger store.
//!
//! Intended for tests/dev. Observable semantics mirror [`crate::PostgresLedger`]:
//! mutations are fully serialized (one writer lock instead of per-balance
//! advisory locks), duplicates and overdrafts are rejected before any state
//! changes, and cancellation only touches still-active rows.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use tally_core::{Balance, BalanceId, Tx, TxId};

use crate::error::StoreError;
use crate::ledger::LedgerStore;

#[derive(Debug, Default)]
struct Inner {
    balances: HashMap<BalanceId, Decimal>,
    txs: BTreeMap<(BalanceId, TxId), Tx>,
}

impl Inner {
    fn page(
        &self,
        balance_id: BalanceId,
        include_deleted: bool,
        before: Option<TxId>,
        limit: i64,
    ) -> Vec<Tx> {
        let lo = (balance_id, TxId::from_uuid(Uuid::nil()));
        let hi = (balance_id, TxId::from_uuid(Uuid::max()));

        self.txs
            .range(lo..=hi)
            .rev()
            .map(|(_, tx)| tx)
            .filter(|tx| include_deleted || !tx.is_deleted())
            .filter(|tx| before.is_none_or(|b| tx.tx_id < b))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect()
    }
}

/// In-memory ledger store.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: RwLock<Inner>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedger {
    async fn open_balance(&self, balance_id: BalanceId) -> Result<(), StoreError> {
        let mut inner = write(&self.inner)?;

        if inner.balances.contains_key(&balance_id) {
            return Err(StoreError::AlreadyExists);
        }
        inner.balances.insert(balance_id, Decimal::ZERO);

        Ok(())
    }

    async fn balance(&self, balance_id: BalanceId) -> Result<Balance, StoreError> {
        let inner = read(&self.inner)?;

        let amount = inner
            .balances
            .get(&balance_id)
            .copied()
            .ok_or(StoreError::NotFound)?;

        Ok(Balance { balance_id, amount })
    }

    async fn record_tx(&self, tx: Tx) -> Result<(), StoreError> {
        let mut inner = write(&self.inner)?;

        let amount = inner
            .balances
            .get(&tx.balance_id)
            .copied()
            .ok_or(StoreError::NotFound)?;

        // Same outcome precedence as the Postgres protocol: the balance
        // check runs before the duplicate check.
        let next = amount + tx.delta();
        if next < Decimal::ZERO {
            return Err(StoreError::NegativeBalance);
        }

        let key = (tx.balance_id, tx.tx_id);
        if inner.txs.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }

        inner.balances.insert(tx.balance_id, next);
        inner.txs.insert(
            key,
            Tx {
                created_at: Utc::now(),
                deleted_at: None,
                ..tx
            },
        );

        Ok(())
    }

    async fn cancel_txs(&self, balance_id: BalanceId, tx_ids: &[TxId]) -> Result<(), StoreError> {
        let mut inner = write(&self.inner)?;

        let matched: BTreeSet<TxId> = tx_ids
            .iter()
            .copied()
            .filter(|id| {
                inner
                    .txs
                    .get(&(balance_id, *id))
                    .is_some_and(|tx| !tx.is_deleted())
            })
            .collect();

        if matched.is_empty() {
            return Err(StoreError::NotFound);
        }

        let change: Decimal = matched
            .iter()
            .map(|id| inner.txs[&(balance_id, *id)].reversal())
            .sum();

        let amount = inner
            .balances
            .get(&balance_id)
            .copied()
            .ok_or(StoreError::NotFound)?;

        let next = amount + change;
        if next < Decimal::ZERO {
            return Err(StoreError::NegativeBalance);
        }

        let now = Utc::now();
        inner.balances.insert(balance_id, next);
        for id in matched {
            if let Some(tx) = inner.txs.get_mut(&(balance_id, id)) {
                tx.deleted_at = Some(now);
            }
        }

        Ok(())
    }

    async fn recent_txs(
        &self,
        balance_id: BalanceId,
        include_deleted: bool,
        limit: i64,
    ) -> Result<Vec<Tx>, StoreError> {
        let inner = read(&self.inner)?;
        Ok(inner.page(balance_id, include_deleted, None, limit))
    }

    async fn previous_txs(
        &self,
        balance_id: BalanceId,
        include_deleted: bool,
        before: TxId,
        limit: i64,
    ) -> Result<Vec<Tx>, StoreError> {
        let inner = read(&self.inner)?;
        Ok(inner.page(balance_id, include_deleted, Some(before), limit))
    }
}

fn read(lock: &RwLock<Inner>) -> Result<std::sync::RwLockReadGuard<'_, Inner>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Backend("lock", "poisoned".to_string()))
}

fn write(lock: &RwLock<Inner>) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Backend("lock", "poisoned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{Source, State};

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn tx(balance_id: BalanceId, state: State, amount: &str) -> Tx {
        Tx {
            tx_id: TxId::new(),
            balance_id,
            source: Source::Game,
            state,
            amount: dec(amount),
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    async fn open_ledger() -> (InMemoryLedger, BalanceId) {
        let ledger = InMemoryLedger::new();
        let balance_id = BalanceId::new();
        ledger.open_balance(balance_id).await.unwrap();
        (ledger, balance_id)
    }

    async fn amount_of(ledger: &InMemoryLedger, balance_id: BalanceId) -> Decimal {
        ledger.balance(balance_id).await.unwrap().amount
    }

    #[tokio::test]
    async fn deposit_updates_balance() {
        let (ledger, balance_id) = open_ledger().await;

        ledger
            .record_tx(tx(balance_id, State::Deposit, "100"))
            .await
            .unwrap();

        assert_eq!(amount_of(&ledger, balance_id).await, dec("100"));
    }

    #[tokio::test]
    async fn open_twice_fails_already_exists() {
        let (ledger, balance_id) = open_ledger().await;

        let err = ledger.open_balance(balance_id).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
    }

    #[tokio::test]
    async fn record_on_unknown_balance_fails_not_found() {
        let ledger = InMemoryLedger::new();

        let err = ledger
            .record_tx(tx(BalanceId::new(), State::Deposit, "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn duplicate_tx_id_has_exactly_one_effect() {
        let (ledger, balance_id) = open_ledger().await;

        ledger
            .record_tx(tx(balance_id, State::Deposit, "100"))
            .await
            .unwrap();
        let withdraw = tx(balance_id, State::Withdraw, "30");
        ledger.record_tx(withdraw.clone()).await.unwrap();
        assert_eq!(amount_of(&ledger, balance_id).await, dec("70"));

        let err = ledger.record_tx(withdraw).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
        assert_eq!(amount_of(&ledger, balance_id).await, dec("70"));
    }

    #[tokio::test]
    async fn overdraw_is_rejected_without_side_effects() {
        let (ledger, balance_id) = open_ledger().await;
        ledger
            .record_tx(tx(balance_id, State::Deposit, "70"))
            .await
            .unwrap();

        let err = ledger
            .record_tx(tx(balance_id, State::Withdraw, "1000"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NegativeBalance));
        assert_eq!(amount_of(&ledger, balance_id).await, dec("70"));

        // The rejected tx never became visible either.
        let txs = ledger.recent_txs(balance_id, true, 10).await.unwrap();
        assert_eq!(txs.len(), 1);
    }

    #[tokio::test]
    async fn cancel_restores_balance_exactly() {
        let (ledger, balance_id) = open_ledger().await;
        ledger
            .record_tx(tx(balance_id, State::Deposit, "100"))
            .await
            .unwrap();

        let withdraw = tx(balance_id, State::Withdraw, "30.0001");
        ledger.record_tx(withdraw.clone()).await.unwrap();
        assert_eq!(amount_of(&ledger, balance_id).await, dec("69.9999"));

        ledger
            .cancel_txs(balance_id, &[withdraw.tx_id])
            .await
            .unwrap();
        assert_eq!(amount_of(&ledger, balance_id).await, dec("100"));
    }

    #[tokio::test]
    async fn cancelled_tx_is_hidden_unless_deleted_included() {
        let (ledger, balance_id) = open_ledger().await;
        ledger
            .record_tx(tx(balance_id, State::Deposit, "100"))
            .await
            .unwrap();
        let withdraw = tx(balance_id, State::Withdraw, "30");
        ledger.record_tx(withdraw.clone()).await.unwrap();

        ledger
            .cancel_txs(balance_id, &[withdraw.tx_id])
            .await
            .unwrap();

        let active = ledger.recent_txs(balance_id, false, 10).await.unwrap();
        assert!(active.iter().all(|t| t.tx_id != withdraw.tx_id));

        let all = ledger.recent_txs(balance_id, true, 10).await.unwrap();
        let cancelled = all.iter().find(|t| t.tx_id == withdraw.tx_id).unwrap();
        assert!(cancelled.is_deleted());
    }

    #[tokio::test]
    async fn recancel_fails_not_found_and_keeps_balance() {
        let (ledger, balance_id) = open_ledger().await;
        ledger
            .record_tx(tx(balance_id, State::Deposit, "100"))
            .await
            .unwrap();
        let withdraw = tx(balance_id, State::Withdraw, "30");
        ledger.record_tx(withdraw.clone()).await.unwrap();

        ledger
            .cancel_txs(balance_id, &[withdraw.tx_id])
            .await
            .unwrap();
        let err = ledger
            .cancel_txs(balance_id, &[withdraw.tx_id])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::NotFound));
        assert_eq!(amount_of(&ledger, balance_id).await, dec("100"));
    }

    #[tokio::test]
    async fn mixed_batch_cancels_only_active_rows() {
        let (ledger, balance_id) = open_ledger().await;
        ledger
            .record_tx(tx(balance_id, State::Deposit, "100"))
            .await
            .unwrap();
        let w1 = tx(balance_id, State::Withdraw, "10");
        let w2 = tx(balance_id, State::Withdraw, "20");
        ledger.record_tx(w1.clone()).await.unwrap();
        ledger.record_tx(w2.clone()).await.unwrap();
        assert_eq!(amount_of(&ledger, balance_id).await, dec("70"));

        ledger.cancel_txs(balance_id, &[w1.tx_id]).await.unwrap();
        assert_eq!(amount_of(&ledger, balance_id).await, dec("80"));

        // w1 is already cancelled; only w2's reversal may apply.
        ledger
            .cancel_txs(balance_id, &[w1.tx_id, w2.tx_id])
            .await
            .unwrap();
        assert_eq!(amount_of(&ledger, balance_id).await, dec("100"));
    }

    #[tokio::test]
    async fn cancel_rejecting_negative_balance_is_atomic() {
        let (ledger, balance_id) = open_ledger().await;
        let deposit = tx(balance_id, State::Deposit, "100");
        ledger.record_tx(deposit.clone()).await.unwrap();
        ledger
            .record_tx(tx(balance_id, State::Withdraw, "60"))
            .await
            .unwrap();

        // Cancelling the deposit would leave 40 - 100 < 0.
        let err = ledger
            .cancel_txs(balance_id, &[deposit.tx_id])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NegativeBalance));

        assert_eq!(amount_of(&ledger, balance_id).await, dec("40"));
        let all = ledger.recent_txs(balance_id, false, 10).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn recent_txs_orders_by_id_descending() {
        let (ledger, balance_id) = open_ledger().await;
        let mut ids = Vec::new();
        for _ in 0..5 {
            let t = tx(balance_id, State::Deposit, "1");
            ids.push(t.tx_id);
            ledger.record_tx(t).await.unwrap();
        }

        let txs = ledger.recent_txs(balance_id, false, 3).await.unwrap();
        let got: Vec<TxId> = txs.iter().map(|t| t.tx_id).collect();
        ids.reverse();
        assert_eq!(got, &ids[..3]);
    }

    #[tokio::test]
    async fn previous_txs_pages_are_stable_under_new_inserts() {
        let (ledger, balance_id) = open_ledger().await;
        let mut ids = Vec::new();
        for _ in 0..6 {
            let t = tx(balance_id, State::Deposit, "1");
            ids.push(t.tx_id);
            ledger.record_tx(t).await.unwrap();
        }

        let cursor = ids[3];
        let page = ledger
            .previous_txs(balance_id, false, cursor, 2)
            .await
            .unwrap();
        let got: Vec<TxId> = page.iter().map(|t| t.tx_id).collect();
        assert_eq!(got, vec![ids[2], ids[1]]);

        // New inserts land ahead of the cursor and must not disturb the page.
        for _ in 0..3 {
            ledger
                .record_tx(tx(balance_id, State::Deposit, "1"))
                .await
                .unwrap();
        }
        let again = ledger
            .previous_txs(balance_id, false, cursor, 2)
            .await
            .unwrap();
        let got_again: Vec<TxId> = again.iter().map(|t| t.tx_id).collect();
        assert_eq!(got_again, got);
    }

    #[tokio::test]
    async fn balances_are_isolated_per_account() {
        let ledger = InMemoryLedger::new();
        let a = BalanceId::new();
        let b = BalanceId::new();
        ledger.open_balance(a).await.unwrap();
        ledger.open_balance(b).await.unwrap();

        ledger.record_tx(tx(a, State::Deposit, "5")).await.unwrap();

        assert_eq!(amount_of(&ledger, a).await, dec("5"));
        assert_eq!(amount_of(&ledger, b).await, Decimal::ZERO);
        assert!(ledger.recent_txs(b, true, 10).await.unwrap().is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn run<F: std::future::Future>(fut: F) -> F::Output {
            tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap()
                .block_on(fut)
        }

        proptest! {
            /// Replaying any accepted sequence of deposits/withdrawals keeps
            /// the balance non-negative and equal to the sum of accepted
            /// deltas; cancelling everything afterwards restores zero.
            #[test]
            fn non_negativity_and_full_reversal(
                ops in proptest::collection::vec((any::<bool>(), 1u64..10_000), 1..30)
            ) {
                run(async move {
                    let (ledger, balance_id) = open_ledger().await;
                    let mut model = Decimal::ZERO;
                    let mut accepted = Vec::new();

                    for (is_deposit, cents) in ops {
                        let state = if is_deposit { State::Deposit } else { State::Withdraw };
                        let t = Tx {
                            amount: Decimal::new(cents as i64, 2),
                            ..tx(balance_id, state, "0.01")
                        };
                        match ledger.record_tx(t.clone()).await {
                            Ok(()) => {
                                model += t.delta();
                                accepted.push(t.tx_id);
                            }
                            Err(StoreError::NegativeBalance) => {}
                            Err(other) => panic!("unexpected error: {other}"),
                        }

                        let amount = amount_of(&ledger, balance_id).await;
                        prop_assert!(amount >= Decimal::ZERO);
                        prop_assert_eq!(amount, model);
                    }

                    if !accepted.is_empty() {
                        ledger.cancel_txs(balance_id, &accepted).await.unwrap();
                        prop_assert_eq!(amount_of(&ledger, balance_id).await, Decimal::ZERO);
                    }

                    Ok(())
                })?;
            }
        }
    }
}
