use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

use crate::domain::AccountId;

/// Entries are pruned once the table grows past this many idle rows.
const PRUNE_THRESHOLD: usize = 1024;

/// Exclusive per-account locks shared by every unit of work on a repository.
///
/// A guard returned by [`RowLocks::acquire`] keeps its row locked until it is
/// dropped; units hold their guards until they commit or roll back.
#[derive(Clone, Default)]
pub struct RowLocks {
    rows: Arc<Mutex<HashMap<AccountId, Arc<RowMutex<()>>>>>,
}

/// Proof that a unit holds the exclusive lock of one account.
pub struct RowGuard {
    account_id: AccountId,
    _guard: OwnedMutexGuard<()>,
}

impl RowGuard {
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }
}

impl RowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every listed account, in ascending id order whatever the argument
    /// order, waiting for units that hold any of them. Duplicates are locked once.
    pub async fn acquire(&self, ids: &[AccountId]) -> Vec<RowGuard> {
        let mut ordered = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for account_id in ordered {
            let row = self.row(account_id);
            tracing::debug!(%account_id, "waiting for row lock");
            let guard = row.lock_owned().await;
            guards.push(RowGuard {
                account_id,
                _guard: guard,
            });
        }
        guards
    }

    fn row(&self, account_id: AccountId) -> Arc<RowMutex<()>> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        if rows.len() >= PRUNE_THRESHOLD {
            // Only the table itself references an idle row.
            rows.retain(|_, row| Arc::strong_count(row) > 1);
        }
        rows.entry(account_id).or_default().clone()
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn test_acquire_sorts_and_dedups() {
        let locks = RowLocks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let guards = locks.acquire(&[b, a, b]).await;
        let ids: Vec<_> = guards.iter().map(RowGuard::account_id).collect();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_same_row_is_exclusive() {
        let locks = RowLocks::new();
        let a = Uuid::new_v4();

        let held = locks.acquire(&[a]).await;
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire(&[a])).await;
        assert!(blocked.is_err(), "second lock on the same row must wait");

        drop(held);
        let reacquired =
            tokio::time::timeout(Duration::from_millis(500), locks.acquire(&[a])).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_unrelated_rows_do_not_block() {
        let locks = RowLocks::new();
        let _held = locks.acquire(&[Uuid::new_v4()]).await;

        let other =
            tokio::time::timeout(Duration::from_millis(500), locks.acquire(&[Uuid::new_v4()]))
                .await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_idle_rows_are_pruned() {
        let locks = RowLocks::new();
        for _ in 0..PRUNE_THRESHOLD {
            drop(locks.acquire(&[Uuid::new_v4()]).await);
        }
        let _held = locks.acquire(&[Uuid::new_v4()]).await;
        assert_eq!(locks.tracked(), 1);
    }
}
