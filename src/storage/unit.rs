use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqliteConnection, Transaction};
use uuid::Uuid;

use crate::domain::{AccountId, AccountStatus, Cents, LockedAccount, Movement, NewMovement};

use super::locks::{RowGuard, RowLocks};
use super::repository::{encode_timestamp, store_now};

/// One atomic unit of work: a SQLite transaction plus the account row locks it
/// holds until it ends.
///
/// `commit` and `rollback` can be called any number of times, in any order;
/// only the first one has an effect. Dropping an unfinished unit rolls it back
/// and releases its locks.
pub struct Unit {
    // Declared before `held` so the transaction ends before the row locks go.
    tx: Option<Transaction<'static, Sqlite>>,
    locks: RowLocks,
    held: Vec<RowGuard>,
    wrote: bool,
}

impl Unit {
    pub(super) fn new(tx: Transaction<'static, Sqlite>, locks: RowLocks) -> Self {
        Self {
            tx: Some(tx),
            locks,
            held: Vec::new(),
            wrote: false,
        }
    }

    /// True until the unit commits or rolls back.
    pub fn is_open(&self) -> bool {
        self.tx.is_some()
    }

    /// Whether this unit holds the row lock of `account_id`.
    pub fn holds(&self, account_id: AccountId) -> bool {
        self.held.iter().any(|g| g.account_id() == account_id)
    }

    fn conn(&mut self) -> Result<&mut SqliteConnection> {
        self.tx
            .as_deref_mut()
            .context("Unit of work has already finished")
    }

    /// Lock a single account for the rest of the unit and read its balance and
    /// status. `None` means the account does not exist.
    pub async fn lock_account_for_update(
        &mut self,
        account_id: AccountId,
    ) -> Result<Option<LockedAccount>> {
        let mut locked = self.lock_accounts_for_update(&[account_id]).await?;
        Ok(locked.pop().flatten())
    }

    /// Lock every listed account for the rest of the unit and read their
    /// balances and statuses, returned in argument order.
    ///
    /// Row locks are taken in ascending id order before any statement runs, and
    /// a unit takes them all at once: asking for more accounts after the first
    /// call (or after writing) is refused, since waiting on a row while owning
    /// the database write lock could deadlock with another unit.
    pub async fn lock_accounts_for_update(
        &mut self,
        ids: &[AccountId],
    ) -> Result<Vec<Option<LockedAccount>>> {
        if !self.is_open() {
            anyhow::bail!("Unit of work has already finished");
        }

        let missing: Vec<AccountId> = ids.iter().copied().filter(|id| !self.holds(*id)).collect();
        if !missing.is_empty() {
            if !self.held.is_empty() || self.wrote {
                anyhow::bail!("A unit of work must lock all of its accounts in a single call");
            }
            self.held = self.locks.acquire(&missing).await;
        }

        let mut locked = Vec::with_capacity(ids.len());
        for &account_id in ids {
            locked.push(self.claim_row(account_id).await?);
        }
        Ok(locked)
    }

    /// Touch the row so SQLite's write lock is held from here to the end of the
    /// transaction, returning the state as of that moment.
    async fn claim_row(&mut self, account_id: AccountId) -> Result<Option<LockedAccount>> {
        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance_cents = balance_cents
            WHERE account_id = ?
            RETURNING balance_cents, status
            "#,
        )
        .bind(account_id.to_string())
        .fetch_optional(self.conn()?)
        .await
        .context("Failed to lock account")?;

        match row {
            Some(row) => {
                let status: String = row.get("status");
                Ok(Some(LockedAccount {
                    id: account_id,
                    balance: row.get("balance_cents"),
                    status: status.parse::<AccountStatus>()?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Append a movement. The store assigns its id, sequence and timestamp.
    pub async fn insert_movement(&mut self, new: &NewMovement<'_>) -> Result<Movement> {
        let id = Uuid::new_v4();
        let created_at = store_now();
        self.wrote = true;

        let row = sqlx::query(
            r#"
            INSERT INTO movements (movement_id, account_id, movement_type, amount_cents, description, channel, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING sequence
            "#,
        )
        .bind(id.to_string())
        .bind(new.account_id.to_string())
        .bind(new.movement_type.as_str())
        .bind(new.amount)
        .bind(new.description)
        .bind(new.channel)
        .bind(encode_timestamp(created_at))
        .fetch_one(self.conn()?)
        .await
        .context("Failed to insert movement")?;

        Ok(Movement {
            id,
            sequence: row.get("sequence"),
            account_id: new.account_id,
            movement_type: new.movement_type,
            amount: new.amount,
            description: new.description.map(str::to_string),
            channel: new.channel.map(str::to_string),
            created_at,
        })
    }

    /// Add `delta` to an ACTIVE account's balance. Returns the number of rows
    /// changed: 0 means the account is gone or no longer ACTIVE.
    pub async fn apply_balance_delta(&mut self, account_id: AccountId, delta: Cents) -> Result<u64> {
        self.wrote = true;
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance_cents = balance_cents + ?
            WHERE account_id = ? AND status = 'ACTIVE'
            "#,
        )
        .bind(delta)
        .bind(account_id.to_string())
        .execute(self.conn()?)
        .await
        .context("Failed to apply balance delta")?;

        Ok(result.rows_affected())
    }

    /// Flip an ACTIVE account to CLOSED, stamping `closed_at` in the same write.
    pub async fn mark_closed(&mut self, account_id: AccountId, at: DateTime<Utc>) -> Result<u64> {
        self.wrote = true;
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET status = 'CLOSED', closed_at = ?
            WHERE account_id = ? AND status = 'ACTIVE'
            "#,
        )
        .bind(encode_timestamp(at))
        .bind(account_id.to_string())
        .execute(self.conn()?)
        .await
        .context("Failed to close account")?;

        Ok(result.rows_affected())
    }

    pub async fn commit(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            let result = tx.commit().await.context("Failed to commit unit of work");
            self.held.clear();
            result?;
        }
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            let result = tx.rollback().await.context("Failed to roll back unit of work");
            self.held.clear();
            result?;
        }
        Ok(())
    }
}
