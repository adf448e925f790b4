use std::time::Duration;

use crate::config::{ClosePolicy, LedgerConfig};
use crate::domain::{format_cents, Account, AccountId, Cents, CustomerId, NewAccount};
use crate::storage::{store_now, Repository, Unit};

use super::unit_of_work::{deadline_after, settle, with_deadline};
use super::LedgerError;

/// Account state and the only sanctioned ways to change it.
#[derive(Clone)]
pub struct AccountLedger {
    repo: Repository,
    close_policy: ClosePolicy,
    unit_timeout: Option<Duration>,
}

impl AccountLedger {
    pub fn new(repo: Repository, config: &LedgerConfig) -> Self {
        Self {
            repo,
            close_policy: config.close_policy,
            unit_timeout: config.unit_timeout,
        }
    }

    pub fn close_policy(&self) -> ClosePolicy {
        self.close_policy
    }

    /// Open a new ACTIVE account.
    pub async fn open(&self, new: NewAccount) -> Result<Account, LedgerError> {
        new.validate().map_err(LedgerError::Validation)?;

        if self.repo.get_account_by_number(&new.number).await?.is_some() {
            return Err(LedgerError::DuplicateEntry(format!(
                "account number {}",
                new.number
            )));
        }

        let account = new.into_account(store_now());
        self.repo
            .insert_account(&account)
            .await
            .map_err(|e| LedgerError::from_insert(e, format!("account number {}", account.number)))?;

        tracing::info!(
            account_id = %account.id,
            account_number = %account.number,
            opening_balance = account.opening_balance,
            "account opened"
        );
        Ok(account)
    }

    pub async fn get(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.repo
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::account_not_found(account_id))
    }

    pub async fn get_by_number(&self, number: &str) -> Result<Account, LedgerError> {
        self.repo
            .get_account_by_number(number)
            .await?
            .ok_or_else(|| LedgerError::account_not_found(number))
    }

    /// A customer's accounts, newest opened first.
    pub async fn list_by_customer(&self, customer_id: CustomerId) -> Result<Vec<Account>, LedgerError> {
        Ok(self.repo.list_accounts_by_customer(customer_id).await?)
    }

    /// Apply a signed delta to an account's balance inside `unit`.
    ///
    /// The unit must already hold the account's row lock; the write only
    /// lands on an ACTIVE row.
    pub async fn adjust_balance(
        &self,
        unit: &mut Unit,
        account_id: AccountId,
        delta: Cents,
    ) -> Result<(), LedgerError> {
        if !unit.holds(account_id) {
            return Err(LedgerError::InvalidState(format!(
                "balance of account {} changed without holding its lock",
                account_id
            )));
        }

        let affected = unit.apply_balance_delta(account_id, delta).await?;
        if affected == 0 {
            return Err(LedgerError::AccountClosed(account_id));
        }
        Ok(())
    }

    /// Close an ACTIVE account. Runs under the account's row lock, so it
    /// waits for in-flight postings on the account and they cannot follow it.
    pub async fn close(&self, account_id: AccountId) -> Result<(), LedgerError> {
        let outcome = async {
            let deadline = deadline_after(self.unit_timeout);
            let mut unit = self.repo.begin_unit().await?;
            let result =
                with_deadline(deadline, self.close_in_unit(&mut unit, account_id)).await;
            settle(unit, result).await
        }
        .await;

        match &outcome {
            Ok(()) => tracing::info!(%account_id, "account closed"),
            Err(err) => tracing::warn!(%account_id, kind = err.kind(), "account close rolled back"),
        }
        outcome
    }

    async fn close_in_unit(&self, unit: &mut Unit, account_id: AccountId) -> Result<(), LedgerError> {
        let account = unit
            .lock_account_for_update(account_id)
            .await?
            .ok_or_else(|| LedgerError::account_not_found(account_id))?;

        if !account.status.is_active() {
            return Err(LedgerError::InvalidState(format!(
                "account {} is already closed",
                account_id
            )));
        }

        if self.close_policy == ClosePolicy::RequireZeroBalance && account.balance != 0 {
            return Err(LedgerError::InvalidState(format!(
                "account {} still holds {}",
                account_id,
                format_cents(account.balance)
            )));
        }

        if unit.mark_closed(account_id, store_now()).await? == 0 {
            return Err(LedgerError::InvalidState(format!(
                "account {} is no longer active",
                account_id
            )));
        }
        Ok(())
    }
}
