use std::time::Duration;

use crate::domain::{
    checked_apply, lock_order, AccountId, Cents, LockedAccount, Movement, MovementId, MovementType,
    NewMovement, PostingRequest, TransferReceipt, TransferRequest, TRANSFER_CHANNEL,
};
use crate::storage::{Repository, Unit};

use super::unit_of_work::{deadline_after, settle, with_deadline};
use super::{AccountLedger, LedgerError};

/// Owns the movement log and turns postings and transfers into all-or-nothing
/// units of work.
///
/// Every balance change made here is paired with exactly one movement written
/// in the same unit. Any failure rolls the whole unit back before the error is
/// returned, so callers never observe a movement without its balance change or
/// one leg of a transfer without the other.
#[derive(Clone)]
pub struct TransactionEngine {
    repo: Repository,
    accounts: AccountLedger,
    unit_timeout: Option<Duration>,
}

impl TransactionEngine {
    pub fn new(repo: Repository, accounts: AccountLedger, unit_timeout: Option<Duration>) -> Self {
        Self {
            repo,
            accounts,
            unit_timeout,
        }
    }

    // ========================
    // Postings
    // ========================

    /// Post a single DEBIT or CREDIT to one account.
    pub async fn post(&self, request: PostingRequest) -> Result<Movement, LedgerError> {
        if request.amount <= 0 {
            return Err(LedgerError::Validation(
                "Amount must be positive".to_string(),
            ));
        }

        let outcome = async {
            let deadline = deadline_after(self.unit_timeout);
            let mut unit = self.repo.begin_unit().await?;
            let result = with_deadline(deadline, self.post_in_unit(&mut unit, &request)).await;
            settle(unit, result).await
        }
        .await;

        match &outcome {
            Ok(movement) => tracing::info!(
                movement_id = %movement.id,
                account_id = %movement.account_id,
                movement_type = %movement.movement_type,
                amount = movement.amount,
                "posting committed"
            ),
            Err(err) => tracing::warn!(
                account_id = %request.account_id,
                movement_type = %request.movement_type,
                amount = request.amount,
                kind = err.kind(),
                "posting rolled back"
            ),
        }
        outcome
    }

    async fn post_in_unit(
        &self,
        unit: &mut Unit,
        request: &PostingRequest,
    ) -> Result<Movement, LedgerError> {
        let account = unit
            .lock_account_for_update(request.account_id)
            .await?
            .ok_or_else(|| LedgerError::account_not_found(request.account_id))?;

        if !account.status.is_active() {
            return Err(LedgerError::AccountClosed(account.id));
        }

        if request.movement_type == MovementType::Debit {
            ensure_funds(&account, request.amount)?;
        }

        let delta = request.movement_type.signed(request.amount);
        ensure_representable(&account, delta)?;

        let movement = unit
            .insert_movement(&NewMovement {
                account_id: account.id,
                movement_type: request.movement_type,
                amount: request.amount,
                description: request.description.as_deref(),
                channel: request.channel.as_deref(),
            })
            .await?;

        self.accounts.adjust_balance(unit, account.id, delta).await?;
        Ok(movement)
    }

    // ========================
    // Transfers
    // ========================

    /// Move `amount` from one account to another: one DEBIT on the source, one
    /// CREDIT on the destination, both tagged with the transfer channel.
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, LedgerError> {
        if request.amount <= 0 {
            return Err(LedgerError::Validation(
                "Amount must be positive".to_string(),
            ));
        }
        if request.from == request.to {
            return Err(LedgerError::Validation(
                "Source and destination accounts must differ".to_string(),
            ));
        }

        let outcome = async {
            let deadline = deadline_after(self.unit_timeout);
            let mut unit = self.repo.begin_unit().await?;
            let result =
                with_deadline(deadline, self.transfer_in_unit(&mut unit, &request)).await;
            settle(unit, result).await
        }
        .await;

        match &outcome {
            Ok(receipt) => tracing::info!(
                from = %request.from,
                to = %request.to,
                amount = request.amount,
                debit_id = %receipt.debit.id,
                credit_id = %receipt.credit.id,
                "transfer committed"
            ),
            Err(err) => tracing::warn!(
                from = %request.from,
                to = %request.to,
                amount = request.amount,
                kind = err.kind(),
                "transfer rolled back"
            ),
        }
        outcome
    }

    async fn transfer_in_unit(
        &self,
        unit: &mut Unit,
        request: &TransferRequest,
    ) -> Result<TransferReceipt, LedgerError> {
        // Both rows are locked up front in id order, never in from/to order.
        let order = lock_order(request.from, request.to);
        let locked = unit.lock_accounts_for_update(&order).await?;
        let find = |id: AccountId| locked.iter().flatten().find(|a| a.id == id).copied();

        let source = find(request.from).ok_or_else(|| LedgerError::account_not_found(request.from))?;
        if !source.status.is_active() {
            return Err(LedgerError::AccountClosed(source.id));
        }
        ensure_funds(&source, request.amount)?;

        let destination =
            find(request.to).ok_or_else(|| LedgerError::account_not_found(request.to))?;
        if !destination.status.is_active() {
            return Err(LedgerError::AccountClosed(destination.id));
        }
        ensure_representable(&destination, request.amount)?;

        let description = request.description.as_deref();
        let debit = unit
            .insert_movement(&NewMovement {
                account_id: source.id,
                movement_type: MovementType::Debit,
                amount: request.amount,
                description,
                channel: Some(TRANSFER_CHANNEL),
            })
            .await?;
        let credit = unit
            .insert_movement(&NewMovement {
                account_id: destination.id,
                movement_type: MovementType::Credit,
                amount: request.amount,
                description,
                channel: Some(TRANSFER_CHANNEL),
            })
            .await?;

        self.accounts
            .adjust_balance(unit, source.id, -request.amount)
            .await?;
        self.accounts
            .adjust_balance(unit, destination.id, request.amount)
            .await?;

        Ok(TransferReceipt { debit, credit })
    }

    // ========================
    // Reads
    // ========================

    pub async fn get(&self, movement_id: MovementId) -> Result<Movement, LedgerError> {
        self.repo
            .get_movement(movement_id)
            .await?
            .ok_or_else(|| LedgerError::movement_not_found(movement_id))
    }

    /// One page of an account's movements, newest first.
    pub async fn list_by_account(
        &self,
        account_id: AccountId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Movement>, LedgerError> {
        if limit == 0 {
            return Err(LedgerError::Validation(
                "Limit must be at least 1".to_string(),
            ));
        }

        // Distinguish an unknown account from one without movements.
        self.accounts.get(account_id).await?;

        Ok(self
            .repo
            .list_movements_for_account(account_id, limit, offset)
            .await?)
    }
}

fn ensure_funds(account: &LockedAccount, amount: Cents) -> Result<(), LedgerError> {
    if amount > account.balance {
        return Err(LedgerError::InsufficientFunds {
            account: account.id,
            balance: account.balance,
            required: amount,
        });
    }
    Ok(())
}

fn ensure_representable(account: &LockedAccount, delta: Cents) -> Result<(), LedgerError> {
    checked_apply(account.balance, delta).map(|_| ()).ok_or_else(|| {
        LedgerError::Validation(format!(
            "Posting would overflow the balance of account {}",
            account.id
        ))
    })
}
