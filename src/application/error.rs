use thiserror::Error;

use crate::domain::{AccountId, Cents};
use crate::storage::is_unique_violation;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Account is not active: {0}")]
    AccountClosed(AccountId),

    #[error("Insufficient funds in account {account}: balance {balance}, required {required}")]
    InsufficientFunds {
        account: AccountId,
        balance: Cents,
        required: Cents,
    },

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Storage unavailable: {0:#}")]
    StorageUnavailable(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn account_not_found(id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity: "Account",
            id: id.to_string(),
        }
    }

    pub fn movement_not_found(id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity: "Movement",
            id: id.to_string(),
        }
    }

    /// Short, stable name of the error kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::NotFound { .. } => "not_found",
            LedgerError::Validation(_) => "validation",
            LedgerError::AccountClosed(_) => "account_closed",
            LedgerError::InsufficientFunds { .. } => "insufficient_funds",
            LedgerError::DuplicateEntry(_) => "duplicate_entry",
            LedgerError::InvalidState(_) => "invalid_state",
            LedgerError::StorageUnavailable(_) => "storage_unavailable",
        }
    }

    /// Map an insert failure, turning unique-constraint violations into
    /// `DuplicateEntry` with the given description.
    pub(crate) fn from_insert(err: anyhow::Error, what: impl Into<String>) -> Self {
        if is_unique_violation(&err) {
            LedgerError::DuplicateEntry(what.into())
        } else {
            LedgerError::StorageUnavailable(err)
        }
    }
}
