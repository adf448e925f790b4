// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use bankledger::application::{LedgerError, LedgerService};
use bankledger::config::LedgerConfig;
use bankledger::domain::{Account, AccountType, Cents, NewAccount};
use tempfile::TempDir;
use uuid::Uuid;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    test_service_with(|config| config).await
}

/// Like `test_service`, with a chance to adjust the config first
pub async fn test_service_with(
    adjust: impl FnOnce(LedgerConfig) -> LedgerConfig,
) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let config = adjust(LedgerConfig::for_path(db_path.to_str().unwrap()));
    let service = LedgerService::init(config).await?;
    Ok((service, temp_dir))
}

/// Test fixture: one customer banking at one branch
pub struct Customer {
    pub id: Uuid,
    pub branch: Uuid,
}

impl Customer {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            branch: Uuid::new_v4(),
        }
    }

    pub fn account(&self, number: &str, initial_balance: Cents) -> NewAccount {
        NewAccount::new(self.id, self.branch, AccountType::Checking, number)
            .with_initial_balance(initial_balance)
    }

    /// Open a checking account with the given opening balance
    pub async fn open(
        &self,
        service: &LedgerService,
        number: &str,
        initial_balance: Cents,
    ) -> Result<Account, LedgerError> {
        service
            .accounts()
            .open(self.account(number, initial_balance))
            .await
    }
}

/// Current balance of an account, read back from the store
pub async fn balance(service: &LedgerService, account: &Account) -> Result<Cents> {
    Ok(service.accounts().get(account.id).await?.balance)
}

/// Number of movements recorded against an account
pub async fn movement_count(service: &LedgerService, account: &Account) -> Result<usize> {
    Ok(service
        .engine()
        .list_by_account(account.id, 1000, 0)
        .await?
        .len())
}
