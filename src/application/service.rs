use serde::Serialize;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::domain::{format_cents, Account, AccountId, BalanceDrift, Movement, WideCents};
use crate::storage::Repository;

use super::{AccountLedger, LedgerError, TransactionEngine};

/// Application service bundling the account ledger and the transaction engine
/// over one store. This is the interface any boundary (CLI, API, ...) talks to.
pub struct LedgerService {
    repo: Repository,
    accounts: AccountLedger,
    engine: TransactionEngine,
    config: LedgerConfig,
}

/// Result of verifying that balances agree with the movement log.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub account_count: i64,
    pub movement_count: i64,
    /// Sum of every account's recorded balance
    pub total_balance: WideCents,
    /// Sum of opening balances plus the signed sum of all movements
    pub expected_total: WideCents,
    pub drifted: Vec<BalanceDrift>,
    pub issues: Vec<String>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

impl LedgerService {
    pub fn new(repo: Repository, config: LedgerConfig) -> Self {
        let accounts = AccountLedger::new(repo.clone(), &config);
        let engine = TransactionEngine::new(repo.clone(), accounts.clone(), config.unit_timeout);
        Self {
            repo,
            accounts,
            engine,
            config,
        }
    }

    /// Connect to the configured database, creating and migrating it if needed.
    pub async fn init(config: LedgerConfig) -> Result<Self, LedgerError> {
        let repo = Repository::init(&config).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database without running migrations.
    pub async fn connect(config: LedgerConfig) -> Result<Self, LedgerError> {
        let repo = Repository::connect(&config).await?;
        Ok(Self::new(repo, config))
    }

    pub fn accounts(&self) -> &AccountLedger {
        &self.accounts
    }

    pub fn engine(&self) -> &TransactionEngine {
        &self.engine
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Find an account by id or, failing that, by account number.
    pub async fn resolve_account(&self, reference: &str) -> Result<Account, LedgerError> {
        match Uuid::parse_str(reference) {
            Ok(id) => match self.accounts.get(id).await {
                Err(LedgerError::NotFound { .. }) => self.accounts.get_by_number(reference).await,
                other => other,
            },
            Err(_) => self.accounts.get_by_number(reference).await,
        }
    }

    /// Movements of an account, newest first, using the configured page size
    /// when `limit` is not given.
    pub async fn movements(
        &self,
        account_id: AccountId,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<Vec<Movement>, LedgerError> {
        let limit = limit.unwrap_or(self.config.page_size);
        self.engine.list_by_account(account_id, limit, offset).await
    }

    /// Check that every account's balance equals its opening balance plus the
    /// signed sum of its movements, and that the log itself is well formed.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        let stats = self.repo.get_integrity_stats().await?;
        let totals = self.repo.movement_totals().await?;

        let mut issues = Vec::new();
        let mut drifted = Vec::new();
        let mut total_balance: WideCents = 0;
        let mut expected_total: WideCents = 0;

        for account in &totals {
            let expected = WideCents::from(account.opening_balance) + account.movement_total;
            total_balance += WideCents::from(account.balance);
            expected_total += expected;

            if expected != WideCents::from(account.balance) {
                issues.push(format!(
                    "Account {} records {} but its movements add up to {}",
                    account.account_number,
                    format_cents(account.balance),
                    format_cents(expected)
                ));
                drifted.push(BalanceDrift {
                    account_id: account.account_id,
                    account_number: account.account_number.clone(),
                    recorded: account.balance,
                    expected,
                });
            }
        }

        if stats.invalid_amounts > 0 {
            issues.push(format!(
                "{} movement(s) with a non-positive amount",
                stats.invalid_amounts
            ));
        }
        if stats.orphan_movements > 0 {
            issues.push(format!(
                "{} movement(s) reference a missing account",
                stats.orphan_movements
            ));
        }

        Ok(IntegrityReport {
            account_count: stats.account_count,
            movement_count: stats.movement_count,
            total_balance,
            expected_total,
            drifted,
            issues,
        })
    }
}
