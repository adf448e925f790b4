use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::domain::{
    Account, AccountId, AccountStatus, AccountType, Cents, CustomerId, Movement, MovementId,
    MovementType, WideCents,
};

use super::locks::RowLocks;
use super::unit::Unit;
use super::MIGRATION_001_INITIAL;

const ACCOUNT_COLUMNS: &str = "account_id, customer_id, branch_id, account_type, account_number, opening_balance_cents, balance_cents, status, opened_at, closed_at";

/// Movements read per round trip when summing the log.
const TOTALS_BATCH: i64 = 10_000;

const MOVEMENT_COLUMNS: &str =
    "movement_id, sequence, account_id, movement_type, amount_cents, description, channel, created_at";

/// Per-account view of the movement log, for integrity checks.
#[derive(Debug, Clone)]
pub struct AccountLedgerTotals {
    pub account_id: AccountId,
    pub account_number: String,
    pub opening_balance: Cents,
    pub balance: Cents,
    pub movement_total: WideCents,
    pub movement_count: i64,
}

/// Statistics for ledger integrity verification.
#[derive(Debug, Clone)]
pub struct IntegrityStats {
    pub account_count: i64,
    pub movement_count: i64,
    pub invalid_amounts: i64,
    pub orphan_movements: i64,
}

/// Persistent store for accounts and movements.
///
/// Plain reads and account inserts run directly on the pool. Every balance
/// change goes through a [`Unit`] obtained from [`Repository::begin_unit`].
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    locks: RowLocks,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: RowLocks::new(),
        }
    }

    /// Connect to the database named by `config.database_url`.
    /// Creates the database file if it doesn't exist.
    pub async fn connect(config: &LedgerConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .with_context(|| format!("Invalid database URL '{}'", config.database_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(config: &LedgerConfig) -> Result<Self> {
        let repo = Self::connect(config).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Start an atomic unit of work.
    pub async fn begin_unit(&self) -> Result<Unit> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin unit of work")?;
        Ok(Unit::new(tx, self.locks.clone()))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ========================
    // Account operations
    // ========================

    /// Save a new account.
    pub async fn insert_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (account_id, customer_id, branch_id, account_type, account_number, opening_balance_cents, balance_cents, status, opened_at, closed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(account.customer_id.to_string())
        .bind(account.branch_id.to_string())
        .bind(account.account_type.as_str())
        .bind(&account.number)
        .bind(account.opening_balance)
        .bind(account.balance)
        .bind(account.status.as_str())
        .bind(encode_timestamp(account.opened_at))
        .bind(account.closed_at.map(encode_timestamp))
        .execute(&self.pool)
        .await
        .context("Failed to save account")?;
        Ok(())
    }

    /// Get an account by ID.
    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE account_id = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    /// Get an account by its account number.
    pub async fn get_account_by_number(&self, number: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE account_number = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(number)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account by number")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    /// List a customer's accounts, most recently opened first.
    pub async fn list_accounts_by_customer(&self, customer_id: CustomerId) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE customer_id = ? ORDER BY opened_at DESC, rowid DESC",
            ACCOUNT_COLUMNS
        ))
        .bind(customer_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let account_type: String = row.get("account_type");
        let status: String = row.get("status");
        let opened_at: String = row.get("opened_at");
        let closed_at: Option<String> = row.get("closed_at");

        Ok(Account {
            id: parse_uuid(row, "account_id")?,
            customer_id: parse_uuid(row, "customer_id")?,
            branch_id: parse_uuid(row, "branch_id")?,
            account_type: account_type.parse::<AccountType>()?,
            number: row.get("account_number"),
            opening_balance: row.get("opening_balance_cents"),
            balance: row.get("balance_cents"),
            status: status.parse::<AccountStatus>()?,
            opened_at: decode_timestamp(&opened_at).context("Invalid opened_at timestamp")?,
            closed_at: closed_at
                .as_deref()
                .map(decode_timestamp)
                .transpose()
                .context("Invalid closed_at timestamp")?,
        })
    }

    // ========================
    // Movement operations
    // ========================

    /// Get a movement by ID.
    pub async fn get_movement(&self, id: MovementId) -> Result<Option<Movement>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM movements WHERE movement_id = ?",
            MOVEMENT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch movement")?;

        row.as_ref().map(Self::row_to_movement).transpose()
    }

    /// List one page of an account's movements, newest first.
    pub async fn list_movements_for_account(
        &self,
        account_id: AccountId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Movement>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM movements WHERE account_id = ? ORDER BY sequence DESC LIMIT ? OFFSET ?",
            MOVEMENT_COLUMNS
        ))
        .bind(account_id.to_string())
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list movements for account")?;

        rows.iter().map(Self::row_to_movement).collect()
    }

    /// Every account with the signed sum and count of its movements.
    ///
    /// Sums are taken in Rust over one read snapshot, in batches ordered by
    /// sequence, so they never overflow the store's 64-bit integers.
    pub async fn movement_totals(&self) -> Result<Vec<AccountLedgerTotals>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin integrity read")?;

        let mut sums: HashMap<AccountId, (WideCents, i64)> = HashMap::new();
        let mut after: i64 = 0;
        loop {
            let rows = sqlx::query(
                r#"
                SELECT sequence, account_id, movement_type, amount_cents
                FROM movements
                WHERE sequence > ?
                ORDER BY sequence
                LIMIT ?
                "#,
            )
            .bind(after)
            .bind(TOTALS_BATCH)
            .fetch_all(&mut *tx)
            .await
            .context("Failed to read movements for totals")?;

            let Some(last) = rows.last() else {
                break;
            };
            after = last.get("sequence");

            for row in &rows {
                let movement_type: String = row.get("movement_type");
                let amount: Cents = row.get("amount_cents");
                let signed = movement_type.parse::<MovementType>()?.signed(amount);

                let entry = sums.entry(parse_uuid(row, "account_id")?).or_default();
                entry.0 += WideCents::from(signed);
                entry.1 += 1;
            }
        }

        let rows = sqlx::query(
            r#"
            SELECT account_id, account_number, opening_balance_cents, balance_cents
            FROM accounts
            ORDER BY account_number
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .context("Failed to read accounts for totals")?;

        tx.rollback()
            .await
            .context("Failed to end integrity read")?;

        rows.iter()
            .map(|row| {
                let account_id = parse_uuid(row, "account_id")?;
                let (movement_total, movement_count) =
                    sums.get(&account_id).copied().unwrap_or_default();
                Ok(AccountLedgerTotals {
                    account_id,
                    account_number: row.get("account_number"),
                    opening_balance: row.get("opening_balance_cents"),
                    balance: row.get("balance_cents"),
                    movement_total,
                    movement_count,
                })
            })
            .collect()
    }

    /// Get statistics for integrity checking.
    pub async fn get_integrity_stats(&self) -> Result<IntegrityStats> {
        let account_count: i64 = sqlx::query("SELECT COUNT(*) as count FROM accounts")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let movement_count: i64 = sqlx::query("SELECT COUNT(*) as count FROM movements")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let invalid_amounts: i64 =
            sqlx::query("SELECT COUNT(*) as count FROM movements WHERE amount_cents <= 0")
                .fetch_one(&self.pool)
                .await?
                .get("count");

        let orphan_movements: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM movements m
            WHERE NOT EXISTS (SELECT 1 FROM accounts a WHERE a.account_id = m.account_id)
            "#,
        )
        .fetch_one(&self.pool)
        .await?
        .get("count");

        Ok(IntegrityStats {
            account_count,
            movement_count,
            invalid_amounts,
            orphan_movements,
        })
    }

    fn row_to_movement(row: &SqliteRow) -> Result<Movement> {
        let movement_type: String = row.get("movement_type");
        let created_at: String = row.get("created_at");

        Ok(Movement {
            id: parse_uuid(row, "movement_id")?,
            sequence: row.get("sequence"),
            account_id: parse_uuid(row, "account_id")?,
            movement_type: movement_type.parse::<MovementType>()?,
            amount: row.get("amount_cents"),
            description: row.get("description"),
            channel: row.get("channel"),
            created_at: decode_timestamp(&created_at).context("Invalid created_at timestamp")?,
        })
    }
}

/// True when `err` is (or wraps) a unique-constraint violation from the store.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .is_some_and(|db| db.is_unique_violation())
    })
}

/// Current time at the precision the store keeps.
pub fn store_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Timestamps are stored with a fixed microsecond width so that text order in
/// SQL matches chronological order.
pub(crate) fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.get(column);
    Uuid::parse_str(&raw).with_context(|| format!("Invalid {}: '{}'", column, raw))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_timestamp_encoding_sorts_chronologically() {
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
            + chrono::Duration::milliseconds(500);
        let later = earlier + chrono::Duration::microseconds(450_001);

        let (a, b) = (encode_timestamp(earlier), encode_timestamp(later));
        assert!(a < b, "{} should sort before {}", a, b);
        assert_eq!(decode_timestamp(&a).unwrap(), earlier);
    }
}
