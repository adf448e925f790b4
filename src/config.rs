//! Runtime configuration for the ledger.
//!
//! Values come from `LEDGER_*` environment variables; anything unset falls back
//! to [`LedgerConfig::default`]. A variable that is set but malformed is an
//! error rather than a silent default.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

pub const ENV_DATABASE_URL: &str = "LEDGER_DATABASE_URL";
pub const ENV_MAX_CONNECTIONS: &str = "LEDGER_MAX_CONNECTIONS";
pub const ENV_BUSY_TIMEOUT_MS: &str = "LEDGER_BUSY_TIMEOUT_MS";
pub const ENV_UNIT_TIMEOUT_MS: &str = "LEDGER_UNIT_TIMEOUT_MS";
pub const ENV_CLOSE_POLICY: &str = "LEDGER_CLOSE_POLICY";
pub const ENV_PAGE_SIZE: &str = "LEDGER_PAGE_SIZE";

/// What closing an account requires of its balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClosePolicy {
    /// Close regardless of the remaining balance.
    #[default]
    AllowNonZeroBalance,
    /// Refuse to close until the balance is exactly zero.
    RequireZeroBalance,
}

impl ClosePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClosePolicy::AllowNonZeroBalance => "allow-nonzero",
            ClosePolicy::RequireZeroBalance => "require-zero",
        }
    }
}

impl FromStr for ClosePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow-nonzero" => Ok(ClosePolicy::AllowNonZeroBalance),
            "require-zero" => Ok(ClosePolicy::RequireZeroBalance),
            other => anyhow::bail!(
                "unknown close policy '{}' (expected allow-nonzero or require-zero)",
                other
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// sqlx SQLite URL, e.g. `sqlite:bankledger.db`
    pub database_url: String,
    pub max_connections: u32,
    /// How long a statement waits on SQLite's write lock before failing
    pub busy_timeout: Duration,
    /// Deadline for a whole unit of work, lock waits included
    pub unit_timeout: Option<Duration>,
    pub close_policy: ClosePolicy,
    /// Page size used when a movement listing does not ask for one
    pub page_size: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:bankledger.db".to_string(),
            max_connections: 8,
            busy_timeout: Duration::from_millis(5000),
            unit_timeout: None,
            close_policy: ClosePolicy::default(),
            page_size: 20,
        }
    }
}

impl LedgerConfig {
    /// Config for a SQLite file at `path`, everything else defaulted.
    pub fn for_path(path: &str) -> Self {
        Self {
            database_url: format!("sqlite:{}", path),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup; `from_env` uses the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let database_url = lookup(ENV_DATABASE_URL).unwrap_or(defaults.database_url);
        let max_connections = parse_var(&lookup, ENV_MAX_CONNECTIONS)?
            .unwrap_or(defaults.max_connections);
        let busy_timeout = parse_var::<u64>(&lookup, ENV_BUSY_TIMEOUT_MS)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.busy_timeout);
        let unit_timeout = parse_var::<u64>(&lookup, ENV_UNIT_TIMEOUT_MS)?
            .map(Duration::from_millis)
            .or(defaults.unit_timeout);
        let close_policy = match lookup(ENV_CLOSE_POLICY) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("Invalid {}", ENV_CLOSE_POLICY))?,
            None => defaults.close_policy,
        };
        let page_size = parse_var(&lookup, ENV_PAGE_SIZE)?.unwrap_or(defaults.page_size);

        if max_connections == 0 {
            anyhow::bail!("{} must be at least 1", ENV_MAX_CONNECTIONS);
        }
        if page_size == 0 {
            anyhow::bail!("{} must be at least 1", ENV_PAGE_SIZE);
        }

        Ok(Self {
            database_url,
            max_connections,
            busy_timeout,
            unit_timeout,
            close_policy,
            page_size,
        })
    }

    pub fn with_database_url(mut self, database_url: impl Into<String>) -> Self {
        self.database_url = database_url.into();
        self
    }

    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = Some(timeout);
        self
    }

    pub fn with_close_policy(mut self, policy: ClosePolicy) -> Self {
        self.close_policy = policy;
        self
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid {}: '{}'", key, raw))
        })
        .transpose()
}
