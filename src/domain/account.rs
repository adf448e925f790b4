use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type AccountId = Uuid;
pub type CustomerId = Uuid;
pub type BranchId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Savings,
    Checking,
    Business,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Savings => "savings",
            AccountType::Checking => "checking",
            AccountType::Business => "business",
        }
    }
}

impl FromStr for AccountType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "savings" => Ok(AccountType::Savings),
            "checking" => Ok(AccountType::Checking),
            "business" => Ok(AccountType::Business),
            _ => Err(UnknownVariant::new("account type", s)),
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    Active,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Closed => "CLOSED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

impl FromStr for AccountStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(AccountStatus::Active),
            "CLOSED" => Ok(AccountStatus::Closed),
            _ => Err(UnknownVariant::new("account status", s)),
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returned when a stored or user-supplied enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub customer_id: CustomerId,
    pub branch_id: BranchId,
    pub account_type: AccountType,
    /// Human-facing identifier, unique across the ledger
    pub number: String,
    /// Balance the account was opened with
    pub opening_balance: Cents,
    pub balance: Cents,
    pub status: AccountStatus,
    pub opened_at: DateTime<Utc>,
    /// Set exactly once, together with the transition to CLOSED
    pub closed_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Input for opening an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub customer_id: CustomerId,
    pub branch_id: BranchId,
    pub account_type: AccountType,
    pub number: String,
    pub initial_balance: Cents,
}

impl NewAccount {
    pub fn new(
        customer_id: CustomerId,
        branch_id: BranchId,
        account_type: AccountType,
        number: impl Into<String>,
    ) -> Self {
        Self {
            customer_id,
            branch_id,
            account_type,
            number: number.into(),
            initial_balance: 0,
        }
    }

    pub fn with_initial_balance(mut self, initial_balance: Cents) -> Self {
        self.initial_balance = initial_balance;
        self
    }

    /// Check the fields a new account needs before it reaches the store.
    pub fn validate(&self) -> Result<(), String> {
        if self.customer_id.is_nil() {
            return Err("customer id is required".to_string());
        }
        if self.branch_id.is_nil() {
            return Err("branch id is required".to_string());
        }
        if self.number.trim().is_empty() {
            return Err("account number is required".to_string());
        }
        if self.number.trim() != self.number {
            return Err("account number must not have surrounding whitespace".to_string());
        }
        if self.initial_balance < 0 {
            return Err("initial balance must not be negative".to_string());
        }
        Ok(())
    }

    /// Build the stored account. The id and opening timestamp are assigned here.
    pub fn into_account(self, opened_at: DateTime<Utc>) -> Account {
        Account {
            id: Uuid::new_v4(),
            customer_id: self.customer_id,
            branch_id: self.branch_id,
            account_type: self.account_type,
            number: self.number,
            opening_balance: self.initial_balance,
            balance: self.initial_balance,
            status: AccountStatus::Active,
            opened_at,
            closed_at: None,
        }
    }
}

/// Snapshot of an account read under its row lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockedAccount {
    pub id: AccountId,
    pub balance: Cents,
    pub status: AccountStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NewAccount {
        NewAccount::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            AccountType::Checking,
            "ACC-0001",
        )
    }

    #[test]
    fn test_account_type_roundtrip() {
        for at in [
            AccountType::Savings,
            AccountType::Checking,
            AccountType::Business,
        ] {
            assert_eq!(at.as_str().parse::<AccountType>(), Ok(at));
        }
        assert_eq!("  SAVINGS ".parse::<AccountType>(), Ok(AccountType::Savings));
        assert!("loan".parse::<AccountType>().is_err());
    }

    #[test]
    fn test_account_status_is_case_sensitive() {
        assert_eq!("CLOSED".parse::<AccountStatus>(), Ok(AccountStatus::Closed));
        assert!("closed".parse::<AccountStatus>().is_err());
    }

    #[test]
    fn test_new_account_opens_active() {
        let account = sample().with_initial_balance(2500).into_account(Utc::now());
        assert_eq!(account.status, AccountStatus::Active);
        assert_eq!(account.balance, 2500);
        assert_eq!(account.opening_balance, 2500);
        assert!(account.closed_at.is_none());
    }

    #[test]
    fn test_validate_rejects_negative_initial_balance() {
        assert!(sample().with_initial_balance(-1).validate().is_err());
        assert!(sample().with_initial_balance(0).validate().is_ok());
    }

    #[test]
    fn test_validate_requires_number_and_owners() {
        let mut missing_number = sample();
        missing_number.number = "   ".into();
        assert!(missing_number.validate().is_err());

        let mut padded = sample();
        padded.number = " ACC-1".into();
        assert!(padded.validate().is_err());

        let mut missing_customer = sample();
        missing_customer.customer_id = Uuid::nil();
        assert!(missing_customer.validate().is_err());
    }
}
