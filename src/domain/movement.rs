use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Cents, UnknownVariant};

pub type MovementId = Uuid;

/// Channel tag carried by both legs of a transfer.
pub const TRANSFER_CHANNEL: &str = "TRANSFER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType {
    /// Money leaves the account (balance decreases)
    Debit,
    /// Money enters the account (balance increases)
    Credit,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Debit => "DEBIT",
            MovementType::Credit => "CREDIT",
        }
    }

    /// The balance delta a movement of this type and amount causes.
    pub fn signed(&self, amount: Cents) -> Cents {
        match self {
            MovementType::Debit => -amount,
            MovementType::Credit => amount,
        }
    }
}

impl FromStr for MovementType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DEBIT" => Ok(MovementType::Debit),
            "CREDIT" => Ok(MovementType::Credit),
            _ => Err(UnknownVariant::new("movement type", s)),
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable record of one balance change. Movements are append-only:
/// corrections are new movements, never edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    /// Insertion order assigned by the store
    pub sequence: i64,
    pub account_id: AccountId,
    pub movement_type: MovementType,
    /// Always strictly positive; the direction comes from `movement_type`
    pub amount: Cents,
    pub description: Option<String>,
    pub channel: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    pub fn signed_amount(&self) -> Cents {
        self.movement_type.signed(self.amount)
    }
}

/// A movement about to be written inside a unit of work.
#[derive(Debug, Clone)]
pub struct NewMovement<'a> {
    pub account_id: AccountId,
    pub movement_type: MovementType,
    pub amount: Cents,
    pub description: Option<&'a str>,
    pub channel: Option<&'a str>,
}

/// A single posting against one account.
#[derive(Debug, Clone)]
pub struct PostingRequest {
    pub account_id: AccountId,
    pub movement_type: MovementType,
    pub amount: Cents,
    pub description: Option<String>,
    pub channel: Option<String>,
}

impl PostingRequest {
    pub fn new(account_id: AccountId, movement_type: MovementType, amount: Cents) -> Self {
        Self {
            account_id,
            movement_type,
            amount,
            description: None,
            channel: None,
        }
    }

    pub fn debit(account_id: AccountId, amount: Cents) -> Self {
        Self::new(account_id, MovementType::Debit, amount)
    }

    pub fn credit(account_id: AccountId, amount: Cents) -> Self {
        Self::new(account_id, MovementType::Credit, amount)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }
}

/// Money moved from one account to another as a single unit.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Cents,
    pub description: Option<String>,
}

impl TransferRequest {
    pub fn new(from: AccountId, to: AccountId, amount: Cents) -> Self {
        Self {
            from,
            to,
            amount,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The two legs written by a committed transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReceipt {
    pub debit: Movement,
    pub credit: Movement,
}
