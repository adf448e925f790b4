// Application layer - the account ledger, the transaction engine and the
// service that wires them to a store.

mod accounts;
mod engine;
pub mod error;
mod service;
mod unit_of_work;

pub use accounts::AccountLedger;
pub use engine::TransactionEngine;
pub use error::*;
pub use service::{IntegrityReport, LedgerService};
