pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod storage;
pub mod telemetry;

pub use application::{AccountLedger, LedgerError, LedgerService, TransactionEngine};
pub use config::{ClosePolicy, LedgerConfig};
pub use domain::*;
pub use storage::Repository;
