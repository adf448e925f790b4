mod locks;
mod repository;
mod unit;

pub use locks::{RowGuard, RowLocks};
pub use repository::*;
pub use unit::Unit;

/// SQL migration for the initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");
