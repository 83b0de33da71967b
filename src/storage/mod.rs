//! Storage module: SQLite table store, typed operation logs and the job ledger.

pub mod database;
pub mod ledger;
pub mod operation_log;

pub use database::Database;
pub use ledger::{Ledger, LedgerEntry, LedgerRecord};
pub use operation_log::{LogRecord, LogStream, OperationLog};
