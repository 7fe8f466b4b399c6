//! # schemig: versioned schema migrations
//!
//! Applies and rolls back an ordered set of versioned migrations, tracking
//! what has been applied in a ledger table. Each migration runs either inside
//! a transaction, atomically with its ledger update, or directly on the
//! connection for statements that cannot run in one. Right before a migration
//! runs, the ledger is read again and the migration is refused if another
//! process moved it in the meantime.
//!
//! The engine talks to the database only through the capability traits in
//! [`backends`]; [`backends::postgres`] implements them over `sqlx`.

pub mod backends;
pub mod config;
pub mod deadline;
pub mod error;
pub mod migrations;
pub mod tool;
pub mod transaction;

#[cfg(test)]
mod testing;


// Re-export core traits and types
pub use backends::{
    DatabaseBackend, DatabaseConnection, DatabaseRow, DatabaseRowExt, DatabaseTransaction,
    DatabaseValue, ExecResult, PostgresBackend, QueryExec,
};
pub use config::{ConfigError, MigrateConfig};
pub use deadline::Deadline;
pub use error::{ErrorKind, MigrateError, MigrateResult};
pub use migrations::{
    run_down, run_status, run_up, run_version, ConnAction, Direction, ExecutionMode, Migration,
    MigrationContext, MigrationMode, MigrationRegistry, MigrationRollback, MigrationRunner,
    NoTxUpDown, TxAction, TxUpDown, UpDown,
};
pub use tool::{MigrationTool, ToolCommand};
pub use transaction::{IsolationLevel, TransactionOptions};
