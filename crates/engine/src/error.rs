//! Error types for the migration engine
//!
//! Every failure carries the operation it happened in. Failures inside an
//! executor are additionally wrapped with the migration version, direction
//! and execution mode, so the caller receives one chain it can print as-is
//! or classify with [`MigrateError::kind`].

use crate::config::ConfigError;
use crate::migrations::{Direction, ExecutionMode};
use thiserror::Error;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Coarse classification of a failure, independent of how deeply it was wrapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed registry or configuration, detected before touching the database
    Validation,
    /// Ledger, connection, transaction or deadline failure
    Connectivity,
    /// The ledger moved between planning and executing a migration
    ConcurrencyConflict,
    /// The migration's own up/down logic failed
    ActionFailure,
}

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("invalid migration(s): {}", .findings.join("; "))]
    Validation { findings: Vec<String> },

    #[error("no migrations provided")]
    NoMigrations,

    #[error("{message}")]
    InvalidArguments { message: String },

    #[error("database error: {message}")]
    Database { message: String },

    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("deadline exceeded while trying to {operation}")]
    DeadlineExceeded { operation: String },

    #[error("failed to {operation}: {source}")]
    Ledger {
        operation: String,
        #[source]
        source: Box<MigrateError>,
    },

    #[error(
        "database version changed while applying migration {direction}: \
         migration version {version} {} current DB version {current}",
        .direction.conflict_operator()
    )]
    ConcurrencyConflict {
        version: i64,
        direction: Direction,
        current: i64,
    },

    #[error("failed to apply migration.{direction} version {version}: {source}")]
    Action {
        version: i64,
        direction: Direction,
        #[source]
        source: Box<MigrateError>,
    },

    #[error("failed to begin transaction: {source}")]
    BeginTransaction {
        #[source]
        source: Box<MigrateError>,
    },

    #[error("failed to commit transaction: {source}")]
    Commit {
        #[source]
        source: Box<MigrateError>,
    },

    #[error("execute {mode}: {source}")]
    Execution {
        version: i64,
        direction: Direction,
        mode: ExecutionMode,
        #[source]
        source: Box<MigrateError>,
    },

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// Create a database error from a driver message
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Wrap a failure with the ledger operation it happened in
    pub fn ledger(operation: impl Into<String>, source: MigrateError) -> Self {
        Self::Ledger {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Classify the error into the engine's failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrateError::Execution { source, .. } => source.kind(),
            MigrateError::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            MigrateError::Action { .. } => ErrorKind::ActionFailure,
            MigrateError::Validation { .. }
            | MigrateError::NoMigrations
            | MigrateError::InvalidArguments { .. }
            | MigrateError::Configuration(_) => ErrorKind::Validation,
            MigrateError::Database { .. }
            | MigrateError::Connection { .. }
            | MigrateError::DeadlineExceeded { .. }
            | MigrateError::Ledger { .. }
            | MigrateError::BeginTransaction { .. }
            | MigrateError::Commit { .. }
            | MigrateError::Io(_) => ErrorKind::Connectivity,
        }
    }

    /// Follow the wrapped sources down to the innermost engine error
    pub fn root_cause(&self) -> &MigrateError {
        match self {
            MigrateError::Ledger { source, .. }
            | MigrateError::Action { source, .. }
            | MigrateError::BeginTransaction { source }
            | MigrateError::Commit { source }
            | MigrateError::Execution { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Check whether this error (or anything it wraps) is a version guard abort
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self.root_cause(), MigrateError::ConcurrencyConflict { .. })
    }

    /// Check whether this error (or anything it wraps) is an expired deadline
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.root_cause(), MigrateError::DeadlineExceeded { .. })
    }
}
