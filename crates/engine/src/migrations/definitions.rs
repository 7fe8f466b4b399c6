//! Migration Definitions - Core types and structures for migrations
//!
//! A [`Migration`] is a version plus a [`MigrationMode`]. The mode is a sum
//! type, so a definition is always either transactional or non-transactional;
//! what can still be wrong is a missing up or down action, which the registry
//! validator reports.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};

use crate::backends::{DatabaseConnection, DatabaseTransaction};
use crate::deadline::Deadline;
use crate::error::MigrateResult;

/// Highest version the ledger's `INTEGER` column can store
pub const MAX_VERSION: i64 = i32::MAX as i64;

/// Boxed, sendable future returned by migration actions
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Action run inside a transaction, with the transaction handle
pub type TxAction = Arc<
    dyn for<'a> Fn(MigrationContext, &'a mut dyn DatabaseTransaction) -> BoxFuture<'a, MigrateResult<()>>
        + Send
        + Sync,
>;

/// Action run directly against the shared connection
pub type ConnAction = Arc<
    dyn for<'a> Fn(MigrationContext, &'a mut dyn DatabaseConnection) -> BoxFuture<'a, MigrateResult<()>>
        + Send
        + Sync,
>;

/// Transactional up/down pair
pub type TxUpDown = UpDown<TxAction>;

/// Non-transactional up/down pair
pub type NoTxUpDown = UpDown<ConnAction>;

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Apply the migration
    Up,
    /// Roll the migration back
    Down,
}

impl Direction {
    /// Whether a candidate at `version` may still run when the ledger is at `current`
    pub fn permits(&self, version: i64, current: i64) -> bool {
        match self {
            Direction::Up => version > current,
            Direction::Down => version <= current,
        }
    }

    /// The comparison that made the guard abort, for error messages
    pub fn conflict_operator(&self) -> &'static str {
        match self {
            Direction::Up => "<=",
            Direction::Down => ">",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// How a migration's action and ledger mutation are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Inside one transaction, atomically with the ledger update
    Transactional,
    /// Directly on the connection, no atomicity
    NonTransactional,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Transactional => write!(f, "in TX"),
            ExecutionMode::NonTransactional => write!(f, "without TX"),
        }
    }
}

/// What an action gets to know about the step it runs in
#[derive(Debug, Clone, Copy)]
pub struct MigrationContext {
    pub version: i64,
    pub direction: Direction,
    /// Deadline the action runs under
    pub deadline: Deadline,
}

/// Up and down actions of one migration
pub struct UpDown<A> {
    pub up: Option<A>,
    pub down: Option<A>,
}

impl<A> UpDown<A> {
    pub fn new() -> Self {
        Self { up: None, down: None }
    }

    /// The action for `direction`, if defined
    pub fn get(&self, direction: Direction) -> Option<&A> {
        match direction {
            Direction::Up => self.up.as_ref(),
            Direction::Down => self.down.as_ref(),
        }
    }

    fn is_complete(&self) -> bool {
        self.up.is_some() && self.down.is_some()
    }
}

impl<A> Default for UpDown<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Clone> Clone for UpDown<A> {
    fn clone(&self) -> Self {
        Self {
            up: self.up.clone(),
            down: self.down.clone(),
        }
    }
}

impl UpDown<TxAction> {
    /// Set the up action
    pub fn up<F>(mut self, action: F) -> Self
    where
        F: for<'a> Fn(MigrationContext, &'a mut dyn DatabaseTransaction) -> BoxFuture<'a, MigrateResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.up = Some(Arc::new(action));
        self
    }

    /// Set the down action
    pub fn down<F>(mut self, action: F) -> Self
    where
        F: for<'a> Fn(MigrationContext, &'a mut dyn DatabaseTransaction) -> BoxFuture<'a, MigrateResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.down = Some(Arc::new(action));
        self
    }

    /// Up and down actions that each execute one static SQL statement
    pub fn from_sql(up_sql: &'static str, down_sql: &'static str) -> Self {
        Self::new()
            .up(move |_, tx| {
                Box::pin(async move {
                    tx.execute(up_sql, &[]).await?;
                    Ok(())
                })
            })
            .down(move |_, tx| {
                Box::pin(async move {
                    tx.execute(down_sql, &[]).await?;
                    Ok(())
                })
            })
    }
}

impl UpDown<ConnAction> {
    /// Set the up action
    pub fn up<F>(mut self, action: F) -> Self
    where
        F: for<'a> Fn(MigrationContext, &'a mut dyn DatabaseConnection) -> BoxFuture<'a, MigrateResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.up = Some(Arc::new(action));
        self
    }

    /// Set the down action
    pub fn down<F>(mut self, action: F) -> Self
    where
        F: for<'a> Fn(MigrationContext, &'a mut dyn DatabaseConnection) -> BoxFuture<'a, MigrateResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.down = Some(Arc::new(action));
        self
    }

    /// Up and down actions that each execute one static SQL statement
    pub fn from_sql(up_sql: &'static str, down_sql: &'static str) -> Self {
        Self::new()
            .up(move |_, conn| {
                Box::pin(async move {
                    conn.execute(up_sql, &[]).await?;
                    Ok(())
                })
            })
            .down(move |_, conn| {
                Box::pin(async move {
                    conn.execute(down_sql, &[]).await?;
                    Ok(())
                })
            })
    }
}

/// Execution mode together with its actions
#[derive(Clone)]
pub enum MigrationMode {
    Transactional(TxUpDown),
    NonTransactional(NoTxUpDown),
}

impl MigrationMode {
    pub fn execution_mode(&self) -> ExecutionMode {
        match self {
            MigrationMode::Transactional(_) => ExecutionMode::Transactional,
            MigrationMode::NonTransactional(_) => ExecutionMode::NonTransactional,
        }
    }

    fn is_complete(&self) -> bool {
        match self {
            MigrationMode::Transactional(actions) => actions.is_complete(),
            MigrationMode::NonTransactional(actions) => actions.is_complete(),
        }
    }

    fn has_action(&self, direction: Direction) -> bool {
        match self {
            MigrationMode::Transactional(actions) => actions.get(direction).is_some(),
            MigrationMode::NonTransactional(actions) => actions.get(direction).is_some(),
        }
    }
}

/// Represents a database migration
#[derive(Clone)]
pub struct Migration {
    /// Positive version, unique within a registry
    pub version: i64,
    pub mode: MigrationMode,
}

impl Migration {
    /// Migration whose actions run inside a transaction
    pub fn transactional(version: i64, actions: TxUpDown) -> Self {
        Self {
            version,
            mode: MigrationMode::Transactional(actions),
        }
    }

    /// Migration whose actions run directly on the connection, e.g. for
    /// `CREATE INDEX CONCURRENTLY`
    pub fn non_transactional(version: i64, actions: NoTxUpDown) -> Self {
        Self {
            version,
            mode: MigrationMode::NonTransactional(actions),
        }
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.mode.execution_mode()
    }

    /// Problems with this definition on its own; duplicates are checked by the registry
    pub fn findings(&self) -> Vec<String> {
        let mut findings = Vec::new();

        if self.version <= 0 {
            findings.push(format!("migration version must be > 0 (got {})", self.version));
        } else if self.version > MAX_VERSION {
            findings.push(format!(
                "migration version {} exceeds the ledger's INTEGER range (max {})",
                self.version, MAX_VERSION
            ));
        }

        if !self.mode.is_complete() {
            let label = match self.execution_mode() {
                ExecutionMode::Transactional => "transactional",
                ExecutionMode::NonTransactional => "non-transactional",
            };
            findings.push(format!(
                "migration {} ({}) must have both up and down actions defined",
                self.version, label
            ));
        }

        findings
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("mode", &self.execution_mode())
            .field("has_up", &self.mode.has_action(Direction::Up))
            .field("has_down", &self.mode.has_action(Direction::Down))
            .finish()
    }
}

/// One row of the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub version: i64,
    pub applied_at: DateTime<Utc>,
}

/// Result of running migrations
#[derive(Debug, Clone, Default)]
pub struct MigrationRunResult {
    /// Versions applied by this run, ascending
    pub applied_migrations: Vec<i64>,
    /// Registry entries skipped because the ledger already covered them
    pub skipped_count: usize,
    /// Total execution time
    pub execution_time: Duration,
}

impl MigrationRunResult {
    /// Number of migrations that were applied
    pub fn applied_count(&self) -> usize {
        self.applied_migrations.len()
    }
}

/// Result of rolling back a migration
#[derive(Debug, Clone, Default)]
pub struct RollbackResult {
    /// Version that was rolled back, if any qualified
    pub rolled_back: Option<i64>,
    /// Total execution time
    pub execution_time: Duration,
}

/// Migration status relative to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied,
}

impl MigrationStatus {
    /// Label used in the status table
    pub fn label(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "[ ] PENDING",
            MigrationStatus::Applied => "[x] APPLIED",
        }
    }
}

/// Status of one registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatusEntry {
    pub version: i64,
    pub status: MigrationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_permits() {
        assert!(Direction::Up.permits(3, 2));
        assert!(!Direction::Up.permits(2, 2));
        assert!(!Direction::Up.permits(1, 2));

        assert!(Direction::Down.permits(2, 2));
        assert!(Direction::Down.permits(1, 2));
        assert!(!Direction::Down.permits(3, 2));
    }

    #[test]
    fn test_display() {
        assert_eq!(Direction::Up.to_string(), "up");
        assert_eq!(Direction::Down.to_string(), "down");
        assert_eq!(ExecutionMode::Transactional.to_string(), "in TX");
        assert_eq!(ExecutionMode::NonTransactional.to_string(), "without TX");
    }

    #[test]
    fn test_complete_definition_has_no_findings() {
        let migration = Migration::transactional(
            1,
            TxUpDown::from_sql("CREATE TABLE users (id INT)", "DROP TABLE users"),
        );
        assert!(migration.findings().is_empty());
        assert_eq!(migration.execution_mode(), ExecutionMode::Transactional);
    }

    #[test]
    fn test_findings_report_every_problem() {
        let migration = Migration::non_transactional(
            0,
            NoTxUpDown::new().up(|_, _| Box::pin(async { Ok(()) })),
        );

        let findings = migration.findings();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0], "migration version must be > 0 (got 0)");
        assert_eq!(
            findings[1],
            "migration 0 (non-transactional) must have both up and down actions defined"
        );
    }

    #[test]
    fn test_debug_shows_shape() {
        let migration = Migration::transactional(
            4,
            TxUpDown::new().down(|_, _| Box::pin(async { Ok(()) })),
        );
        let debug = format!("{:?}", migration);
        assert!(debug.contains("version: 4"));
        assert!(debug.contains("has_up: false"));
        assert!(debug.contains("has_down: true"));
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(MigrationStatus::Applied.label(), "[x] APPLIED");
        assert_eq!(MigrationStatus::Pending.label(), "[ ] PENDING");
    }
}
