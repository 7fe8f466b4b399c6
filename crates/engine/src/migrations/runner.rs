//! Migration Runner - Applies pending migrations against the database
//!
//! The runner reads the current version once, then dispatches every newer
//! registry entry, in ascending order, through the executor matching its
//! mode. The first failure aborts the run; migrations committed before it
//! stay applied.

use std::io::Write;
use std::time::Instant;

use super::definitions::{Direction, Migration, MigrationRunResult};
use super::executor::MigrationExecutor;
use super::ledger::Ledger;
use super::registry::MigrationRegistry;
use crate::backends::DatabaseConnection;
use crate::config::MigrateConfig;
use crate::deadline::Deadline;
use crate::error::{MigrateError, MigrateResult};
use crate::transaction::TransactionOptions;

/// Migration runner that executes migrations against a database
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    registry: MigrationRegistry,
    config: MigrateConfig,
    executor: MigrationExecutor,
    ledger: Ledger,
}

impl MigrationRunner {
    /// Create a new migration runner
    pub fn new(registry: MigrationRegistry, mut config: MigrateConfig) -> Self {
        config.ensure_defaults();
        Self {
            executor: MigrationExecutor::new(&config),
            ledger: Ledger::new(config.timeout),
            registry,
            config,
        }
    }

    /// Use `options` for every transactional migration
    pub fn with_transaction_options(mut self, options: TransactionOptions) -> Self {
        self.executor = self.executor.with_transaction_options(options);
        self
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    pub(super) fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Parent deadline for a top-level ledger read
    pub(super) fn deadline(&self) -> Deadline {
        Deadline::after(self.config.timeout)
    }

    /// Create the ledger table if needed
    pub async fn ensure_ledger(&self, conn: &mut dyn DatabaseConnection) -> MigrateResult<()> {
        self.ledger.ensure_table(conn, self.deadline()).await
    }

    /// Apply every pending migration
    pub async fn apply_all(
        &self,
        conn: &mut dyn DatabaseConnection,
        out: &mut dyn Write,
    ) -> MigrateResult<MigrationRunResult> {
        self.run_migrations(conn, out, 0).await
    }

    /// Apply the next pending migration only
    pub async fn apply_one(
        &self,
        conn: &mut dyn DatabaseConnection,
        out: &mut dyn Write,
    ) -> MigrateResult<MigrationRunResult> {
        self.run_migrations(conn, out, 1).await
    }

    /// Apply pending migrations, at most `limit` of them when `limit > 0`
    pub async fn run_migrations(
        &self,
        conn: &mut dyn DatabaseConnection,
        out: &mut dyn Write,
        limit: usize,
    ) -> MigrateResult<MigrationRunResult> {
        let start_time = Instant::now();
        let current = self.ledger.current_version(&mut *conn, self.deadline()).await?;
        tracing::debug!("Current database version is {}", current);

        let mut result = MigrationRunResult::default();

        for migration in self.registry.ascending() {
            if migration.version <= current {
                result.skipped_count += 1;
                continue;
            }

            self.dispatch(&mut *conn, migration, Direction::Up).await?;

            writeln!(out, "[x] Applied migration version {}", migration.version)?;
            tracing::info!("Applied migration version {}", migration.version);
            result.applied_migrations.push(migration.version);

            if limit > 0 && result.applied_count() == limit {
                break;
            }
        }

        if result.applied_migrations.is_empty() {
            writeln!(out, "No migrations to apply")?;
        } else {
            writeln!(out, "{} migration(s) applied", result.applied_count())?;
        }

        result.execution_time = start_time.elapsed();
        Ok(result)
    }

    /// Run one migration, tagging any failure with its execution mode
    pub(super) async fn dispatch(
        &self,
        conn: &mut dyn DatabaseConnection,
        migration: &Migration,
        direction: Direction,
    ) -> MigrateResult<()> {
        self.executor
            .execute(conn, migration, direction)
            .await
            .map_err(|source| MigrateError::Execution {
                version: migration.version,
                direction,
                mode: migration.execution_mode(),
                source: Box::new(source),
            })
    }
}

/// Apply pending migrations from `registry`; `limit` 0 applies all of them
pub async fn run_up(
    registry: &MigrationRegistry,
    conn: &mut dyn DatabaseConnection,
    out: &mut dyn Write,
    limit: usize,
    config: &MigrateConfig,
) -> MigrateResult<MigrationRunResult> {
    MigrationRunner::new(registry.clone(), config.clone())
        .run_migrations(conn, out, limit)
        .await
}
