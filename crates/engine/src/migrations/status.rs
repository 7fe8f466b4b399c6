//! Read-only reporting: per-migration status and the current version

use std::io::Write;

use super::definitions::{MigrationStatus, MigrationStatusEntry};
use super::registry::MigrationRegistry;
use super::runner::MigrationRunner;
use crate::backends::DatabaseConnection;
use crate::config::MigrateConfig;
use crate::error::MigrateResult;

impl MigrationRunner {
    /// Classify every registered migration against the current version and
    /// write the status table, highest version first
    pub async fn status(
        &self,
        conn: &mut dyn DatabaseConnection,
        out: &mut dyn Write,
    ) -> MigrateResult<Vec<MigrationStatusEntry>> {
        let current = self.ledger().current_version(conn, self.deadline()).await?;

        let entries: Vec<MigrationStatusEntry> = self
            .registry()
            .descending()
            .map(|migration| MigrationStatusEntry {
                version: migration.version,
                status: if migration.version <= current {
                    MigrationStatus::Applied
                } else {
                    MigrationStatus::Pending
                },
            })
            .collect();

        writeln!(out, "{:<10} {:<12}", "VERSION", "STATUS")?;
        for entry in &entries {
            writeln!(out, "{:<10} {:<12}", entry.version, entry.status.label())?;
        }

        Ok(entries)
    }

    /// Write and return the current database version
    pub async fn report_version(
        &self,
        conn: &mut dyn DatabaseConnection,
        out: &mut dyn Write,
    ) -> MigrateResult<i64> {
        let current = self.ledger().current_version(conn, self.deadline()).await?;
        write!(out, "Current database version:\n{}\n", current)?;
        Ok(current)
    }
}

/// Write the status table for `registry`
pub async fn run_status(
    registry: &MigrationRegistry,
    conn: &mut dyn DatabaseConnection,
    out: &mut dyn Write,
    config: &MigrateConfig,
) -> MigrateResult<Vec<MigrationStatusEntry>> {
    MigrationRunner::new(registry.clone(), config.clone())
        .status(conn, out)
        .await
}

/// Write the current database version
pub async fn run_version(
    conn: &mut dyn DatabaseConnection,
    out: &mut dyn Write,
    config: &MigrateConfig,
) -> MigrateResult<i64> {
    MigrationRunner::new(MigrationRegistry::default(), config.clone())
        .report_version(conn, out)
        .await
}
