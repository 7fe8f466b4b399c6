//! Migration Rollback - Rolls back the most recently applied migration
//!
//! Rollback is deliberately one step per invocation: the highest registered
//! version at or below the current one is reverted and nothing else.

use std::io::Write;
use std::time::Instant;

use super::definitions::{Direction, RollbackResult};
use super::registry::MigrationRegistry;
use super::runner::MigrationRunner;
use crate::backends::DatabaseConnection;
use crate::config::MigrateConfig;
use crate::error::MigrateResult;

/// Extension trait for MigrationRunner to add rollback functionality
pub trait MigrationRollback {
    /// Roll back the highest applied migration
    async fn rollback_one(
        &self,
        conn: &mut dyn DatabaseConnection,
        out: &mut dyn Write,
    ) -> MigrateResult<RollbackResult>;
}

impl MigrationRollback for MigrationRunner {
    async fn rollback_one(
        &self,
        conn: &mut dyn DatabaseConnection,
        out: &mut dyn Write,
    ) -> MigrateResult<RollbackResult> {
        let start_time = Instant::now();
        let current = self
            .ledger()
            .current_version(&mut *conn, self.deadline())
            .await?;

        let candidate = self
            .registry()
            .descending()
            .find(|migration| migration.version <= current);

        let Some(migration) = candidate else {
            writeln!(out, "No migrations to roll back")?;
            return Ok(RollbackResult {
                rolled_back: None,
                execution_time: start_time.elapsed(),
            });
        };

        self.dispatch(&mut *conn, migration, Direction::Down).await?;

        writeln!(out, "[x]-->[ ] Rolled back migration version {}", migration.version)?;
        tracing::info!("Rolled back migration version {}", migration.version);

        Ok(RollbackResult {
            rolled_back: Some(migration.version),
            execution_time: start_time.elapsed(),
        })
    }
}

/// Roll back the highest applied migration in `registry`
pub async fn run_down(
    registry: &MigrationRegistry,
    conn: &mut dyn DatabaseConnection,
    out: &mut dyn Write,
    config: &MigrateConfig,
) -> MigrateResult<RollbackResult> {
    MigrationRunner::new(registry.clone(), config.clone())
        .rollback_one(conn, out)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::{Migration, NoTxUpDown, TxUpDown};
    use crate::testing::MemoryDatabase;

    fn registry() -> MigrationRegistry {
        MigrationRegistry::new(vec![
            Migration::transactional(1, TxUpDown::from_sql("CREATE TABLE a (id INT)", "DROP TABLE a")),
            Migration::non_transactional(
                2,
                NoTxUpDown::from_sql(
                    "CREATE INDEX CONCURRENTLY idx_a ON a (id)",
                    "DROP INDEX CONCURRENTLY idx_a",
                ),
            ),
            Migration::transactional(4, TxUpDown::from_sql("CREATE TABLE b (id INT)", "DROP TABLE b")),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_rolls_back_highest_version_at_or_below_current() {
        let db = MemoryDatabase::with_versions(&[1, 2, 3]);
        let mut conn = db.connection();
        let mut out: Vec<u8> = Vec::new();

        let result = run_down(&registry(), &mut conn, &mut out, &MigrateConfig::default())
            .await
            .unwrap();

        assert_eq!(result.rolled_back, Some(2));
        assert_eq!(db.ledger_versions(), vec![1, 3]);
        assert_eq!(db.schema(), vec!["DROP INDEX CONCURRENTLY idx_a".to_string()]);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[x]-->[ ] Rolled back migration version 2\n"
        );
    }

    #[tokio::test]
    async fn test_empty_ledger_is_a_no_op() {
        let db = MemoryDatabase::new();
        let mut conn = db.connection();
        let mut out: Vec<u8> = Vec::new();

        let result = run_down(&registry(), &mut conn, &mut out, &MigrateConfig::default())
            .await
            .unwrap();

        assert_eq!(result.rolled_back, None);
        assert_eq!(String::from_utf8(out).unwrap(), "No migrations to roll back\n");
        assert_eq!(db.writes(), 0);
        assert_eq!(db.begun(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_tagged_with_mode() {
        let db = MemoryDatabase::with_versions(&[1, 2]);
        db.fail_on("DROP INDEX");
        let mut conn = db.connection();
        let mut out: Vec<u8> = Vec::new();

        let err = run_down(&registry(), &mut conn, &mut out, &MigrateConfig::default())
            .await
            .unwrap_err();

        assert!(err
            .to_string()
            .starts_with("execute without TX: failed to apply migration.down version 2: "));
        assert_eq!(db.ledger_versions(), vec![1, 2]);
    }
}
