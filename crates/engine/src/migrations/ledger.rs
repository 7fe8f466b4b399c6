//! Version Ledger - persistent record of applied versions
//!
//! Every operation runs against whatever handle it is given (a connection or
//! a transaction) under its own deadline derived from the caller's.

use std::time::Duration;
use chrono::{DateTime, Utc};

use super::definitions::LedgerEntry;
use crate::backends::{DatabaseRowExt, DatabaseValue, QueryExec};
use crate::deadline::Deadline;
use crate::error::{MigrateError, MigrateResult};

/// Name of the ledger table
pub const LEDGER_TABLE: &str = "schemig";

pub const CREATE_LEDGER_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS schemig (version INTEGER PRIMARY KEY, applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW())";
pub const SELECT_CURRENT_VERSION_SQL: &str = "SELECT COALESCE(MAX(version), 0) FROM schemig";
pub const INSERT_VERSION_SQL: &str = "INSERT INTO schemig (version) VALUES ($1)";
pub const DELETE_VERSION_SQL: &str = "DELETE FROM schemig WHERE version = $1";
pub const SELECT_ENTRY_SQL: &str = "SELECT COUNT(*), MAX(applied_at) FROM schemig WHERE version = $1";

/// Ledger operations, each bounded by the base timeout
#[derive(Debug, Clone, Copy)]
pub struct Ledger {
    timeout: Duration,
}

impl Ledger {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create the ledger table if it does not exist yet
    pub async fn ensure_table<E>(&self, exec: &mut E, parent: Deadline) -> MigrateResult<()>
    where
        E: QueryExec + ?Sized,
    {
        let operation = "create migrations table if not exists";
        parent
            .child(self.timeout)
            .run(operation, exec.execute(CREATE_LEDGER_TABLE_SQL, &[]))
            .await
            .map_err(|e| MigrateError::ledger(operation, e))?;

        tracing::debug!("Ledger table '{}' is ready", LEDGER_TABLE);
        Ok(())
    }

    /// Highest applied version, 0 when nothing is applied
    pub async fn current_version<E>(&self, exec: &mut E, parent: Deadline) -> MigrateResult<i64>
    where
        E: QueryExec + ?Sized,
    {
        let operation = "get current DB version";
        let result = parent
            .child(self.timeout)
            .run(operation, async {
                let row = exec.query_one_row(SELECT_CURRENT_VERSION_SQL, &[]).await?;
                row.get_i64(0)
            })
            .await;

        result.map_err(|e| MigrateError::ledger(operation, e))
    }

    /// Record `version` as applied
    pub async fn insert<E>(&self, exec: &mut E, version: i64, parent: Deadline) -> MigrateResult<()>
    where
        E: QueryExec + ?Sized,
    {
        let operation = format!("insert migration version {} into migrations table", version);
        let params = [DatabaseValue::Int64(version)];
        parent
            .child(self.timeout)
            .run(&operation, exec.execute(INSERT_VERSION_SQL, &params))
            .await
            .map_err(|e| MigrateError::ledger(operation.clone(), e))?;

        Ok(())
    }

    /// Remove the record of `version`
    pub async fn delete<E>(&self, exec: &mut E, version: i64, parent: Deadline) -> MigrateResult<()>
    where
        E: QueryExec + ?Sized,
    {
        let operation = format!("delete migration version {} from migrations table", version);
        let params = [DatabaseValue::Int64(version)];
        let result = parent
            .child(self.timeout)
            .run(&operation, exec.execute(DELETE_VERSION_SQL, &params))
            .await
            .map_err(|e| MigrateError::ledger(operation.clone(), e))?;

        if result.rows_affected == 0 {
            tracing::warn!("Ledger had no row for migration version {}", version);
        }
        Ok(())
    }

    /// The ledger row for `version`, if it exists
    pub async fn entry<E>(
        &self,
        exec: &mut E,
        version: i64,
        parent: Deadline,
    ) -> MigrateResult<Option<LedgerEntry>>
    where
        E: QueryExec + ?Sized,
    {
        let operation = format!("read migration version {} from migrations table", version);
        let params = [DatabaseValue::Int64(version)];
        let applied_at = parent
            .child(self.timeout)
            .run(&operation, read_applied_at(exec, &params))
            .await
            .map_err(|e| MigrateError::ledger(operation.clone(), e))?;

        Ok(applied_at.map(|applied_at| LedgerEntry { version, applied_at }))
    }
}

async fn read_applied_at<E>(
    exec: &mut E,
    params: &[DatabaseValue],
) -> MigrateResult<Option<DateTime<Utc>>>
where
    E: QueryExec + ?Sized,
{
    let row = exec.query_one_row(SELECT_ENTRY_SQL, params).await?;
    if row.get_i64(0)? == 0 {
        return Ok(None);
    }

    match row.get_by_index(1)? {
        DatabaseValue::DateTime(applied_at) => Ok(Some(applied_at)),
        other => Err(MigrateError::database(format!(
            "applied_at is not a timestamp: {:?}",
            other
        ))),
    }
}
