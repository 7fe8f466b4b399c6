//! Session-level PostgreSQL advisory lock around the migration connection
//!
//! The engine only detects concurrent ledger changes. Holding this lock for
//! the whole session keeps two demo processes from migrating at once.

use std::time::Duration;

use async_trait::async_trait;
use schemig::{
    DatabaseBackend, DatabaseConnection, DatabaseRow, DatabaseRowExt, DatabaseTransaction,
    DatabaseValue, Deadline, ExecResult, MigrateError, MigrateResult, PostgresBackend, QueryExec,
    TransactionOptions,
};

/// Key hashed into the advisory lock id
pub const LOCK_KEY: &str = "schemig_advisory_lock";

const ACQUIRE_SQL: &str = "SELECT pg_try_advisory_lock(hashtext($1))";
const RELEASE_SQL: &str = "SELECT pg_advisory_unlock(hashtext($1))";

/// Connection that holds the advisory lock until it is closed
pub struct AdvisoryLockedConnection {
    inner: Box<dyn DatabaseConnection>,
    timeout: Duration,
}

impl AdvisoryLockedConnection {
    /// Take the lock on `inner`, closing it again if the lock is unavailable
    pub async fn acquire(
        mut inner: Box<dyn DatabaseConnection>,
        timeout: Duration,
    ) -> MigrateResult<Self> {
        tracing::info!("Acquiring advisory lock...");

        match lock_call(inner.as_mut(), ACQUIRE_SQL, timeout).await {
            Ok(true) => {
                tracing::info!("Acquired advisory lock");
                Ok(Self { inner, timeout })
            }
            outcome => {
                if let Err(close_err) = inner.close().await {
                    tracing::warn!("Failed to close connection: {}", close_err);
                }
                Err(match outcome {
                    Ok(_) => MigrateError::connection("failed to acquire advisory lock: already held"),
                    Err(err) => MigrateError::connection(format!(
                        "failed to acquire advisory lock: {}",
                        err
                    )),
                })
            }
        }
    }

    async fn release(&mut self) -> MigrateResult<()> {
        tracing::info!("Releasing advisory lock...");

        match lock_call(self.inner.as_mut(), RELEASE_SQL, self.timeout).await {
            Ok(true) => {
                tracing::info!("Released advisory lock");
                Ok(())
            }
            Ok(false) => Err(MigrateError::connection(
                "failed to release advisory lock: not held",
            )),
            Err(err) => Err(MigrateError::connection(format!(
                "failed to release advisory lock: {}",
                err
            ))),
        }
    }
}

async fn lock_call(
    conn: &mut dyn DatabaseConnection,
    sql: &str,
    timeout: Duration,
) -> MigrateResult<bool> {
    let params = [DatabaseValue::from(LOCK_KEY)];
    Deadline::after(timeout)
        .run("call advisory lock function", async {
            let row = conn.query_one_row(sql, &params).await?;
            row.get_bool(0)
        })
        .await
}

#[async_trait]
impl QueryExec for AdvisoryLockedConnection {
    async fn query_one_row(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Box<dyn DatabaseRow>> {
        self.inner.query_one_row(sql, params).await
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<ExecResult> {
        self.inner.execute(sql, params).await
    }
}

#[async_trait]
impl DatabaseConnection for AdvisoryLockedConnection {
    async fn begin_transaction<'c>(
        &'c mut self,
        options: &TransactionOptions,
    ) -> MigrateResult<Box<dyn DatabaseTransaction + 'c>> {
        self.inner.begin_transaction(options).await
    }

    async fn close(&mut self) -> MigrateResult<()> {
        let released = self.release().await;
        self.inner.close().await?;
        released
    }
}

/// PostgreSQL backend whose connections hold the advisory lock
#[derive(Debug, Default)]
pub struct LockedPostgresBackend {
    inner: PostgresBackend,
}

impl LockedPostgresBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatabaseBackend for LockedPostgresBackend {
    async fn connect(
        &self,
        database_url: &str,
        timeout: Duration,
    ) -> MigrateResult<Box<dyn DatabaseConnection>> {
        let conn = self.inner.connect(database_url, timeout).await?;
        let locked = AdvisoryLockedConnection::acquire(conn, timeout).await?;
        Ok(Box::new(locked))
    }
}
