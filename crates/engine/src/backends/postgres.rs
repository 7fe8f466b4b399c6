//! PostgreSQL Backend Implementation
//!
//! Implements the capability traits over a single `sqlx` connection, so that
//! non-transactional steps and session-scoped state (advisory locks, for
//! example) all see the same server session.

use std::time::Duration;
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::{Connection, Postgres};
use crate::error::{MigrateError, MigrateResult};
use crate::transaction::TransactionOptions;
use super::core::*;

/// PostgreSQL database backend implementation
#[derive(Debug, Default)]
pub struct PostgresBackend;

impl PostgresBackend {
    /// Create a new PostgreSQL backend instance
    pub fn new() -> Self {
        Self
    }

    /// Validate a database URL for this backend
    pub fn validate_database_url(&self, database_url: &str) -> MigrateResult<()> {
        let parsed = url::Url::parse(database_url)
            .map_err(|e| MigrateError::connection(format!("Invalid database URL: {}", e)))?;

        match parsed.scheme() {
            "postgres" | "postgresql" => Ok(()),
            other => Err(MigrateError::connection(format!(
                "Invalid PostgreSQL URL scheme: {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
    async fn connect(
        &self,
        database_url: &str,
        timeout: Duration,
    ) -> MigrateResult<Box<dyn DatabaseConnection>> {
        self.validate_database_url(database_url)?;

        let conn = tokio::time::timeout(timeout, PgConnection::connect(database_url))
            .await
            .map_err(|_| {
                MigrateError::connection(format!(
                    "Timed out after {:?} connecting to PostgreSQL",
                    timeout
                ))
            })?
            .map_err(|e| MigrateError::connection(format!("Failed to connect to PostgreSQL: {}", e)))?;

        tracing::debug!("PostgreSQL connection established");
        Ok(Box::new(PostgresConnection::new(conn)))
    }
}

/// PostgreSQL connection implementation
pub struct PostgresConnection {
    conn: Option<PgConnection>,
}

impl PostgresConnection {
    pub fn new(conn: PgConnection) -> Self {
        Self { conn: Some(conn) }
    }

    fn conn_mut(&mut self) -> MigrateResult<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| MigrateError::connection("Connection already closed"))
    }
}

#[async_trait]
impl QueryExec for PostgresConnection {
    async fn query_one_row(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Box<dyn DatabaseRow>> {
        let conn = self.conn_mut()?;
        let row = bind_all(sqlx::query(sql), params)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| MigrateError::database(format!("Query fetch failed: {}", e)))?;

        Ok(Box::new(PostgresRow::new(row)))
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<ExecResult> {
        let conn = self.conn_mut()?;
        let result = bind_all(sqlx::query(sql), params)
            .execute(&mut *conn)
            .await
            .map_err(|e| MigrateError::database(format!("Query execution failed: {}", e)))?;

        Ok(ExecResult::new(result.rows_affected()))
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn begin_transaction<'c>(
        &'c mut self,
        options: &TransactionOptions,
    ) -> MigrateResult<Box<dyn DatabaseTransaction + 'c>> {
        let conn = self.conn_mut()?;
        let mut tx = conn
            .begin()
            .await
            .map_err(|e| MigrateError::database(format!("Transaction begin failed: {}", e)))?;

        for statement in options.statements() {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    MigrateError::database(format!("Failed to apply transaction options: {}", e))
                })?;
            tracing::debug!("Transaction option applied: {}", statement);
        }

        Ok(Box::new(PostgresTransaction::new(tx)))
    }

    async fn close(&mut self) -> MigrateResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|e| MigrateError::connection(format!("Failed to close connection: {}", e)))?;
        }
        Ok(())
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction<'c> {
    tx: Option<sqlx::Transaction<'c, Postgres>>,
}

impl<'c> PostgresTransaction<'c> {
    pub fn new(tx: sqlx::Transaction<'c, Postgres>) -> Self {
        Self { tx: Some(tx) }
    }

    fn tx_mut(&mut self) -> MigrateResult<&mut sqlx::Transaction<'c, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| MigrateError::database("Transaction already completed"))
    }
}

#[async_trait]
impl<'c> QueryExec for PostgresTransaction<'c> {
    async fn query_one_row(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Box<dyn DatabaseRow>> {
        let tx = self.tx_mut()?;
        let row = bind_all(sqlx::query(sql), params)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| MigrateError::database(format!("Query fetch failed: {}", e)))?;

        Ok(Box::new(PostgresRow::new(row)))
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<ExecResult> {
        let tx = self.tx_mut()?;
        let result = bind_all(sqlx::query(sql), params)
            .execute(&mut **tx)
            .await
            .map_err(|e| MigrateError::database(format!("Query execution failed: {}", e)))?;

        Ok(ExecResult::new(result.rows_affected()))
    }
}

#[async_trait]
impl<'c> DatabaseTransaction for PostgresTransaction<'c> {
    async fn commit(mut self: Box<Self>) -> MigrateResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrateError::database("Transaction already completed"))?;

        tx.commit()
            .await
            .map_err(|e| MigrateError::database(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> MigrateResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrateError::database("Transaction already completed"))?;

        tx.rollback()
            .await
            .map_err(|e| MigrateError::database(format!("Transaction rollback failed: {}", e)))
    }
}

/// PostgreSQL row implementation
pub struct PostgresRow {
    row: PgRow,
}

impl PostgresRow {
    pub fn new(row: PgRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for PostgresRow {
    fn get_by_index(&self, index: usize) -> MigrateResult<DatabaseValue> {
        postgres_value_to_database_value(&self.row, index)
    }

    fn column_count(&self) -> usize {
        use sqlx::Row;
        self.row.len()
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

fn bind_all<'q>(mut query: PgQuery<'q>, params: &[DatabaseValue]) -> PgQuery<'q> {
    for param in params {
        query = bind_database_value(query, param);
    }
    query
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(query: PgQuery<'q>, value: &DatabaseValue) -> PgQuery<'q> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
    }
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> MigrateResult<DatabaseValue> {
    use sqlx::{Column, Row, TypeInfo, ValueRef};

    let column = row
        .columns()
        .get(index)
        .ok_or_else(|| MigrateError::database(format!("Column index {} out of range", index)))?;
    let type_name = column.type_info().name();

    let raw = row
        .try_get_raw(index)
        .map_err(|e| MigrateError::database(format!("Failed to read column {}: {}", index, e)))?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let decode_err = |kind: &str, e: sqlx::Error| {
        MigrateError::database(format!("Failed to get {} value: {}", kind, e))
    };

    match type_name {
        "BOOL" => row.try_get(index).map(DatabaseValue::Bool).map_err(|e| decode_err("bool", e)),
        "INT2" => row
            .try_get::<i16, _>(index)
            .map(|v| DatabaseValue::Int32(v as i32))
            .map_err(|e| decode_err("int16", e)),
        "INT4" => row.try_get(index).map(DatabaseValue::Int32).map_err(|e| decode_err("int32", e)),
        "INT8" => row.try_get(index).map(DatabaseValue::Int64).map_err(|e| decode_err("int64", e)),
        "FLOAT8" => row
            .try_get(index)
            .map(DatabaseValue::Float64)
            .map_err(|e| decode_err("float64", e)),
        "BYTEA" => row.try_get(index).map(DatabaseValue::Bytes).map_err(|e| decode_err("bytes", e)),
        "TIMESTAMPTZ" => row
            .try_get(index)
            .map(DatabaseValue::DateTime)
            .map_err(|e| decode_err("datetime", e)),
        _ => row
            .try_get(index)
            .map(DatabaseValue::String)
            .map_err(|e| decode_err(&format!("'{}' as string", type_name), e)),
    }
}
