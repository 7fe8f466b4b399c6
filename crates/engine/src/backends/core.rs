//! Core Database Capability Traits
//!
//! The engine never talks to a driver directly. It consumes these object-safe
//! traits, and each client library gets one adapter implementing them.

use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::error::{MigrateError, MigrateResult};
use crate::transaction::TransactionOptions;

/// Outcome of a write statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Number of rows inserted, updated or deleted
    pub rows_affected: u64,
}

impl ExecResult {
    pub fn new(rows_affected: u64) -> Self {
        Self { rows_affected }
    }
}

/// One decoded result row
pub trait DatabaseRow: Send {
    /// Get a column value by index
    fn get_by_index(&self, index: usize) -> MigrateResult<DatabaseValue>;

    /// Get column count
    fn column_count(&self) -> usize;
}

/// Typed accessors on top of [`DatabaseRow`]
pub trait DatabaseRowExt {
    /// Decode an integer column, widening 32-bit values
    fn get_i64(&self, index: usize) -> MigrateResult<i64>;

    /// Decode a boolean column
    fn get_bool(&self, index: usize) -> MigrateResult<bool>;
}

impl<R: DatabaseRow + ?Sized> DatabaseRowExt for R {
    fn get_i64(&self, index: usize) -> MigrateResult<i64> {
        match self.get_by_index(index)? {
            DatabaseValue::Int32(value) => Ok(value as i64),
            DatabaseValue::Int64(value) => Ok(value),
            other => Err(MigrateError::database(format!(
                "column {} is not an integer: {:?}",
                index, other
            ))),
        }
    }

    fn get_bool(&self, index: usize) -> MigrateResult<bool> {
        match self.get_by_index(index)? {
            DatabaseValue::Bool(value) => Ok(value),
            other => Err(MigrateError::database(format!(
                "column {} is not a boolean: {:?}",
                index, other
            ))),
        }
    }
}

/// Statement execution shared by connections and transactions
#[async_trait]
pub trait QueryExec: Send {
    /// Run a query expected to return exactly one row
    async fn query_one_row(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Box<dyn DatabaseRow>>;

    /// Execute a statement and report its outcome
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<ExecResult>;
}

/// Abstract database transaction trait
#[async_trait]
pub trait DatabaseTransaction: QueryExec {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> MigrateResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> MigrateResult<()>;
}

/// Abstract database connection trait
#[async_trait]
pub trait DatabaseConnection: QueryExec {
    /// Begin a transaction; the connection is borrowed until it completes
    async fn begin_transaction<'c>(
        &'c mut self,
        options: &TransactionOptions,
    ) -> MigrateResult<Box<dyn DatabaseTransaction + 'c>>;

    /// Close the connection
    async fn close(&mut self) -> MigrateResult<()>;
}

/// Opens connections for one kind of database
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Connect to `database_url`, giving up after `timeout`
    async fn connect(
        &self,
        database_url: &str,
        timeout: Duration,
    ) -> MigrateResult<Box<dyn DatabaseConnection>>;
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Integer view of the value, if it holds one
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(value) => Some(*value as i64),
            DatabaseValue::Int64(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}
