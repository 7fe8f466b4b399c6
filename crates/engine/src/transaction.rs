//! Transaction options
//!
//! Options handed to [`DatabaseConnection::begin_transaction`]. Adapters turn
//! them into the statements their database understands.
//!
//! [`DatabaseConnection::begin_transaction`]: crate::backends::DatabaseConnection::begin_transaction

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Read Uncommitted - lowest isolation level
    ReadUncommitted,
    /// Read Committed - default PostgreSQL isolation level
    ReadCommitted,
    /// Repeatable Read - stronger consistency guarantees
    RepeatableRead,
    /// Serializable - highest isolation level
    Serializable,
}

impl IsolationLevel {
    /// Convert to SQL string for SET TRANSACTION ISOLATION LEVEL command
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for beginning a transaction; the default uses the database defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Transaction isolation level
    pub isolation_level: Option<IsolationLevel>,
    /// Whether the transaction is read-only
    pub read_only: bool,
}

impl TransactionOptions {
    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// `SET TRANSACTION` statements to run right after `BEGIN`
    pub fn statements(&self) -> Vec<String> {
        let mut statements = Vec::new();
        if let Some(level) = self.isolation_level {
            statements.push(format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()));
        }
        if self.read_only {
            statements.push("SET TRANSACTION READ ONLY".to_string());
        }
        statements
    }
}
