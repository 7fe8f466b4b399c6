//! In-memory database double for engine tests
//!
//! Understands the ledger statements, records every other statement as a
//! schema change, buffers transactional writes until commit, and can inject
//! failures or move the ledger behind the engine's back.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::backends::{
    DatabaseBackend, DatabaseConnection, DatabaseRow, DatabaseTransaction, DatabaseValue,
    ExecResult, QueryExec,
};
use crate::error::{MigrateError, MigrateResult};
use crate::migrations::ledger::{
    CREATE_LEDGER_TABLE_SQL, DELETE_VERSION_SQL, INSERT_VERSION_SQL, SELECT_CURRENT_VERSION_SQL,
    SELECT_ENTRY_SQL,
};
use crate::transaction::TransactionOptions;

#[derive(Debug, Clone)]
enum Op {
    CreateLedger,
    Insert(i64),
    Delete(i64),
    Schema(String),
}

#[derive(Default)]
struct State {
    ledger_table: bool,
    ledger: BTreeMap<i64, chrono::DateTime<Utc>>,
    schema: Vec<String>,
    fail_on: Vec<String>,
    fail_begin: bool,
    fail_commit: bool,
    fail_rollback: bool,
    drift: Option<(usize, Vec<i64>)>,
    writes: usize,
    version_reads: usize,
    begun: usize,
    committed: usize,
    rolled_back: usize,
    closed: usize,
    last_options: Option<TransactionOptions>,
}

impl State {
    fn check_failure(&self, sql: &str) -> MigrateResult<()> {
        if self.fail_on.iter().any(|fragment| sql.contains(fragment.as_str())) {
            return Err(MigrateError::database(format!("injected failure: {}", sql)));
        }
        Ok(())
    }

    fn parse_write(&self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<Op> {
        let version = || {
            params
                .first()
                .and_then(DatabaseValue::as_i64)
                .ok_or_else(|| MigrateError::database("missing version parameter"))
        };

        if sql == CREATE_LEDGER_TABLE_SQL {
            Ok(Op::CreateLedger)
        } else if sql == INSERT_VERSION_SQL {
            Ok(Op::Insert(version()?))
        } else if sql == DELETE_VERSION_SQL {
            Ok(Op::Delete(version()?))
        } else {
            Ok(Op::Schema(sql.to_string()))
        }
    }

    /// Ledger as seen through `pending` uncommitted operations
    fn view(&self, pending: &[Op]) -> (bool, BTreeMap<i64, chrono::DateTime<Utc>>) {
        let mut table = self.ledger_table;
        let mut ledger = self.ledger.clone();
        for op in pending {
            match op {
                Op::CreateLedger => table = true,
                Op::Insert(version) => {
                    ledger.insert(*version, Utc::now());
                }
                Op::Delete(version) => {
                    ledger.remove(version);
                }
                Op::Schema(_) => {}
            }
        }
        (table, ledger)
    }

    /// Check `op` against the visible ledger and report rows affected
    fn validate(&self, op: &Op, pending: &[Op]) -> MigrateResult<u64> {
        let (table, ledger) = self.view(pending);
        match op {
            Op::CreateLedger | Op::Schema(_) => Ok(0),
            _ if !table => Err(MigrateError::database("relation \"schemig\" does not exist")),
            Op::Insert(version) if ledger.contains_key(version) => Err(MigrateError::database(
                format!("duplicate key value violates unique constraint: {}", version),
            )),
            Op::Insert(_) => Ok(1),
            Op::Delete(version) => Ok(u64::from(ledger.contains_key(version))),
        }
    }

    fn apply(&mut self, op: Op) {
        match op {
            Op::CreateLedger => self.ledger_table = true,
            Op::Insert(version) => {
                self.ledger.insert(version, Utc::now());
            }
            Op::Delete(version) => {
                self.ledger.remove(&version);
            }
            Op::Schema(sql) => self.schema.push(sql),
        }
    }

    fn execute(&mut self, sql: &str, params: &[DatabaseValue], pending: &[Op]) -> MigrateResult<(Op, u64)> {
        self.check_failure(sql)?;
        self.writes += 1;
        let op = self.parse_write(sql, params)?;
        let rows = self.validate(&op, pending)?;
        Ok((op, rows))
    }

    fn query(&mut self, sql: &str, params: &[DatabaseValue], pending: &[Op]) -> MigrateResult<MemoryRow> {
        self.check_failure(sql)?;

        if sql == SELECT_CURRENT_VERSION_SQL {
            self.version_reads += 1;
            if let Some((at, versions)) = self.drift.clone() {
                if self.version_reads == at {
                    self.ledger = versions.into_iter().map(|v| (v, Utc::now())).collect();
                    self.drift = None;
                }
            }
        }

        let (table, ledger) = self.view(pending);
        if !table {
            return Err(MigrateError::database("relation \"schemig\" does not exist"));
        }

        if sql == SELECT_CURRENT_VERSION_SQL {
            let current = ledger.keys().next_back().copied().unwrap_or(0);
            Ok(MemoryRow(vec![DatabaseValue::Int32(current as i32)]))
        } else if sql == SELECT_ENTRY_SQL {
            let version = params.first().and_then(DatabaseValue::as_i64).unwrap_or(0);
            let applied_at = ledger.get(&version).copied();
            Ok(MemoryRow(vec![
                DatabaseValue::Int64(applied_at.is_some() as i64),
                DatabaseValue::from(applied_at),
            ]))
        } else {
            Err(MigrateError::database(format!("unsupported query: {}", sql)))
        }
    }
}

/// Shared in-memory database; clones see the same state
#[derive(Clone)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    /// Database whose ledger table already exists and is empty
    pub fn new() -> Self {
        Self::with_versions(&[])
    }

    /// Database without the ledger table
    pub fn without_ledger_table() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Database whose ledger holds `versions`
    pub fn with_versions(versions: &[i64]) -> Self {
        let db = Self::without_ledger_table();
        {
            let mut state = db.lock();
            state.ledger_table = true;
            state.ledger = versions.iter().map(|&v| (v, Utc::now())).collect();
        }
        db
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn connection(&self) -> MemoryConnection {
        MemoryConnection {
            db: self.clone(),
            closed: false,
        }
    }

    /// Fail every statement containing `fragment`
    pub fn fail_on(&self, fragment: &str) {
        self.lock().fail_on.push(fragment.to_string());
    }

    pub fn fail_begin(&self) {
        self.lock().fail_begin = true;
    }

    pub fn fail_commit(&self) {
        self.lock().fail_commit = true;
    }

    pub fn fail_rollback(&self) {
        self.lock().fail_rollback = true;
    }

    /// On the `read`-th version read, replace the committed ledger with
    /// `versions`, as if another process had run migrations
    pub fn drift_on_read(&self, read: usize, versions: &[i64]) {
        self.lock().drift = Some((read, versions.to_vec()));
    }

    pub fn ledger_versions(&self) -> Vec<i64> {
        self.lock().ledger.keys().copied().collect()
    }

    /// Committed non-ledger statements, in execution order
    pub fn schema(&self) -> Vec<String> {
        self.lock().schema.clone()
    }

    /// Statements executed, committed or not
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn begun(&self) -> usize {
        self.lock().begun
    }

    pub fn committed(&self) -> usize {
        self.lock().committed
    }

    pub fn rolled_back(&self) -> usize {
        self.lock().rolled_back
    }

    pub fn closed(&self) -> usize {
        self.lock().closed
    }

    pub fn last_transaction_options(&self) -> Option<TransactionOptions> {
        self.lock().last_options.clone()
    }
}

pub struct MemoryConnection {
    db: MemoryDatabase,
    closed: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> MigrateResult<()> {
        if self.closed {
            return Err(MigrateError::connection("Connection already closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl QueryExec for MemoryConnection {
    async fn query_one_row(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Box<dyn DatabaseRow>> {
        self.ensure_open()?;
        let row = self.db.lock().query(sql, params, &[])?;
        Ok(Box::new(row))
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<ExecResult> {
        self.ensure_open()?;
        let mut state = self.db.lock();
        let (op, rows) = state.execute(sql, params, &[])?;
        state.apply(op);
        Ok(ExecResult::new(rows))
    }
}

#[async_trait]
impl DatabaseConnection for MemoryConnection {
    async fn begin_transaction<'c>(
        &'c mut self,
        options: &TransactionOptions,
    ) -> MigrateResult<Box<dyn DatabaseTransaction + 'c>> {
        self.ensure_open()?;
        let mut state = self.db.lock();
        if state.fail_begin {
            return Err(MigrateError::database("injected begin failure"));
        }
        state.begun += 1;
        state.last_options = Some(options.clone());
        drop(state);

        Ok(Box::new(MemoryTransaction {
            db: self.db.clone(),
            pending: Vec::new(),
        }))
    }

    async fn close(&mut self) -> MigrateResult<()> {
        if !self.closed {
            self.closed = true;
            self.db.lock().closed += 1;
        }
        Ok(())
    }
}

pub struct MemoryTransaction {
    db: MemoryDatabase,
    pending: Vec<Op>,
}

#[async_trait]
impl QueryExec for MemoryTransaction {
    async fn query_one_row(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Box<dyn DatabaseRow>> {
        let row = self.db.lock().query(sql, params, &self.pending)?;
        Ok(Box::new(row))
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<ExecResult> {
        let (op, rows) = self.db.lock().execute(sql, params, &self.pending)?;
        self.pending.push(op);
        Ok(ExecResult::new(rows))
    }
}

#[async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> MigrateResult<()> {
        let mut state = self.db.lock();
        if state.fail_commit {
            return Err(MigrateError::database("injected commit failure"));
        }
        for op in self.pending {
            state.apply(op);
        }
        state.committed += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MigrateResult<()> {
        let mut state = self.db.lock();
        state.rolled_back += 1;
        if state.fail_rollback {
            return Err(MigrateError::database("injected rollback failure"));
        }
        Ok(())
    }
}

pub struct MemoryRow(Vec<DatabaseValue>);

impl DatabaseRow for MemoryRow {
    fn get_by_index(&self, index: usize) -> MigrateResult<DatabaseValue> {
        self.0
            .get(index)
            .cloned()
            .ok_or_else(|| MigrateError::database(format!("no column {}", index)))
    }

    fn column_count(&self) -> usize {
        self.0.len()
    }
}

/// Backend handing out connections to one [`MemoryDatabase`]
pub struct MemoryBackend {
    db: MemoryDatabase,
    fail_connect: bool,
    fail_close: bool,
}

impl MemoryBackend {
    pub fn new(db: &MemoryDatabase) -> Self {
        Self {
            db: db.clone(),
            fail_connect: false,
            fail_close: false,
        }
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

#[async_trait]
impl DatabaseBackend for MemoryBackend {
    async fn connect(
        &self,
        database_url: &str,
        _timeout: Duration,
    ) -> MigrateResult<Box<dyn DatabaseConnection>> {
        if self.fail_connect {
            return Err(MigrateError::connection(format!(
                "could not connect to {}",
                database_url
            )));
        }

        let conn = self.db.connection();
        if self.fail_close {
            Ok(Box::new(FailingCloseConnection(conn)))
        } else {
            Ok(Box::new(conn))
        }
    }
}

struct FailingCloseConnection(MemoryConnection);

#[async_trait]
impl QueryExec for FailingCloseConnection {
    async fn query_one_row(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Box<dyn DatabaseRow>> {
        self.0.query_one_row(sql, params).await
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<ExecResult> {
        self.0.execute(sql, params).await
    }
}

#[async_trait]
impl DatabaseConnection for FailingCloseConnection {
    async fn begin_transaction<'c>(
        &'c mut self,
        options: &TransactionOptions,
    ) -> MigrateResult<Box<dyn DatabaseTransaction + 'c>> {
        self.0.begin_transaction(options).await
    }

    async fn close(&mut self) -> MigrateResult<()> {
        self.0.close().await?;
        Err(MigrateError::connection("injected close failure"))
    }
}
