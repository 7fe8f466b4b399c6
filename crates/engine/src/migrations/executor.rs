//! Migration Executor - runs one migration as a single unit
//!
//! A unit is guard check, action and ledger mutation. Transactional units run
//! all three inside one transaction; non-transactional units run them directly
//! on the connection and can leave the schema changed without a ledger update
//! when the last step fails.


use super::definitions::{
    BoxFuture, ConnAction, Direction, ExecutionMode, Migration, MigrationContext, MigrationMode,
    TxAction,
};
use super::guard;
use super::ledger::Ledger;
use crate::backends::{DatabaseConnection, QueryExec};
use crate::config::MigrateConfig;
use crate::deadline::Deadline;
use crate::error::{MigrateError, MigrateResult};
use crate::transaction::TransactionOptions;

/// Executes single migrations in either mode
#[derive(Debug, Clone)]
pub struct MigrationExecutor {
    ledger: Ledger,
    config: MigrateConfig,
    tx_options: TransactionOptions,
}

impl MigrationExecutor {
    pub fn new(config: &MigrateConfig) -> Self {
        Self {
            ledger: Ledger::new(config.timeout),
            config: config.clone(),
            tx_options: TransactionOptions::default(),
        }
    }

    /// Options used when beginning transactions for transactional migrations
    pub fn with_transaction_options(mut self, options: TransactionOptions) -> Self {
        self.tx_options = options;
        self
    }

    /// Deadline covering one whole unit, started now
    fn unit_deadline(&self) -> Deadline {
        Deadline::after(self.config.unit_timeout())
    }

    pub fn transaction_options(&self) -> &TransactionOptions {
        &self.tx_options
    }

    /// Run `migration` in `direction` through the executor matching its mode
    pub async fn execute(
        &self,
        conn: &mut dyn DatabaseConnection,
        migration: &Migration,
        direction: Direction,
    ) -> MigrateResult<()> {
        tracing::debug!(
            "Executing migration {} ({}) {}",
            migration.version,
            direction,
            migration.execution_mode()
        );

        match &migration.mode {
            MigrationMode::Transactional(actions) => {
                let action = actions
                    .get(direction)
                    .ok_or_else(|| missing_action(migration.version, direction))?;
                self.execute_in_tx(conn, migration.version, direction, action).await
            }
            MigrationMode::NonTransactional(actions) => {
                let action = actions
                    .get(direction)
                    .ok_or_else(|| missing_action(migration.version, direction))?;
                self.execute_without_tx(conn, migration.version, direction, action)
                    .await
            }
        }
    }

    async fn execute_in_tx(
        &self,
        conn: &mut dyn DatabaseConnection,
        version: i64,
        direction: Direction,
        action: &TxAction,
    ) -> MigrateResult<()> {
        let unit = self.unit_deadline();

        let mut tx = unit
            .run("begin transaction", conn.begin_transaction(&self.tx_options))
            .await
            .map_err(|e| MigrateError::BeginTransaction { source: Box::new(e) })?;

        let ctx = MigrationContext {
            version,
            direction,
            deadline: unit,
        };
        let step = self
            .run_step(&mut *tx, ctx, ExecutionMode::Transactional, |ctx, handle| {
                action(ctx, handle)
            })
            .await;

        if let Err(err) = step {
            let rollback = Deadline::after(self.config.timeout)
                .run("rollback transaction", tx.rollback())
                .await;
            if let Err(rollback_err) = rollback {
                tracing::warn!(
                    "Failed to roll back migration {} ({}): {}",
                    version,
                    direction,
                    rollback_err
                );
            }
            return Err(err);
        }

        unit.run("commit transaction", tx.commit())
            .await
            .map_err(|e| MigrateError::Commit { source: Box::new(e) })
    }

    async fn execute_without_tx(
        &self,
        conn: &mut dyn DatabaseConnection,
        version: i64,
        direction: Direction,
        action: &ConnAction,
    ) -> MigrateResult<()> {
        let ctx = MigrationContext {
            version,
            direction,
            deadline: self.unit_deadline(),
        };

        self.run_step(conn, ctx, ExecutionMode::NonTransactional, |ctx, handle| {
            action(ctx, handle)
        })
        .await
    }

    /// Guard, action, ledger mutation; the unit deadline is `ctx.deadline`
    async fn run_step<H, F>(
        &self,
        handle: &mut H,
        ctx: MigrationContext,
        mode: ExecutionMode,
        action: F,
    ) -> MigrateResult<()>
    where
        H: QueryExec + ?Sized,
        F: for<'a> FnOnce(MigrationContext, &'a mut H) -> BoxFuture<'a, MigrateResult<()>>,
    {
        let MigrationContext { version, direction, .. } = ctx;

        guard::verify(&self.ledger, &mut *handle, &ctx).await?;

        let action_ctx = MigrationContext {
            deadline: ctx.deadline.child(self.config.timeout),
            ..ctx
        };
        let operation = format!("run migration.{} version {}", direction, version);
        action_ctx
            .deadline
            .run(&operation, action(action_ctx, &mut *handle))
            .await
            .map_err(|e| MigrateError::Action {
                version,
                direction,
                source: Box::new(e),
            })?;

        let recorded = match direction {
            Direction::Up => self.ledger.insert(&mut *handle, version, ctx.deadline).await,
            Direction::Down => self.ledger.delete(&mut *handle, version, ctx.deadline).await,
        };

        if let Err(err) = &recorded {
            if mode == ExecutionMode::NonTransactional {
                tracing::error!(
                    "Migration {} ({}) ran but the ledger was not updated, manual remediation required: {}",
                    version,
                    direction,
                    err
                );
            }
        }
        recorded
    }
}

fn missing_action(version: i64, direction: Direction) -> MigrateError {
    MigrateError::Validation {
        findings: vec![format!(
            "migration {} has no {} action defined",
            version, direction
        )],
    }
}
