//! Version Guard - re-checks the ledger right before a migration runs

use super::definitions::MigrationContext;
use super::ledger::Ledger;
use crate::backends::QueryExec;
use crate::error::{MigrateError, MigrateResult};

/// Re-read the current version through `exec` and refuse to run `ctx` if the
/// ledger moved past it. Returns the version that was read.
pub async fn verify<E>(ledger: &Ledger, exec: &mut E, ctx: &MigrationContext) -> MigrateResult<i64>
where
    E: QueryExec + ?Sized,
{
    let current = ledger.current_version(exec, ctx.deadline).await?;

    if !ctx.direction.permits(ctx.version, current) {
        tracing::warn!(
            "Database version changed to {} before migration {} ({}) could run",
            current,
            ctx.version,
            ctx.direction
        );
        return Err(MigrateError::ConcurrencyConflict {
            version: ctx.version,
            direction: ctx.direction,
            current,
        });
    }

    Ok(current)
}
