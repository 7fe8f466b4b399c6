//! Sample migrations for the demo database

use schemig::{Migration, NoTxUpDown, TxUpDown};

/// Every migration the demo knows about
pub fn all() -> Vec<Migration> {
    vec![create_users(), index_users_created_at(), add_users_address()]
}

fn create_users() -> Migration {
    Migration::transactional(
        1,
        TxUpDown::from_sql(
            "CREATE TABLE users (
                id SERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                created_at TIMESTAMPTZ DEFAULT NOW()
            )",
            "DROP TABLE users",
        ),
    )
}

// CREATE INDEX CONCURRENTLY cannot run inside a transaction block
fn index_users_created_at() -> Migration {
    Migration::non_transactional(
        2,
        NoTxUpDown::from_sql(
            "CREATE INDEX CONCURRENTLY idx_users_created_at ON users (created_at)",
            "DROP INDEX CONCURRENTLY IF EXISTS idx_users_created_at",
        ),
    )
}

fn add_users_address() -> Migration {
    Migration::transactional(
        3,
        TxUpDown::new()
            .up(|ctx, tx| {
                Box::pin(async move {
                    tracing::debug!("Adding users.address (version {})", ctx.version);
                    tx.execute("ALTER TABLE users ADD COLUMN address TEXT", &[])
                        .await?;
                    Ok(())
                })
            })
            .down(|_, tx| {
                Box::pin(async move {
                    tx.execute("ALTER TABLE users DROP COLUMN address", &[])
                        .await?;
                    Ok(())
                })
            }),
    )
}
