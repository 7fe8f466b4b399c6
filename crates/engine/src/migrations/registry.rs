//! Migration Registry - validated, ordered collection of migrations

use std::collections::BTreeMap;

use super::definitions::Migration;
use crate::error::{MigrateError, MigrateResult};

/// Check a set of migration definitions, collecting every problem found.
///
/// Per-definition findings come first, in input order, followed by duplicate
/// versions in ascending order.
pub fn validate_migrations(migrations: &[Migration]) -> MigrateResult<()> {
    let mut findings = Vec::new();
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();

    for migration in migrations {
        findings.extend(migration.findings());
        *counts.entry(migration.version).or_insert(0) += 1;
    }

    for (version, count) in counts {
        if count > 1 {
            findings.push(format!(
                "migration version {} is defined {} times",
                version, count
            ));
        }
    }

    if findings.is_empty() {
        Ok(())
    } else {
        Err(MigrateError::Validation { findings })
    }
}

/// Validated migrations, stored in ascending version order
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    /// Validate `migrations` and build a registry from them
    pub fn new(mut migrations: Vec<Migration>) -> MigrateResult<Self> {
        validate_migrations(&migrations)?;
        migrations.sort_by_key(|m| m.version);

        tracing::debug!("Registered {} migrations", migrations.len());
        Ok(Self { migrations })
    }

    /// Migrations in apply order
    pub fn ascending(&self) -> impl Iterator<Item = &Migration> + '_ {
        self.migrations.iter()
    }

    /// Migrations in rollback and status order
    pub fn descending(&self) -> impl Iterator<Item = &Migration> + '_ {
        self.migrations.iter().rev()
    }

    /// All versions, ascending
    pub fn versions(&self) -> Vec<i64> {
        self.migrations.iter().map(|m| m.version).collect()
    }

    /// Highest registered version
    pub fn latest_version(&self) -> Option<i64> {
        self.migrations.last().map(|m| m.version)
    }

    pub fn get(&self, version: i64) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&version, |m| m.version)
            .ok()
            .map(|index| &self.migrations[index])
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}
