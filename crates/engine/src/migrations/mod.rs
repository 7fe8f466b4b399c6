//! Migration System
//!
//! Definitions, the validated registry, the version ledger, and the runners
//! that apply, roll back and report migrations.

pub mod definitions;
pub mod executor;
pub mod guard;
pub mod ledger;
pub mod registry;
pub mod rollback;
pub mod runner;
pub mod status;

pub use definitions::*;
pub use executor::MigrationExecutor;
pub use ledger::{Ledger, LEDGER_TABLE};
pub use registry::{validate_migrations, MigrationRegistry};
pub use rollback::{run_down, MigrationRollback};
pub use runner::{run_up, MigrationRunner};
pub use status::{run_status, run_version};
