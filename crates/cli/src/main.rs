mod lock;
mod migrations;

use std::io;
use std::sync::Arc;

use anyhow::Context;
use schemig::{MigrateConfig, MigrationTool};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lock::LockedPostgresBackend;

/// Log filter used when `RUST_LOG` is not set
const DEFAULT_LOG_FILTER: &str = "warn";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let config = MigrateConfig::from_env().context("Failed to load migration configuration")?;
    let tool = MigrationTool::new(
        migrations::all(),
        Arc::new(LockedPostgresBackend::new()),
        Some(config),
    )
    .context("Failed to create migration tool")?;

    let code = tool
        .run(std::env::args_os().skip(1), &mut io::stdout(), &mut io::stderr())
        .await;

    std::process::exit(code);
}

/// Logs go to stderr so that migration output on stdout stays clean
fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("Invalid log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    Ok(())
}
