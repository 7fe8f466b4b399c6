//! Command-line entry point
//!
//! [`MigrationTool`] turns `<db_url> <command>` into a migration run and an
//! exit code. The binary only has to supply migrations and a backend.

use std::ffi::OsString;
use std::io::Write;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use crate::backends::{DatabaseBackend, DatabaseConnection};
use crate::config::MigrateConfig;
use crate::error::{MigrateError, MigrateResult};
use crate::migrations::{Migration, MigrationRegistry, MigrationRollback, MigrationRunner};
use crate::transaction::TransactionOptions;

pub const TOOL_NAME: &str = "schemig";

pub const USAGE: &str = "Usage: schemig <db_url> <up|up-one|down|status|version>";

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ARGUMENTS: i32 = 1;
pub const EXIT_CONNECT: i32 = 2;
pub const EXIT_CLOSE: i32 = 3;
pub const EXIT_LEDGER_TABLE: i32 = 4;
pub const EXIT_UP: i32 = 5;
pub const EXIT_UP_ONE: i32 = 6;
pub const EXIT_DOWN: i32 = 7;
pub const EXIT_STATUS: i32 = 8;
pub const EXIT_VERSION: i32 = 9;

#[derive(Parser, Debug)]
#[command(name = TOOL_NAME, no_binary_name = true, disable_help_flag = true, disable_version_flag = true)]
struct ToolArgs {
    /// Database connection URL
    db_url: String,

    /// Command to run
    #[arg(value_enum)]
    command: ToolCommand,
}

/// Commands understood by the tool
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCommand {
    /// Apply all pending migrations
    Up,
    /// Apply the next pending migration
    UpOne,
    /// Roll back the latest applied migration
    Down,
    /// Show the status of every migration
    Status,
    /// Show the current database version
    Version,
}

impl ToolCommand {
    /// Exit code reported when this command fails
    pub fn exit_code(&self) -> i32 {
        match self {
            ToolCommand::Up => EXIT_UP,
            ToolCommand::UpOne => EXIT_UP_ONE,
            ToolCommand::Down => EXIT_DOWN,
            ToolCommand::Status => EXIT_STATUS,
            ToolCommand::Version => EXIT_VERSION,
        }
    }
}

/// Validated migrations bound to a backend, ready to run commands
pub struct MigrationTool {
    runner: MigrationRunner,
    backend: Arc<dyn DatabaseBackend>,
}

impl MigrationTool {
    /// Validate `migrations` and bind them to `backend`; `None` uses the default config
    pub fn new(
        migrations: Vec<Migration>,
        backend: Arc<dyn DatabaseBackend>,
        config: Option<MigrateConfig>,
    ) -> MigrateResult<Self> {
        if migrations.is_empty() {
            return Err(MigrateError::NoMigrations);
        }

        let registry = MigrationRegistry::new(migrations)?;
        let runner = MigrationRunner::new(registry, config.unwrap_or_default());
        Ok(Self { runner, backend })
    }

    /// Use `options` for every transactional migration
    pub fn with_transaction_options(mut self, options: TransactionOptions) -> Self {
        self.runner = self.runner.with_transaction_options(options);
        self
    }

    pub fn runner(&self) -> &MigrationRunner {
        &self.runner
    }

    /// Run one command from `args` (without the program name) and return the
    /// process exit code. Progress goes to `out`, usage and errors to `err_out`.
    pub async fn run<I, T>(&self, args: I, out: &mut dyn Write, err_out: &mut dyn Write) -> i32
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args = match parse_args(args) {
            Ok(args) => args,
            Err(err) => return fail(EXIT_ARGUMENTS, &err, err_out),
        };

        let timeout = self.runner.config().timeout;
        let mut conn = match self.backend.connect(&args.db_url, timeout).await {
            Ok(conn) => conn,
            Err(err) => return fail(EXIT_CONNECT, &err, err_out),
        };

        let outcome = self.dispatch(&mut *conn, args.command, out).await;
        let closed = conn.close().await;

        match (outcome, closed) {
            (Err((code, err)), closed) => {
                if let Err(close_err) = closed {
                    tracing::warn!("Failed to close connection after error: {}", close_err);
                }
                fail(code, &err, err_out)
            }
            (Ok(()), Err(err)) => fail(EXIT_CLOSE, &err, err_out),
            (Ok(()), Ok(())) => EXIT_SUCCESS,
        }
    }

    async fn dispatch(
        &self,
        conn: &mut dyn DatabaseConnection,
        command: ToolCommand,
        out: &mut dyn Write,
    ) -> Result<(), (i32, MigrateError)> {
        self.runner
            .ensure_ledger(&mut *conn)
            .await
            .map_err(|err| (EXIT_LEDGER_TABLE, err))?;

        tracing::debug!("Running command {:?}", command);
        let result = match command {
            ToolCommand::Up => self.runner.apply_all(conn, out).await.map(|_| ()),
            ToolCommand::UpOne => self.runner.apply_one(conn, out).await.map(|_| ()),
            ToolCommand::Down => self.runner.rollback_one(conn, out).await.map(|_| ()),
            ToolCommand::Status => self.runner.status(conn, out).await.map(|_| ()),
            ToolCommand::Version => self.runner.report_version(conn, out).await.map(|_| ()),
        };

        result.map_err(|err| (command.exit_code(), err))
    }
}

fn parse_args<I, T>(args: I) -> MigrateResult<ToolArgs>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();

    if args.len() != 2 {
        return Err(MigrateError::InvalidArguments {
            message: "wrong number of arguments".to_string(),
        });
    }

    ToolArgs::try_parse_from(args.iter().cloned()).map_err(|err| {
        let message = match err.kind() {
            clap::error::ErrorKind::InvalidValue => {
                format!("unknown command: {:?}", args[1].to_string_lossy())
            }
            _ => parse_error_summary(&err),
        };
        MigrateError::InvalidArguments { message }
    })
}

/// First line of a clap error without its `error: ` prefix; the usage line is printed separately
fn parse_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or_default().trim();
    first.strip_prefix("error: ").unwrap_or(first).to_string()
}

fn fail(code: i32, err: &MigrateError, err_out: &mut dyn Write) -> i32 {
    tracing::error!("{} failed with exit code {}: {}", TOOL_NAME, code, err);
    let _ = writeln!(err_out, "{}\n{}", USAGE, err);
    code
}
