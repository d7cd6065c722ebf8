// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serialite - serialized async access to an embedded SQLite database.
//!
//! This is the binary entry point. Each subcommand opens one connection on
//! an owner runtime, runs its calls through the scheduler and closes it.

mod backup;
mod query;
mod session;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serialite_core::SerialiteError;
use serialite_runtime::{OwnerRuntime, RuntimeOptions};

use crate::session::Session;

/// Serialite - serialized async access to an embedded SQLite database.
#[derive(Parser, Debug)]
#[command(name = "serialite", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print each SQL statement as it starts.
    #[arg(long, global = true)]
    trace: bool,

    /// Print each SQL statement with its run time once it finishes.
    #[arg(long, global = true)]
    profile: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one or more SQL statements, discarding their rows.
    Exec {
        /// Database file (or `:memory:`).
        db: String,
        sql: String,
    },
    /// Run a query and print its rows as JSON lines.
    Query { db: String, sql: String },
    /// Copy a database into DEST with the online backup API.
    Backup {
        db: String,
        dest: String,
        /// Pages copied per step (negative copies everything at once).
        #[arg(long, allow_negative_numbers = true)]
        pages: Option<i32>,
    },
    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => serialite_config::load_and_validate_path(path),
        None => serialite_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            serialite_config::render_errors(&errors);
            return ExitCode::from(2);
        }
    };

    if matches!(cli.command, Commands::Config) {
        return match serialite_config::to_toml(&config) {
            Ok(rendered) => {
                print!("{rendered}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("serialite: {err}");
                ExitCode::FAILURE
            }
        };
    }

    init_tracing(&config.log.level);

    let options = RuntimeOptions {
        max_worker_threads: config.runtime.max_worker_threads,
        thread_name: config.runtime.thread_name.clone(),
    };
    let runtime = match OwnerRuntime::new(&options) {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("serialite: failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let session = Session::new(config, cli.trace, cli.profile);
    match runtime.block_on(run(&session, cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("serialite: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(session: &Session, command: Commands) -> Result<(), SerialiteError> {
    match command {
        Commands::Exec { db, sql } => session.exec(&db, &sql).await,
        Commands::Query { db, sql } => query::run_query(session, &db, &sql).await,
        Commands::Backup { db, dest, pages } => backup::run_backup(session, &db, &dest, pages).await,
        Commands::Config => Ok(()),
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
/// Output goes to stderr so query rows on stdout stay machine-readable.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("serialite={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
