// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `forkdb` command-line tool.

mod doctor;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use forkdb::{ForkDb, ForkdbConfig, QueryOptions, Value};

/// Run statements against embedded databases through isolated worker processes.
#[derive(Parser, Debug)]
#[command(name = "forkdb", version, about, long_about = None)]
struct Cli {
    /// Configuration file to load instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one statement and print its rows as JSON lines.
    Exec {
        /// Database file.
        path: String,
        /// Statement text.
        sql: String,
        /// Positional parameters, bound as text.
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
        /// Worker id serving the statement.
        #[arg(long, default_value_t = 1)]
        worker: u32,
        #[arg(long, default_value_t = forkdb::DEFAULT_MAX_ROWS)]
        max_rows: usize,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        /// Print row counts after the rows.
        #[arg(long)]
        counts: bool,
        /// Property overrides as name=value.
        #[arg(long = "set")]
        settings: Vec<String>,
    },
    /// Print the effective configuration as TOML.
    Config,
    /// Check that a worker can be spawned and answer a query.
    Doctor {
        /// Disable colored output.
        #[arg(long)]
        plain: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => forkdb_config::load_and_validate_path(path),
        None => forkdb_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            forkdb_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    init_tracing(&config.log.level);

    let result = match cli.command {
        Some(Commands::Exec {
            path,
            sql,
            params,
            worker,
            max_rows,
            skip,
            counts,
            settings,
        }) => {
            let options = QueryOptions {
                skip,
                max_rows,
                include_counts: counts,
            };
            run_exec(config, &path, &sql, params, worker, &options, &settings)
        }
        Some(Commands::Config) => match config.to_toml_string() {
            Ok(text) => {
                print!("{text}");
                Ok(())
            }
            Err(err) => Err(forkdb::ForkDbError::Internal(err.to_string())),
        },
        Some(Commands::Doctor { plain }) => doctor::run_doctor(&config, plain),
        None => {
            println!("forkdb: use --help for available commands");
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("forkdb: {err}");
        std::process::exit(1);
    }
}

fn run_exec(
    config: ForkdbConfig,
    path: &str,
    sql: &str,
    params: Vec<String>,
    worker: u32,
    options: &QueryOptions,
    settings: &[String],
) -> Result<(), forkdb::ForkDbError> {
    let forkdb = ForkDb::sqlite(config)?;
    let mut database = forkdb.database(path);
    for setting in settings {
        let (name, value) = setting.split_once('=').ok_or_else(|| {
            forkdb::ForkDbError::Config(format!("expected name=value, got `{setting}`"))
        })?;
        database.set(worker, name.trim(), value.trim())?;
    }

    let params: Vec<Value> = params.into_iter().map(Value::from).collect();
    let result = database.exec(worker, sql, &params, options)?;
    for row in &result.rows {
        println!("{}", to_json(row)?);
    }
    if let Some(counts) = &result.counts {
        println!("{}", to_json(counts)?);
    }
    forkdb.shutdown();
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, forkdb::ForkDbError> {
    serde_json::to_string(value).map_err(|e| forkdb::ForkDbError::Internal(e.to_string()))
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("forkdb={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
