//! opsql command line
//!
//! ```bash
//! # Execute and roll back, printing the reports
//! DATABASE_DSN=postgres://localhost/app opsql plan -c ops.yaml
//!
//! # Execute and commit if every assertion passes
//! opsql apply -c ops.yaml -c more.yaml -e prod
//!
//! # Either, chosen by flag
//! opsql run --dry-run -c ops.yaml
//! ```

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use opsql::{commands, CommonArgs, RunConfig};
use opsql_core::RunMode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "opsql")]
#[command(version)]
#[command(about = "Run operational SQL from YAML definitions with dry-run and result assertions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute operations; commits unless --dry-run is given
    Run {
        /// Roll back instead of committing
        #[arg(short = 'd', long)]
        dry_run: bool,

        #[command(flatten)]
        args: CommonArgs,
    },

    /// Execute operations and always roll back
    Plan {
        #[command(flatten)]
        args: CommonArgs,
    },

    /// Execute operations and commit if every assertion passes
    Apply {
        #[command(flatten)]
        args: CommonArgs,
    },
}

/// `RUST_LOG` directives when set and valid, `warn` otherwise.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env before parsing so env-backed flags see it
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (args, mode) = match cli.command {
        Commands::Run { dry_run, args } => {
            (args, if dry_run { RunMode::Plan } else { RunMode::Apply })
        }
        Commands::Plan { args } => (args, RunMode::Plan),
        Commands::Apply { args } => (args, RunMode::Apply),
    };

    let result = match RunConfig::from_args(args, mode) {
        Ok(config) => commands::run(&config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
