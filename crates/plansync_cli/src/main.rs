//! plansync CLI
//!
//! Command-line tools for the plansync engine.
//!
//! # Commands
//!
//! - `simulate` - Run a JSON scenario against in-memory stores and backends
//! - `inspect` - Summarize a state file written by `simulate --save-state`
//! - `classify` - Show how a backend response would be treated

mod commands;
mod error;
mod scenario;

use clap::{Parser, Subcommand, ValueEnum};
use commands::simulate::SimulateOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// plansync command-line tools.
#[derive(Parser)]
#[command(name = "plansync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format of reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync scenario against in-memory collaborators
    Simulate {
        /// Scenario JSON file
        scenario: PathBuf,

        /// Rows per pulled page
        #[arg(short, long, default_value_t = 100)]
        page_size: usize,

        /// Rows per bulk insert
        #[arg(short, long, default_value_t = 100)]
        batch_size: usize,

        /// Stop pulling after a page shorter than the page size
        #[arg(long)]
        short_page: bool,

        /// Do not retry failed bulk inserts row by row
        #[arg(long)]
        no_fallback: bool,

        /// Number of passes to run
        #[arg(long, default_value_t = 1)]
        passes: usize,

        /// Keep syncing later entities after one fails
        #[arg(long)]
        keep_going: bool,

        /// Write the local stores to this CBOR file
        #[arg(long)]
        save_state: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Summarize a saved state file
    Inspect {
        /// State file written by `simulate --save-state`
        state: PathBuf,

        /// List conflict log entries
        #[arg(short, long)]
        conflicts: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Classify a backend response
    Classify {
        /// HTTP status, 0 for no response
        status: u16,

        /// Backend error code, e.g. 23505
        #[arg(short, long)]
        code: Option<String>,

        /// Retry-After header value
        #[arg(short, long)]
        retry_after: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            scenario,
            page_size,
            batch_size,
            short_page,
            no_fallback,
            passes,
            keep_going,
            save_state,
            format,
        } => {
            let options = SimulateOptions {
                page_size,
                batch_size,
                short_page,
                no_fallback,
                passes,
                keep_going,
            };
            commands::simulate::run(&scenario, &options, format, save_state.as_deref())?;
        }
        Commands::Inspect {
            state,
            conflicts,
            format,
        } => {
            commands::inspect::run(&state, conflicts, format)?;
        }
        Commands::Classify {
            status,
            code,
            retry_after,
            format,
        } => {
            commands::classify::run(status, code.as_deref(), retry_after.as_deref(), format)?;
        }
        Commands::Version => {
            println!("plansync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
