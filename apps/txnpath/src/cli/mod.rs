//! # txnpath CLI Module
//!
//! ## Available Commands
//!
//! - `build` - Learn one graph per procedure from a workload and write snapshots
//! - `inspect` - Summarize a snapshot file
//! - `validate` - Learn from a workload and audit every resulting graph

mod commands;

use crate::config::DriverConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use txnpath_core::TxnPathError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// txnpath - transaction-path models for partitioned OLTP workloads
///
/// Replays recorded transaction traces into per-procedure Markov graphs and
/// writes the learned forecasts.
#[derive(Parser, Debug)]
#[command(name = "txnpath")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress summary output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a TOML driver config
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Learn graphs from a workload and write one snapshot per procedure
    Build {
        /// Catalog file (JSON)
        #[arg(short, long)]
        catalog: PathBuf,

        /// Workload file: array of transaction traces (JSON)
        #[arg(short, long)]
        workload: PathBuf,

        /// Output directory, created if missing
        #[arg(short, long)]
        output: PathBuf,

        /// Snapshot format (json, binary)
        #[arg(short = 't', long, default_value = "json")]
        format: String,

        /// Audit every graph before writing it
        #[arg(long)]
        validate: bool,
    },

    /// Summarize a snapshot written by `build`
    Inspect {
        /// Snapshot file (JSON or binary)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Learn graphs from a workload and audit them without writing anything
    Validate {
        /// Catalog file (JSON)
        #[arg(short, long)]
        catalog: PathBuf,

        /// Workload file: array of transaction traces (JSON)
        #[arg(short, long)]
        workload: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), TxnPathError> {
    let config = DriverConfig::load(cli.config.as_deref())?;
    let output = Output {
        json_mode: cli.json_mode,
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match cli.command {
        Some(Commands::Build {
            catalog,
            workload,
            output: dir,
            format,
            validate,
        }) => cmd_build(&config, output, &catalog, &workload, &dir, &format, validate),
        Some(Commands::Inspect { input }) => cmd_inspect(&config, output, &input),
        Some(Commands::Validate { catalog, workload }) => {
            cmd_validate(&config, output, &catalog, &workload)
        }
        None => {
            println!("txnpath - transaction-path models");
            println!();
            println!("Use --help for usage information");
            Ok(())
        }
    }
}
