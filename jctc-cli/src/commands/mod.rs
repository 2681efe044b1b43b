//! CLI Commands Module
//!
//! Command definitions for the `jctc` tool.

pub mod archive;
pub mod run;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// JCTC retention engine CLI
#[derive(Parser, Debug)]
#[command(name = "jctc")]
#[command(author = "JCTC Platform Team")]
#[command(version)]
#[command(about = "JCTC Retention & Archival Command Line Interface")]
#[command(long_about = "A command-line tool for the JCTC retention engine.\n\n\
    Use this tool to run retention passes, search and verify archives, and \
    restore archived records into temporary staging.")]
pub struct Cli {
    /// Data directory (env: JCTC_DATA_DIR)
    #[arg(short, long, env = "JCTC_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Output format (json, table)
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Table format (human-readable)
    #[default]
    Table,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one retention pass over a fixture of entities, policies and holds
    Run(run::RunArgs),

    /// Search archived records
    Search(archive::SearchArgs),

    /// Verify an archive against its stored checksum
    Verify {
        /// Archive identifier
        archive_id: String,
    },

    /// Restore an archive into temporary staging
    Restore(archive::RestoreArgs),

    /// Print the effective configuration
    Config,
}
