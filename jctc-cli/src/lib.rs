//! JCTC CLI - Command Line Interface
//!
//! Drives the retention engine against a local deployment.
//!
//! # Usage
//!
//! ```text
//! jctc [OPTIONS] <COMMAND>
//!
//! Commands:
//!   run       Run one retention pass over a fixture
//!   search    Search archived records
//!   verify    Verify an archive against its stored checksum
//!   restore   Restore an archive into temporary staging
//!   config    Print the effective configuration
//!
//! Options:
//!   -d, --data-dir <DIR>   Data directory [env: JCTC_DATA_DIR]
//!   -f, --format <FORMAT>  Output format (json, table) [default: table]
//!   -v, --verbose          Enable verbose output
//! ```
//!
//! # Examples
//!
//! ```text
//! jctc run --dry-run --policy evidence-7y --fixture population.json
//! jctc search --entity-type evidence --from 2024-01-01 --limit 50
//! jctc restore 6f1c... --hours 24 --reason "Appeal review" --role records_officer
//! ```

pub mod commands;
pub mod error;
pub mod fixture;
pub mod handler;
pub mod holds;
pub mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use error::{CliError, CliResult};
pub use fixture::Fixture;

/// JCTC CLI version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
