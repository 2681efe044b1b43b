//! JCTC CLI Entry Point
//!
//! Configuration is loaded from `JCTC_*` environment variables (via .env
//! file). Command-line arguments override environment variables.

use clap::Parser;
use jctc_cli::{handler, Cli};
use jctc_storage::{init_logging, LogLevel, RetentionConfig};

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = RetentionConfig::from_env();

    if cli.verbose {
        let mut logging = config.logging.clone().with_level(LogLevel::Debug);
        if let Ok(filter) = std::env::var("RUST_LOG") {
            logging.filter = Some(filter);
        }
        if let Err(e) = init_logging(&logging) {
            eprintln!("Warning: logging disabled: {}", e);
        }
    }

    if let Err(e) = handler::run(cli, config).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
