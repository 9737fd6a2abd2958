//! Lendwise - DeFi lending allocation recommendations
//!
//! Reads lending-market data and a wallet's positions and issues at most one
//! risk-bounded reallocation per run.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use lendwise::adapters::cli::{self, CliApp, EXIT_CONFIG};
use lendwise::config::load_config;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if it exists (provider URL overrides go here)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();

    let config = match load_config(app.command.config_path()) {
        Ok(config) => config,
        Err(e) => {
            cli::init_logging(app.verbose, app.debug, None)?;
            tracing::error!("{}", e);
            eprintln!("Error: {} ({})", e, app.command.config_path().display());
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };

    cli::init_logging(app.verbose, app.debug, Some(&config.logging.level))?;
    cli::execute(app.command, config).await
}
