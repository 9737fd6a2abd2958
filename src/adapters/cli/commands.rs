//! CLI Command Handlers
//!
//! Implementation of all CLI commands for the lendwise pipeline.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use crate::adapters::fixtures::{FileMarketProvider, FileWalletProvider};
use crate::adapters::http::{LendingApiClient, LendingApiConfig};
use crate::adapters::paper::PaperExecutor;
use crate::adapters::static_sources::{ConfigRiskParameters, StaticKnowledgeBase};
use crate::application::{PipelineError, PortfolioManager, TransactionSpecialist};
use crate::config::Config;
use crate::domain::{AllocationRecommendation, RecommendationStatus, RiskLevel};
use crate::ports::{
    Clock, MarketDataProvider, RiskParameters, SystemClock, WalletDataProvider,
};
use crate::strategy::{LiquidityImpactSlippage, YieldAnalyst};

/// Exit code for configuration and data-integrity failures
pub const EXIT_CONFIG: u8 = 2;

/// Lendwise - risk-bounded allocation recommendations for DeFi lending
#[derive(Parser, Debug)]
#[command(
    name = "lendwise",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = "Risk-bounded allocation recommendations for DeFi lending portfolios",
    long_about = "Lendwise reads lending-market data and a wallet's positions, scores \
                  every reallocation against a risk profile and issues at most one \
                  recommendation per run."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the pipeline once for a wallet
    Recommend(RecommendCmd),

    /// Turn an issued recommendation into execution steps
    Plan(PlanCmd),

    /// Show the configured risk profiles
    Profiles(ProfilesCmd),
}

impl Command {
    pub fn config_path(&self) -> &Path {
        match self {
            Command::Recommend(cmd) => &cmd.config,
            Command::Plan(cmd) => &cmd.config,
            Command::Profiles(cmd) => &cmd.config,
        }
    }
}

/// Produce a recommendation
#[derive(Parser, Debug)]
pub struct RecommendCmd {
    /// Wallet identifier
    #[arg(short, long, value_name = "ID")]
    pub wallet: String,

    /// Risk level (low, med, high)
    #[arg(short, long, value_name = "LEVEL", default_value = "med")]
    pub risk_level: RiskLevel,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/lendwise.toml")]
    pub config: PathBuf,

    /// Print the full run report instead of the recommendation
    #[arg(long)]
    pub report: bool,

    /// Execute an issued plan against the paper executor
    #[arg(short, long)]
    pub paper: bool,
}

/// Plan (and optionally paper-execute) a saved recommendation
#[derive(Parser, Debug)]
pub struct PlanCmd {
    /// Recommendation JSON written by `recommend`
    #[arg(value_name = "FILE")]
    pub recommendation: PathBuf,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/lendwise.toml")]
    pub config: PathBuf,

    /// Execute the plan against the paper executor
    #[arg(short, long)]
    pub paper: bool,

    /// First step to submit when resuming a halted plan
    #[arg(long, value_name = "STEP", default_value = "0")]
    pub start: usize,
}

/// Show risk profiles
#[derive(Parser, Debug)]
pub struct ProfilesCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/lendwise.toml")]
    pub config: PathBuf,
}

/// Execute the CLI command against a loaded configuration
pub async fn execute(command: Command, config: Config) -> Result<ExitCode> {
    match command {
        Command::Recommend(cmd) => recommend_command(cmd, config).await,
        Command::Plan(cmd) => plan_command(cmd).await,
        Command::Profiles(_) => profiles_command(&config),
    }
}

/// Initialize logging system.
///
/// `RUST_LOG` wins, then the flags, then the configured level.
pub fn init_logging(verbose: bool, debug: bool, configured: Option<&str>) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let fallback = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        configured.unwrap_or("warn")
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Wires providers, strategies and the manager from configuration
pub fn build_manager(config: &Config, versions: watch::Receiver<u64>) -> Result<PortfolioManager> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let settings = config.pipeline_settings();

    let api = LendingApiConfig {
        market_url: config.providers.get_market_url(),
        wallet_url: config.providers.get_wallet_url(),
        timeout: settings.source_timeout + Duration::from_secs(1),
    };

    let market: Arc<dyn MarketDataProvider> = match config.providers.market_file_path() {
        Some(path) => {
            tracing::info!("Market data from file {}", path);
            Arc::new(FileMarketProvider::new(path, clock.clone()))
        }
        None => {
            tracing::info!("Market data from {}", api.market_url);
            Arc::new(
                LendingApiClient::with_config(api.clone(), clock.clone())
                    .context("Failed to create market data client")?,
            )
        }
    };

    let wallet: Arc<dyn WalletDataProvider> = match config.providers.wallet_file_path() {
        Some(path) => {
            tracing::info!("Wallet data from file {}", path);
            Arc::new(FileWalletProvider::new(path))
        }
        None => {
            tracing::info!("Wallet data from {}", api.wallet_url);
            Arc::new(
                LendingApiClient::with_config(api, clock.clone())
                    .context("Failed to create wallet data client")?,
            )
        }
    };

    let risk_parameters: Arc<dyn RiskParameters> = Arc::new(ConfigRiskParameters::from_config(config));
    let knowledge = Arc::new(StaticKnowledgeBase::from_section(&config.knowledge));
    let slippage = Arc::new(LiquidityImpactSlippage::new(config.scoring.slippage_coefficient));
    let analyst = Arc::new(YieldAnalyst::new(
        slippage,
        knowledge,
        config.scoring.yield_ceiling_pct,
    ));

    Ok(PortfolioManager::new(
        market,
        wallet,
        risk_parameters,
        clock,
        analyst,
        settings,
        versions,
    ))
}

/// Handle recommend command
async fn recommend_command(cmd: RecommendCmd, config: Config) -> Result<ExitCode> {
    tracing::info!(
        "Recommending for wallet {} at risk level {}",
        cmd.wallet,
        cmd.risk_level
    );

    // Single-shot run: nothing publishes newer versions while it is in flight
    let (_version_tx, versions) = watch::channel(0u64);
    let manager = build_manager(&config, versions)?;

    let report = match manager.run(&cmd.wallet, cmd.risk_level).await {
        Ok(report) => report,
        Err(e @ (PipelineError::Configuration(_) | PipelineError::Profile(_))) => {
            eprintln!("Error: {}", e);
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
        Err(e) => return Err(e).context("Pipeline run failed"),
    };

    let output = if cmd.report {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string_pretty(&report.recommendation)?
    };
    println!("{}", output);

    if report.status() != RecommendationStatus::Issued {
        tracing::warn!(
            "Run ended {}: {}",
            report.status(),
            report.recommendation.reasons().join("; ")
        );
        return Ok(ExitCode::from(report.exit_code()));
    }

    if cmd.paper {
        tracing::warn!("PAPER EXECUTION - no real transactions");
        let executor = PaperExecutor::new();
        match TransactionSpecialist::new().execute(&report.plan, &executor).await {
            Ok(execution) => eprintln!("{}", serde_json::to_string_pretty(&execution)?),
            Err(partial) => {
                eprintln!("{}", partial);
                return Ok(ExitCode::from(1));
            }
        }
    }

    Ok(ExitCode::from(report.exit_code()))
}

/// Handle plan command
async fn plan_command(cmd: PlanCmd) -> Result<ExitCode> {
    let content = tokio::fs::read_to_string(&cmd.recommendation)
        .await
        .with_context(|| format!("Failed to read {}", cmd.recommendation.display()))?;
    let recommendation: AllocationRecommendation =
        serde_json::from_str(&content).context("Failed to parse recommendation")?;

    let specialist = TransactionSpecialist::new();
    let plan = match specialist.plan(&recommendation) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(ExitCode::from(1));
        }
    };
    println!("{}", serde_json::to_string_pretty(&plan)?);

    if cmd.paper {
        tracing::warn!("PAPER EXECUTION - no real transactions");
        let executor = PaperExecutor::new();
        match specialist.execute_from(&plan, cmd.start, &executor).await {
            Ok(execution) => eprintln!("Executed {} steps", execution.receipts.len()),
            Err(partial) => {
                eprintln!("{}", partial);
                return Ok(ExitCode::from(1));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Handle profiles command
fn profiles_command(config: &Config) -> Result<ExitCode> {
    println!("{:<6} {:>8} {:>14} {:>10}", "LEVEL", "MAX_LTV", "MAX_CONC/PROT", "MIN_BUF");
    for level in RiskLevel::ALL {
        let p = config.profile(level);
        println!(
            "{:<6} {:>8.2} {:>14.2} {:>10.2}",
            level.as_str(),
            p.max_ltv,
            p.max_concentration_per_protocol,
            p.min_liquidation_buffer
        );
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recommend() {
        let app = CliApp::try_parse_from([
            "lendwise", "recommend", "--wallet", "abc", "--risk-level", "high", "--paper",
        ])
        .unwrap();
        match app.command {
            Command::Recommend(cmd) => {
                assert_eq!(cmd.wallet, "abc");
                assert_eq!(cmd.risk_level, RiskLevel::High);
                assert!(cmd.paper);
                assert_eq!(cmd.config, PathBuf::from("config/lendwise.toml"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_risk_level() {
        let parsed = CliApp::try_parse_from(["lendwise", "recommend", "-w", "abc", "-r", "yolo"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_global_flags_and_config_path() {
        let app = CliApp::try_parse_from(["lendwise", "profiles", "-c", "other.toml", "--debug"]).unwrap();
        assert!(app.debug);
        assert_eq!(app.command.config_path(), Path::new("other.toml"));
    }
}
