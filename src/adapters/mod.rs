//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - HTTP: market and wallet data API client
//! - Fixtures: the same data read from JSON files
//! - Paper: idempotent logging executor
//! - Static sources: knowledge base and risk profiles from configuration
//! - CLI: Command-line interface handlers

pub mod cli;
pub mod fixtures;
pub mod http;
pub mod paper;
pub mod static_sources;
pub mod wire;

pub use cli::CliApp;
pub use fixtures::{FileMarketProvider, FileWalletProvider};
pub use http::{LendingApiClient, LendingApiConfig};
pub use paper::PaperExecutor;
pub use static_sources::{ConfigRiskParameters, StaticKnowledgeBase};
