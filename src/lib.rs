//! Lendwise - DeFi lending allocation recommendations
//!
//! Reads lending-market snapshots and a wallet's positions, scores every
//! candidate reallocation against a risk profile, and issues at most one
//! recommendation per run.
//!
//! # Modules
//!
//! - `domain`: Core types (MarketSnapshot, WalletState, RiskProfile, AllocationRecommendation)
//! - `ports`: Trait abstractions (MarketDataProvider, WalletDataProvider, ExecutionPort, SignalStrategy)
//! - `strategy`: Aggregation, risk evaluation and yield ranking
//! - `application`: Portfolio manager state machine and transaction planning
//! - `adapters`: External implementations (HTTP, files, paper execution, CLI)
//! - `config`: Configuration loading and validation

pub mod domain;
pub mod ports;
pub mod strategy;
pub mod adapters;
pub mod config;
pub mod application;
