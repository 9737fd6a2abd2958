//! Ports Layer - Trait definitions for external dependencies
//!
//! This module defines the interfaces (ports) that adapters must implement.
//! Following hexagonal architecture, these traits abstract:
//! - Market and wallet data feeds
//! - Research lookups and risk parameters
//! - Step execution
//! - Signal strategies

pub mod clock;
pub mod execution;
pub mod knowledge;
pub mod market_data;
pub mod risk_parameters;
pub mod slippage;
pub mod strategy;
pub mod wallet;

pub use clock::{Clock, FixedClock, SystemClock};
pub use execution::{ExecutionError, ExecutionPort};
pub use knowledge::{
    KnowledgeBase, ReliabilityTable, ResearchFact, DEFAULT_RELIABILITY, RELIABILITY_TOPIC,
};
pub use market_data::{MarketDataError, MarketDataProvider, RawMarketBatch, RawMarketFeed};
pub use risk_parameters::RiskParameters;
pub use slippage::SlippageModel;
pub use strategy::{AnalysisContext, SignalStrategy, StrategyError};
pub use wallet::{WalletDataError, WalletDataProvider};
