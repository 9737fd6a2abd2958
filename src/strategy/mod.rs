//! Strategy Layer - Market normalization and signal producers
//!
//! - `MarketDataAggregator`: raw feeds → validated snapshots
//! - `RiskManager`: projects the wallet through a move and scores the margin it uses
//! - `YieldAnalyst`: expected yield net of leverage cost and slippage
//!
//! Both producers implement `SignalStrategy` and are pure over an immutable
//! `AnalysisContext`, so the pipeline can run them on any number of tasks.

pub mod aggregator;
pub mod risk_manager;
pub mod slippage;
pub mod yield_analyst;

pub use aggregator::{DataIntegrityError, MarketDataAggregator, NormalizedBatch};
pub use risk_manager::RiskManager;
pub use slippage::LiquidityImpactSlippage;
pub use yield_analyst::{YieldAnalyst, YieldEstimate};
