use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{CandidateMove, MarketView, RiskProfile, Signal, WalletState};

/// Strategy evaluation errors
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum StrategyError {
    #[error("No market data for {0}")]
    MissingMarket(String),

    #[error("Invalid candidate: {0}")]
    InvalidCandidate(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Immutable inputs shared by every strategy task of one run
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub market: MarketView,
    pub wallet: WalletState,
    pub profile: RiskProfile,
}

/// A side-effect-free producer of signals.
///
/// Implementations are called concurrently from independent tasks and must
/// not hold mutable state between calls.
pub trait SignalStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn assess(&self, mv: &CandidateMove, ctx: &AnalysisContext) -> Result<Signal, StrategyError>;
}
