//! Domain Layer - Core types for the allocation pipeline
//!
//! Pure data types and validation with no I/O. All external interactions
//! happen through the ports layer.
//!
//! - `market`: Normalized lending-market snapshots and the per-run market view
//! - `wallet`: Validated wallet positions and per-protocol valuation
//! - `risk`: Risk levels, profiles, verdicts and limit checks
//! - `signal`: Scoring signals shared by all strategies
//! - `recommendation`: Candidate moves and the recommendation record
//! - `execution`: Idempotent execution steps and receipts

pub mod market;
pub mod wallet;
pub mod risk;
pub mod signal;
pub mod recommendation;
pub mod execution;

pub use market::{MarketSnapshot, MarketView, Placement, SnapshotBatch};
pub use wallet::{PositionRole, ProtocolBook, WalletError, WalletPosition, WalletState};
pub use risk::{ProfileError, RiskCheck, RiskLevel, RiskProfile, RiskVerdict, RiskViolation};
pub use signal::{Producer, Signal};
pub use recommendation::{AllocationRecommendation, CandidateMove, RecommendationStatus, TransitionError};
pub use execution::{ExecutionReport, ExecutionStep, IdempotencyKey, PartialExecutionError, StepReceipt};
