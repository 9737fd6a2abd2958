pub mod candidates;
pub mod portfolio_manager;
pub mod state;
pub mod transaction_specialist;

pub use candidates::CandidateGroup;
pub use portfolio_manager::{
    AcceptedMove, CandidateScore, OperationalRules, PipelineError, PipelineSettings,
    PortfolioManager, RunCause, RunReport, ScoringWeights, StalenessError,
};
pub use state::{RunState, RunTrace};
pub use transaction_specialist::{PlanError, TransactionSpecialist};
