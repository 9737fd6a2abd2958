use crate::domain::{ProfileError, RiskLevel, RiskProfile};

/// Source of the risk profile for a level
#[cfg_attr(test, mockall::automock)]
pub trait RiskParameters: Send + Sync {
    fn load(&self, level: RiskLevel) -> Result<RiskProfile, ProfileError>;
}
