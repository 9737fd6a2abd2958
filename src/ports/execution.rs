use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ExecutionStep, StepReceipt};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Execution collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("Step rejected by protocol: {0}")]
    Rejected(String),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

/// External collaborator that applies one step.
///
/// Must honour the idempotency key: a step submitted again with a key it has
/// already applied returns the original receipt without a second effect.
#[async_trait]
pub trait ExecutionPort: Send + Sync {
    async fn execute_step(&self, step: &ExecutionStep) -> Result<StepReceipt, ExecutionError>;
}
