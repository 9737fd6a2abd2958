//! Paper execution
//!
//! Logs each step instead of submitting it. Keeps a ledger keyed by
//! idempotency key so resubmitted steps return their first receipt.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{ExecutionStep, StepReceipt};
use crate::ports::{ExecutionError, ExecutionPort};

#[derive(Debug, Default)]
pub struct PaperExecutor {
    ledger: RwLock<HashMap<String, StepReceipt>>,
    /// Step index that fails once, for rehearsing partial execution
    fail_at: RwLock<Option<usize>>,
}

impl PaperExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(index: usize) -> Self {
        Self {
            ledger: RwLock::new(HashMap::new()),
            fail_at: RwLock::new(Some(index)),
        }
    }

    /// Number of distinct steps applied
    pub async fn applied(&self) -> usize {
        self.ledger.read().await.len()
    }
}

#[async_trait]
impl ExecutionPort for PaperExecutor {
    async fn execute_step(&self, step: &ExecutionStep) -> Result<StepReceipt, ExecutionError> {
        if let Some(receipt) = self.ledger.read().await.get(step.idempotency_key.as_str()) {
            tracing::info!("PAPER step {} already applied, returning receipt", step.idempotency_key);
            return Ok(receipt.clone());
        }

        {
            let mut fail_at = self.fail_at.write().await;
            if *fail_at == Some(step.index) {
                *fail_at = None;
                return Err(ExecutionError::Unavailable(format!(
                    "simulated failure at step {}",
                    step.index
                )));
            }
        }

        let receipt = StepReceipt {
            index: step.index,
            idempotency_key: step.idempotency_key.clone(),
            reference: format!("paper-{}", step.idempotency_key),
        };
        tracing::info!("PAPER MOVE - {} [{}]", step.mv, step.idempotency_key);

        self.ledger
            .write()
            .await
            .entry(step.idempotency_key.to_string())
            .or_insert(receipt.clone());
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::TransactionSpecialist;
    use crate::domain::{AllocationRecommendation, CandidateMove, Placement, RiskLevel};
    use chrono::Utc;

    fn plan(n: usize) -> Vec<ExecutionStep> {
        let mut rec = AllocationRecommendation::with_id("rec-p", "w", RiskLevel::Low, Utc::now());
        let moves = (0..n)
            .map(|i| {
                CandidateMove::new(
                    Placement::new(format!("src{i}"), "USDC"),
                    Placement::new("dst", "USDC"),
                    1.0,
                )
            })
            .collect();
        rec.issue(moves, 0.5, 0.0).unwrap();
        TransactionSpecialist::new().plan(&rec).unwrap()
    }

    #[tokio::test]
    async fn test_resubmission_has_no_second_effect() {
        let executor = PaperExecutor::new();
        let steps = plan(1);

        let first = executor.execute_step(&steps[0]).await.unwrap();
        let second = executor.execute_step(&steps[0]).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(executor.applied().await, 1);
    }

    #[tokio::test]
    async fn test_failure_then_resume() {
        let executor = PaperExecutor::failing_at(1);
        let specialist = TransactionSpecialist::new();
        let steps = plan(3);

        let err = specialist.execute(&steps, &executor).await.unwrap_err();
        assert_eq!(err.failed, 1);
        assert_eq!(executor.applied().await, 1);

        let report = specialist.execute_from(&steps, 0, &executor).await.unwrap();
        assert_eq!(report.receipts.len(), 3);
        assert_eq!(executor.applied().await, 3);
    }
}
