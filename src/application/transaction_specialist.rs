//! Transaction Specialist
//!
//! Turns an ISSUED recommendation into an ordered execution plan and drives
//! an `ExecutionPort` through it, one step at a time. A failed step halts the
//! plan; nothing is retried here.

use thiserror::Error;

use crate::domain::{
    AllocationRecommendation, ExecutionReport, ExecutionStep, IdempotencyKey,
    PartialExecutionError, RecommendationStatus,
};
use crate::ports::ExecutionPort;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanError {
    #[error("Recommendation {id} is {status}, only ISSUED recommendations can be planned")]
    NotIssued {
        id: String,
        status: RecommendationStatus,
    },

    #[error("Step {0} is outside the plan")]
    StepOutOfRange(usize),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionSpecialist;

impl TransactionSpecialist {
    pub fn new() -> Self {
        Self
    }

    pub fn plan(&self, recommendation: &AllocationRecommendation) -> Result<Vec<ExecutionStep>, PlanError> {
        if recommendation.status() != RecommendationStatus::Issued {
            return Err(PlanError::NotIssued {
                id: recommendation.id().to_string(),
                status: recommendation.status(),
            });
        }

        Ok(recommendation
            .moves()
            .iter()
            .enumerate()
            .map(|(index, mv)| ExecutionStep {
                index,
                recommendation_id: recommendation.id().to_string(),
                idempotency_key: IdempotencyKey::derive(recommendation.id(), index),
                mv: mv.clone(),
            })
            .collect())
    }

    /// Runs the whole plan in order
    pub async fn execute(
        &self,
        plan: &[ExecutionStep],
        executor: &dyn ExecutionPort,
    ) -> Result<ExecutionReport, PartialExecutionError> {
        self.run_steps(plan, 0, executor).await
    }

    /// Resumes a halted plan at `start`. Steps already applied are safe to
    /// resubmit since the executor deduplicates on the idempotency key.
    pub async fn execute_from(
        &self,
        plan: &[ExecutionStep],
        start: usize,
        executor: &dyn ExecutionPort,
    ) -> Result<ExecutionReport, PartialExecutionError> {
        if start > plan.len() {
            return Err(PartialExecutionError {
                recommendation_id: recommendation_id(plan),
                completed: Vec::new(),
                failed: start,
                reason: PlanError::StepOutOfRange(start).to_string(),
                receipts: Vec::new(),
            });
        }
        self.run_steps(plan, start, executor).await
    }

    async fn run_steps(
        &self,
        plan: &[ExecutionStep],
        start: usize,
        executor: &dyn ExecutionPort,
    ) -> Result<ExecutionReport, PartialExecutionError> {
        let id = recommendation_id(plan);
        let mut receipts = Vec::new();

        for step in plan.iter().skip(start) {
            tracing::info!("Executing step {} [{}]: {}", step.index, step.idempotency_key, step.mv);
            match executor.execute_step(step).await {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => {
                    tracing::error!("Step {} failed: {}", step.index, e);
                    return Err(PartialExecutionError {
                        recommendation_id: id,
                        completed: receipts.iter().map(|r| r.index).collect(),
                        failed: step.index,
                        reason: e.to_string(),
                        receipts,
                    });
                }
            }
        }

        tracing::info!("Executed {} steps for {}", receipts.len(), id);
        Ok(ExecutionReport {
            recommendation_id: id,
            receipts,
        })
    }
}

fn recommendation_id(plan: &[ExecutionStep]) -> String {
    plan.first()
        .map(|s| s.recommendation_id.clone())
        .unwrap_or_default()
}
