//! Execution plan types
//!
//! Steps handed to the execution collaborator, keyed so that a repeated
//! request for the same step has at most one effect.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::recommendation::CandidateMove;

/// Deterministic key for one step of one recommendation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(recommendation_id: &str, step_index: usize) -> Self {
        Self(format!("{}:{}", recommendation_id, step_index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub index: usize,
    pub recommendation_id: String,
    pub idempotency_key: IdempotencyKey,
    #[serde(rename = "move")]
    pub mv: CandidateMove,
}

/// Acknowledgement from the execution collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReceipt {
    pub index: usize,
    pub idempotency_key: IdempotencyKey,
    /// Collaborator-side reference (transaction id, ticket number, ...)
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub recommendation_id: String,
    pub receipts: Vec<StepReceipt>,
}

/// Execution stopped mid-plan; surfaced for manual reconciliation
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Execution of {recommendation_id} halted at step {failed}: {reason} (completed: {completed:?})")]
pub struct PartialExecutionError {
    pub recommendation_id: String,
    pub completed: Vec<usize>,
    pub failed: usize,
    pub reason: String,
    pub receipts: Vec<StepReceipt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_deterministic() {
        let a = IdempotencyKey::derive("rec-1", 0);
        let b = IdempotencyKey::derive("rec-1", 0);
        assert_eq!(a, b);
        assert_ne!(a, IdempotencyKey::derive("rec-1", 1));
        assert_ne!(a, IdempotencyKey::derive("rec-2", 0));
        assert_eq!(a.as_str(), "rec-1:0");
    }

    #[test]
    fn test_partial_error_display() {
        let err = PartialExecutionError {
            recommendation_id: "rec-1".into(),
            completed: vec![0, 1],
            failed: 2,
            reason: "protocol paused".into(),
            receipts: vec![],
        };
        let msg = err.to_string();
        assert!(msg.contains("step 2"));
        assert!(msg.contains("[0, 1]"));
    }
}
