//! Run state machine
//!
//! COLLECTING → ANALYZING → RECONCILING → RECOMMENDING → {ISSUED | REJECTED}
//!
//! Any non-terminal state may drop to STALE. COLLECTING may go straight to
//! REJECTED on a hard data error.

use std::fmt;

use serde::Serialize;

use crate::domain::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Collecting,
    Analyzing,
    Reconciling,
    Recommending,
    Issued,
    Rejected,
    Stale,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Issued | RunState::Rejected | RunState::Stale)
    }

    pub fn can_advance_to(&self, next: RunState) -> bool {
        use RunState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Stale)
                | (Collecting, Analyzing)
                | (Collecting, Rejected)
                | (Analyzing, Reconciling)
                | (Reconciling, Recommending)
                | (Recommending, Issued)
                | (Recommending, Rejected)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Collecting => "COLLECTING",
            RunState::Analyzing => "ANALYZING",
            RunState::Reconciling => "RECONCILING",
            RunState::Recommending => "RECOMMENDING",
            RunState::Issued => "ISSUED",
            RunState::Rejected => "REJECTED",
            RunState::Stale => "STALE",
        };
        f.write_str(s)
    }
}

/// Ordered record of the states one run passed through
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunTrace {
    states: Vec<RunState>,
}

impl RunTrace {
    pub fn new() -> Self {
        Self {
            states: vec![RunState::Collecting],
        }
    }

    pub fn current(&self) -> RunState {
        self.states
            .last()
            .copied()
            .unwrap_or(RunState::Collecting)
    }

    pub fn states(&self) -> &[RunState] {
        &self.states
    }

    pub fn advance(&mut self, next: RunState) -> Result<(), TransitionError> {
        let current = self.current();
        if !current.can_advance_to(next) {
            return Err(TransitionError::new(current, next));
        }
        tracing::info!("Run state {} -> {}", current, next);
        self.states.push(next);
        Ok(())
    }
}

impl Default for RunTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut trace = RunTrace::new();
        for next in [
            RunState::Analyzing,
            RunState::Reconciling,
            RunState::Recommending,
            RunState::Issued,
        ] {
            trace.advance(next).unwrap();
        }
        assert_eq!(trace.current(), RunState::Issued);
        assert_eq!(trace.states().len(), 5);
    }

    #[test]
    fn test_stale_from_any_open_state() {
        for path in [
            vec![],
            vec![RunState::Analyzing],
            vec![RunState::Analyzing, RunState::Reconciling],
        ] {
            let mut trace = RunTrace::new();
            for s in path {
                trace.advance(s).unwrap();
            }
            assert!(trace.advance(RunState::Stale).is_ok());
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut trace = RunTrace::new();
        trace.advance(RunState::Stale).unwrap();
        assert!(trace.advance(RunState::Analyzing).is_err());
        assert!(trace.advance(RunState::Stale).is_err());
    }

    #[test]
    fn test_cannot_skip_states() {
        let mut trace = RunTrace::new();
        assert!(trace.advance(RunState::Recommending).is_err());
        assert!(trace.advance(RunState::Issued).is_err());
        trace.advance(RunState::Analyzing).unwrap();
        assert!(trace.advance(RunState::Rejected).is_err());
    }
}
