//! Allocation Recommendation
//!
//! Candidate moves and the recommendation record. A recommendation starts in
//! `Recommending` and moves exactly once to a terminal status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::market::Placement;
use super::risk::RiskLevel;

/// Moving `amount` of an asset from one placement to another.
///
/// A non-zero `borrow_amount` loops extra debt on the destination: the
/// borrowed amount is supplied back as collateral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMove {
    pub from: Placement,
    pub to: Placement,
    pub amount: f64,
    #[serde(default)]
    pub borrow_amount: f64,
}

impl CandidateMove {
    pub fn new(from: Placement, to: Placement, amount: f64) -> Self {
        Self {
            from,
            to,
            amount,
            borrow_amount: 0.0,
        }
    }

    pub fn leveraged(from: Placement, to: Placement, amount: f64, borrow_amount: f64) -> Self {
        Self {
            from,
            to,
            amount,
            borrow_amount,
        }
    }

    /// Pseudo-move representing keeping a position where it is
    pub fn hold(placement: Placement, amount: f64) -> Self {
        Self::new(placement.clone(), placement, amount)
    }

    pub fn is_hold(&self) -> bool {
        self.from == self.to && self.borrow_amount == 0.0
    }

    pub fn is_leveraged(&self) -> bool {
        self.borrow_amount > 0.0
    }

    /// Borrowed amount per unit of principal
    pub fn leverage_ratio(&self) -> f64 {
        if self.amount <= 0.0 {
            0.0
        } else {
            self.borrow_amount / self.amount
        }
    }
}

impl fmt::Display for CandidateMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_hold() {
            return write!(f, "hold {} {}", self.amount, self.from);
        }
        write!(f, "{} {} -> {}", self.amount, self.from, self.to)?;
        if self.is_leveraged() {
            write!(f, " (+{} borrowed)", self.borrow_amount)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationStatus {
    Recommending,
    Issued,
    Rejected,
    Stale,
}

impl RecommendationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecommendationStatus::Recommending)
    }
}

impl fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecommendationStatus::Recommending => "RECOMMENDING",
            RecommendationStatus::Issued => "ISSUED",
            RecommendationStatus::Rejected => "REJECTED",
            RecommendationStatus::Stale => "STALE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("Invalid transition {from} -> {to}")]
pub struct TransitionError {
    pub from: String,
    pub to: String,
}

impl TransitionError {
    pub fn new(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// The pipeline's decision for one wallet run.
///
/// Serialized verbatim for reporting collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRecommendation {
    id: String,
    wallet_id: String,
    risk_level: RiskLevel,
    snapshot_version: Option<u64>,
    moves: Vec<CandidateMove>,
    /// Portfolio APY change in percentage points
    expected_yield_delta: f64,
    /// Value-weighted change in risk score (negative = safer)
    risk_delta: f64,
    created_at: DateTime<Utc>,
    status: RecommendationStatus,
    reasons: Vec<String>,
}

impl AllocationRecommendation {
    pub fn pending(wallet_id: impl Into<String>, risk_level: RiskLevel, created_at: DateTime<Utc>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), wallet_id, risk_level, created_at)
    }

    pub fn with_id(
        id: impl Into<String>,
        wallet_id: impl Into<String>,
        risk_level: RiskLevel,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            wallet_id: wallet_id.into(),
            risk_level,
            snapshot_version: None,
            moves: Vec::new(),
            expected_yield_delta: 0.0,
            risk_delta: 0.0,
            created_at,
            status: RecommendationStatus::Recommending,
            reasons: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn snapshot_version(&self) -> Option<u64> {
        self.snapshot_version
    }

    pub fn moves(&self) -> &[CandidateMove] {
        &self.moves
    }

    pub fn expected_yield_delta(&self) -> f64 {
        self.expected_yield_delta
    }

    pub fn risk_delta(&self) -> f64 {
        self.risk_delta
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> RecommendationStatus {
        self.status
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    fn ensure_open(&self, to: RecommendationStatus) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            Err(TransitionError::new(self.status, to))
        } else {
            Ok(())
        }
    }

    pub fn set_snapshot_version(&mut self, version: u64) -> Result<(), TransitionError> {
        self.ensure_open(self.status)?;
        self.snapshot_version = Some(version);
        Ok(())
    }

    pub fn add_reason(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.ensure_open(self.status)?;
        self.reasons.push(reason.into());
        Ok(())
    }

    pub fn issue(
        &mut self,
        moves: Vec<CandidateMove>,
        expected_yield_delta: f64,
        risk_delta: f64,
    ) -> Result<(), TransitionError> {
        self.ensure_open(RecommendationStatus::Issued)?;
        if moves.is_empty() {
            return Err(TransitionError::new(self.status, "ISSUED with no moves"));
        }
        self.moves = moves;
        self.expected_yield_delta = expected_yield_delta;
        self.risk_delta = risk_delta;
        self.status = RecommendationStatus::Issued;
        Ok(())
    }

    /// Record a no-op decision
    pub fn reject(&mut self, reasons: Vec<String>) -> Result<(), TransitionError> {
        self.ensure_open(RecommendationStatus::Rejected)?;
        self.reasons.extend(reasons);
        self.status = RecommendationStatus::Rejected;
        Ok(())
    }

    pub fn mark_stale(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.ensure_open(RecommendationStatus::Stale)?;
        self.reasons.push(reason.into());
        self.status = RecommendationStatus::Stale;
        Ok(())
    }

    /// Total amount leaving placements of the given asset
    pub fn outflow(&self, asset: &str) -> f64 {
        self.moves
            .iter()
            .filter(|m| m.from.asset == asset)
            .map(|m| m.amount)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc_move(amount: f64) -> CandidateMove {
        CandidateMove::new(
            Placement::new("kamino", "USDC"),
            Placement::new("marginfi", "USDC"),
            amount,
        )
    }

    #[test]
    fn test_hold_detection() {
        let hold = CandidateMove::hold(Placement::new("kamino", "USDC"), 10.0);
        assert!(hold.is_hold());
        assert!(!usdc_move(10.0).is_hold());
        assert_eq!(hold.to_string(), "hold 10 USDC@kamino");
    }

    #[test]
    fn test_issue_is_final() {
        let mut rec = AllocationRecommendation::with_id("r1", "w", RiskLevel::Low, Utc::now());
        assert_eq!(rec.status(), RecommendationStatus::Recommending);

        rec.issue(vec![usdc_move(100.0)], 2.0, 0.0).unwrap();
        assert_eq!(rec.status(), RecommendationStatus::Issued);

        assert!(rec.reject(vec!["late".into()]).is_err());
        assert!(rec.mark_stale("late").is_err());
        assert!(rec.set_snapshot_version(9).is_err());
        assert_eq!(rec.status(), RecommendationStatus::Issued);
    }

    #[test]
    fn test_issue_requires_moves() {
        let mut rec = AllocationRecommendation::with_id("r1", "w", RiskLevel::Low, Utc::now());
        assert!(rec.issue(vec![], 0.0, 0.0).is_err());
        assert_eq!(rec.status(), RecommendationStatus::Recommending);
    }

    #[test]
    fn test_reject_keeps_reasons() {
        let mut rec = AllocationRecommendation::with_id("r1", "w", RiskLevel::High, Utc::now());
        rec.reject(vec!["no eligible moves".into()]).unwrap();
        assert_eq!(rec.reasons(), &["no eligible moves".to_string()]);
        assert!(rec.moves().is_empty());
    }

    #[test]
    fn test_serializes_status_uppercase() {
        let mut rec = AllocationRecommendation::with_id("r1", "w", RiskLevel::Med, Utc::now());
        rec.mark_stale("old data").unwrap();
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["status"], "STALE");
        assert_eq!(json["risk_level"], "med");
    }

    #[test]
    fn test_outflow_sums_by_asset() {
        let mut rec = AllocationRecommendation::with_id("r1", "w", RiskLevel::Low, Utc::now());
        let sol = CandidateMove::new(Placement::new("kamino", "SOL"), Placement::new("solend", "SOL"), 3.0);
        rec.issue(vec![usdc_move(40.0), usdc_move(60.0), sol], 1.0, 0.0).unwrap();
        assert_eq!(rec.outflow("USDC"), 100.0);
        assert_eq!(rec.outflow("SOL"), 3.0);
    }
}
