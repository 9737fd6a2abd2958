//! Risk Manager
//!
//! Projects the wallet through a candidate move and checks the result against
//! the risk profile:
//! - LTV: max debt/collateral over the affected protocols
//! - Concentration: destination share of total supplied value
//! - Liquidation buffer: min of 1 - LTV/threshold over the affected protocols
//!
//! risk_score = 0.4 * ltv_term + 0.3 * concentration_term + 0.3 * buffer_term

use std::collections::BTreeSet;

use crate::domain::{
    CandidateMove, MarketView, PositionRole, Producer, RiskCheck, RiskProfile, RiskVerdict, Signal,
    WalletState,
};
use crate::ports::{AnalysisContext, SignalStrategy, StrategyError};

pub const LTV_WEIGHT: f64 = 0.4;
pub const CONCENTRATION_WEIGHT: f64 = 0.3;
pub const BUFFER_WEIGHT: f64 = 0.3;

// Tolerance when comparing a move amount to the position it drains
const AMOUNT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default)]
pub struct RiskManager;

impl RiskManager {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        mv: &CandidateMove,
        wallet: &WalletState,
        market: &MarketView,
        profile: &RiskProfile,
    ) -> RiskVerdict {
        let mut reasons = Vec::new();

        let Some(destination) = market.get(&mv.to) else {
            return RiskVerdict {
                approved: false,
                risk_score: 1.0,
                reasons: vec![format!("No market data for {}", mv.to)],
            };
        };

        let held = wallet.amount(&mv.from, PositionRole::Supplied);
        if mv.amount > held + AMOUNT_EPSILON {
            reasons.push(format!(
                "Move of {} exceeds supplied balance {} on {}",
                mv.amount, held, mv.from
            ));
        }

        let projected = wallet.apply(mv);
        let affected: BTreeSet<&str> = [mv.from.protocol.as_str(), mv.to.protocol.as_str()]
            .into_iter()
            .collect();

        let books: Vec<_> = affected
            .iter()
            .map(|p| projected.book(p, market))
            .collect();
        let ltv = books.iter().map(|b| b.ltv()).fold(0.0, f64::max);
        let buffer = books
            .iter()
            .map(|b| b.liquidation_buffer())
            .fold(1.0, f64::min);
        let concentration = projected.concentration(&mv.to.protocol, market);
        let baseline = wallet.max_concentration(market);

        if let Err(v) = profile.validate_ltv(ltv) {
            reasons.push(v.to_string());
        }
        if let Err(v) = profile.validate_concentration(concentration, baseline) {
            reasons.push(v.to_string());
        }
        if let Err(v) = profile.validate_liquidation_buffer(buffer) {
            reasons.push(v.to_string());
        }

        if mv.is_leveraged() {
            let dest_ltv = projected.book(&mv.to.protocol, market).ltv();
            if dest_ltv > destination.ltv {
                reasons.push(format!(
                    "Borrow exceeds {} collateral limit ({:.3} > {:.3})",
                    mv.to, dest_ltv, destination.ltv
                ));
            }
        }

        let risk_score = Self::risk_score(profile, ltv, concentration, buffer);
        tracing::debug!(
            "Risk {}: ltv={:.3} conc={:.3} buffer={:.3} score={:.3}",
            mv,
            ltv,
            concentration,
            buffer,
            risk_score
        );

        RiskVerdict {
            approved: reasons.is_empty(),
            risk_score,
            reasons,
        }
    }

    /// Weighted margin usage; every term is in [0, 1] and lower is safer
    pub fn risk_score(profile: &RiskProfile, ltv: f64, concentration: f64, buffer: f64) -> f64 {
        let ltv_term = ratio_term(ltv, profile.max_ltv);
        let concentration_term = ratio_term(concentration, profile.max_concentration_per_protocol);
        let buffer_term = (1.0 - buffer).clamp(0.0, 1.0);

        LTV_WEIGHT * ltv_term + CONCENTRATION_WEIGHT * concentration_term + BUFFER_WEIGHT * buffer_term
    }
}

fn ratio_term(value: f64, limit: f64) -> f64 {
    if value <= 0.0 {
        0.0
    } else if limit <= 0.0 {
        1.0
    } else {
        (value / limit).clamp(0.0, 1.0)
    }
}

impl SignalStrategy for RiskManager {
    fn name(&self) -> &str {
        "risk_manager"
    }

    fn assess(&self, mv: &CandidateMove, ctx: &AnalysisContext) -> Result<Signal, StrategyError> {
        if mv.amount <= 0.0 || !mv.amount.is_finite() {
            return Err(StrategyError::InvalidCandidate(format!("non-positive amount in {mv}")));
        }

        let verdict = self.evaluate(mv, &ctx.wallet, &ctx.market, &ctx.profile);
        let mut signal = Signal::new(
            Producer::Risk,
            &mv.to.protocol,
            &mv.to.asset,
            verdict.risk_score,
            verdict.risk_score,
        );
        for reason in verdict.reasons {
            signal = signal.with_rationale(reason);
        }
        if !verdict.approved {
            signal = signal.vetoed();
        }
        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::fixtures::snapshot;
    use crate::domain::{MarketSnapshot, Placement, RiskLevel, WalletPosition};
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn profile(level: RiskLevel, max_ltv: f64, max_conc: f64, min_buffer: f64) -> RiskProfile {
        RiskProfile {
            level,
            max_ltv,
            max_concentration_per_protocol: max_conc,
            min_liquidation_buffer: min_buffer,
        }
    }

    fn market(extra: Vec<MarketSnapshot>) -> MarketView {
        let now = Utc::now();
        let mut snaps = vec![
            snapshot("protocol_a", "USDC", 4.0, now),
            snapshot("protocol_b", "USDC", 6.0, now),
        ];
        snaps.extend(extra);
        MarketView::new(1, snaps)
    }

    fn single_position() -> WalletState {
        WalletState::new("w1", vec![WalletPosition::supplied("protocol_a", "USDC", 100.0)]).unwrap()
    }

    #[test]
    fn test_plain_move_is_approved_when_not_concentrating_further() {
        let mv = CandidateMove::new(
            Placement::new("protocol_a", "USDC"),
            Placement::new("protocol_b", "USDC"),
            100.0,
        );
        let verdict = RiskManager::new().evaluate(
            &mv,
            &single_position(),
            &market(vec![]),
            &profile(RiskLevel::Low, 0.3, 0.2, 0.5),
        );
        assert!(verdict.approved, "{:?}", verdict.reasons);
        // no debt, fully concentrated
        assert_relative_eq!(verdict.risk_score, 0.3);
    }

    #[test]
    fn test_leveraged_move_over_max_ltv_is_rejected() {
        let mv = CandidateMove::leveraged(
            Placement::new("protocol_a", "USDC"),
            Placement::new("protocol_b", "USDC"),
            100.0,
            300.0,
        );
        let verdict = RiskManager::new().evaluate(
            &mv,
            &single_position(),
            &market(vec![]),
            &profile(RiskLevel::High, 0.65, 0.6, 0.15),
        );
        assert!(!verdict.approved);
        assert!(verdict.reasons[0].starts_with("LTV exceeds profile max"));
    }

    #[test]
    fn test_concentrating_move_is_rejected() {
        let now = Utc::now();
        let wallet = WalletState::new(
            "w1",
            vec![
                WalletPosition::supplied("protocol_a", "USDC", 50.0),
                WalletPosition::supplied("protocol_b", "USDC", 50.0),
            ],
        )
        .unwrap();
        let mv = CandidateMove::new(
            Placement::new("protocol_a", "USDC"),
            Placement::new("protocol_b", "USDC"),
            50.0,
        );
        let verdict = RiskManager::new().evaluate(
            &mv,
            &wallet,
            &market(vec![snapshot("protocol_c", "USDC", 3.0, now)]),
            &profile(RiskLevel::Med, 0.5, 0.6, 0.3),
        );
        assert!(!verdict.approved);
        assert!(verdict.reasons[0].starts_with("Concentration exceeds profile max"));
    }

    #[test]
    fn test_move_larger_than_balance_is_rejected() {
        let mv = CandidateMove::new(
            Placement::new("protocol_a", "USDC"),
            Placement::new("protocol_b", "USDC"),
            150.0,
        );
        let verdict = RiskManager::new().evaluate(
            &mv,
            &single_position(),
            &market(vec![]),
            &profile(RiskLevel::High, 0.65, 1.0, 0.15),
        );
        assert!(!verdict.approved);
        assert!(verdict.reasons[0].contains("exceeds supplied balance"));
    }

    #[test]
    fn test_missing_destination_vetoes() {
        let mv = CandidateMove::new(
            Placement::new("protocol_a", "USDC"),
            Placement::new("protocol_z", "USDC"),
            10.0,
        );
        let verdict = RiskManager::new().evaluate(
            &mv,
            &single_position(),
            &market(vec![]),
            &profile(RiskLevel::High, 0.65, 1.0, 0.15),
        );
        assert!(!verdict.approved);
        assert_eq!(verdict.risk_score, 1.0);
    }

    #[test]
    fn test_hold_is_assessed_like_any_move() {
        let hold = CandidateMove::hold(Placement::new("protocol_a", "USDC"), 100.0);
        let verdict = RiskManager::new().evaluate(
            &hold,
            &single_position(),
            &market(vec![]),
            &profile(RiskLevel::Low, 0.3, 0.2, 0.5),
        );
        assert!(verdict.approved);
        assert_relative_eq!(verdict.risk_score, 0.3);
    }

    #[test]
    fn test_assess_produces_vetoed_signal() {
        let ctx = AnalysisContext {
            market: market(vec![]),
            wallet: single_position(),
            profile: profile(RiskLevel::High, 0.65, 0.6, 0.15),
        };
        let mv = CandidateMove::leveraged(
            Placement::new("protocol_a", "USDC"),
            Placement::new("protocol_b", "USDC"),
            100.0,
            300.0,
        );
        let signal = RiskManager::new().assess(&mv, &ctx).unwrap();
        assert_eq!(signal.producer, Producer::Risk);
        assert!(!signal.approved);
        assert_eq!(signal.protocol, "protocol_b");
        assert!(signal.validate().is_ok());
    }

    #[test]
    fn test_risk_score_bounds() {
        let p = profile(RiskLevel::Med, 0.5, 0.4, 0.3);
        assert_eq!(RiskManager::risk_score(&p, 0.0, 0.0, 1.0), 0.0);
        assert_relative_eq!(RiskManager::risk_score(&p, f64::INFINITY, 2.0, 0.0), 1.0);
    }
}
