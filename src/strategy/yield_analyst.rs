//! Yield Analyst
//!
//! expected_yield = supply_apy * (1 + r) - borrow_apy * r - slippage
//!
//! where r is the leverage ratio of the move (0 for a plain move). Rankings
//! break ties by protocol reliability from the knowledge base, then by
//! protocol name.

use std::cmp::Ordering;
use std::sync::Arc;

use statrs::statistics::Statistics;

use crate::domain::{
    CandidateMove, MarketSnapshot, MarketView, PositionRole, Producer, Signal, WalletState,
};
use crate::ports::{
    AnalysisContext, KnowledgeBase, ReliabilityTable, SignalStrategy, SlippageModel, StrategyError,
};

/// Breakdown of an expected yield, all in APY percentage points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YieldEstimate {
    pub gross: f64,
    pub leverage_cost: f64,
    pub slippage: f64,
    pub expected: f64,
}

pub struct YieldAnalyst {
    slippage: Arc<dyn SlippageModel>,
    knowledge: Arc<dyn KnowledgeBase>,
    /// APY mapped to a normalized score of 1.0
    yield_ceiling_pct: f64,
}

impl YieldAnalyst {
    pub fn new(
        slippage: Arc<dyn SlippageModel>,
        knowledge: Arc<dyn KnowledgeBase>,
        yield_ceiling_pct: f64,
    ) -> Self {
        Self {
            slippage,
            knowledge,
            yield_ceiling_pct,
        }
    }

    pub fn normalize(&self, expected_yield: f64) -> f64 {
        if self.yield_ceiling_pct <= 0.0 {
            return 0.0;
        }
        (expected_yield / self.yield_ceiling_pct).clamp(0.0, 1.0)
    }

    /// Expected yield of the destination after the move, or None when the
    /// destination has no snapshot
    pub fn estimate(&self, mv: &CandidateMove, market: &MarketView) -> Option<YieldEstimate> {
        let dest = market.get(&mv.to)?;
        let r = mv.leverage_ratio();
        let gross = dest.supply_apy * (1.0 + r);
        let leverage_cost = dest.borrow_apy * r;
        let slippage = if mv.is_hold() {
            0.0
        } else {
            self.slippage
                .estimate_pct(mv.amount + mv.borrow_amount, dest.available_liquidity())
        };

        Some(YieldEstimate {
            gross,
            leverage_cost,
            slippage,
            expected: gross - leverage_cost - slippage,
        })
    }

    /// Ranks every placement by expected yield for the wallet's holdings of
    /// that asset, best first
    pub fn rank(&self, snapshots: &[MarketSnapshot], wallet: &WalletState) -> Vec<Signal> {
        let reliability = ReliabilityTable::from_knowledge(self.knowledge.as_ref());

        let mut scored: Vec<(&MarketSnapshot, f64, f64)> = snapshots
            .iter()
            .map(|s| {
                let already_there = wallet.amount(&s.placement(), PositionRole::Supplied);
                let incoming = (wallet.balance(&s.asset) - already_there).max(0.0);
                let slippage = self.slippage.estimate_pct(incoming, s.available_liquidity());
                (s, s.supply_apy - slippage, reliability.score(&s.protocol))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal))
                .then_with(|| a.0.protocol.cmp(&b.0.protocol))
        });

        scored
            .iter()
            .map(|(s, expected, rel)| {
                let peers: Vec<f64> = scored
                    .iter()
                    .filter(|(p, _, _)| p.asset == s.asset)
                    .map(|(_, e, _)| *e)
                    .collect();
                Signal::new(Producer::Yield, &s.protocol, &s.asset, self.normalize(*expected), *expected)
                    .with_confidence(cross_section_confidence(*expected, &peers))
                    .with_reliability(*rel)
                    .with_rationale(format!(
                        "supply {:.2}%, expected {:.2}%, utilization {:.1}%, reliability {:.2}",
                        s.supply_apy,
                        expected,
                        s.utilization() * 100.0,
                        rel
                    ))
            })
            .collect()
    }
}

/// Standard-normal CDF of the z-score within the peer set; 0.5 when the
/// peers carry no dispersion
fn cross_section_confidence(value: f64, peers: &[f64]) -> f64 {
    if peers.len() < 2 {
        return 0.5;
    }
    let mean = peers.iter().mean();
    let std_dev = peers.iter().std_dev();
    if !std_dev.is_finite() || std_dev <= f64::EPSILON {
        return 0.5;
    }
    Signal::calculate_confidence((value - mean) / std_dev)
}

impl SignalStrategy for YieldAnalyst {
    fn name(&self) -> &str {
        "yield_analyst"
    }

    fn assess(&self, mv: &CandidateMove, ctx: &AnalysisContext) -> Result<Signal, StrategyError> {
        let estimate = self
            .estimate(mv, &ctx.market)
            .ok_or_else(|| StrategyError::MissingMarket(mv.to.to_string()))?;

        // Same move redirected to every placement quoting the asset
        let peers: Vec<f64> = ctx
            .market
            .for_asset(&mv.to.asset)
            .filter_map(|s| {
                let peer = CandidateMove {
                    to: s.placement(),
                    ..mv.clone()
                };
                self.estimate(&peer, &ctx.market).map(|e| e.expected)
            })
            .collect();
        let confidence = cross_section_confidence(estimate.expected, &peers);
        let reliability = ReliabilityTable::from_knowledge(self.knowledge.as_ref()).score(&mv.to.protocol);

        tracing::debug!(
            "Yield {}: gross={:.3} cost={:.3} slippage={:.4} expected={:.3}",
            mv,
            estimate.gross,
            estimate.leverage_cost,
            estimate.slippage,
            estimate.expected
        );

        Ok(Signal::new(
            Producer::Yield,
            &mv.to.protocol,
            &mv.to.asset,
            self.normalize(estimate.expected),
            estimate.expected,
        )
        .with_confidence(confidence)
        .with_reliability(reliability)
        .with_rationale(format!(
            "expected {:.2}% (gross {:.2}%, leverage cost {:.2}%, slippage {:.4}%)",
            estimate.expected, estimate.gross, estimate.leverage_cost, estimate.slippage
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::fixtures::snapshot;
    use crate::domain::{Placement, RiskLevel, RiskProfile, WalletPosition};
    use crate::ports::knowledge::MockKnowledgeBase;
    use crate::ports::{ResearchFact, RELIABILITY_TOPIC};
    use crate::strategy::slippage::LiquidityImpactSlippage;
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn knowledge(facts: Vec<(&'static str, f64)>) -> Arc<dyn KnowledgeBase> {
        let mut kb = MockKnowledgeBase::new();
        kb.expect_query().returning(move |_| {
            facts
                .iter()
                .map(|(subject, r)| ResearchFact {
                    topic: RELIABILITY_TOPIC.into(),
                    subject: subject.to_string(),
                    reliability: Some(*r),
                    note: String::new(),
                })
                .collect()
        });
        Arc::new(kb)
    }

    fn analyst(facts: Vec<(&'static str, f64)>) -> YieldAnalyst {
        YieldAnalyst::new(Arc::new(LiquidityImpactSlippage::new(0.5)), knowledge(facts), 25.0)
    }

    fn wallet() -> WalletState {
        WalletState::new("w1", vec![WalletPosition::supplied("a", "USDC", 100.0)]).unwrap()
    }

    #[test]
    fn test_rank_orders_by_expected_yield() {
        let now = Utc::now();
        let snaps = vec![
            snapshot("a", "USDC", 4.0, now),
            snapshot("b", "USDC", 6.0, now),
            snapshot("c", "USDC", 5.0, now),
        ];
        let ranked = analyst(vec![]).rank(&snaps, &wallet());
        let order: Vec<&str> = ranked.iter().map(|s| s.protocol.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
        assert!(ranked[0].confidence > 0.5);
        assert!(ranked[2].confidence < 0.5);
    }

    #[test]
    fn test_rank_ties_break_on_reliability_then_name() {
        let now = Utc::now();
        let snaps = vec![
            snapshot("zeta", "SOL", 5.0, now),
            snapshot("alpha", "SOL", 5.0, now),
            snapshot("mid", "SOL", 5.0, now),
        ];
        let empty = WalletState::new("w1", vec![]).unwrap();
        let ranked = analyst(vec![("zeta", 0.9)]).rank(&snaps, &empty);
        let order: Vec<&str> = ranked.iter().map(|s| s.protocol.as_str()).collect();
        assert_eq!(order, vec!["zeta", "alpha", "mid"]);
        assert_eq!(ranked[1].confidence, 0.5);
    }

    #[test]
    fn test_estimate_leveraged_move() {
        let now = Utc::now();
        let market = MarketView::new(1, vec![snapshot("b", "USDC", 5.0, now)]);
        let mv = CandidateMove::leveraged(Placement::new("a", "USDC"), Placement::new("b", "USDC"), 100.0, 50.0);
        let est = analyst(vec![]).estimate(&mv, &market).unwrap();
        // 5 * 1.5 - 7 * 0.5
        assert_relative_eq!(est.gross, 7.5);
        assert_relative_eq!(est.leverage_cost, 3.5);
        assert!(est.slippage > 0.0);
        assert_relative_eq!(est.expected, 4.0 - est.slippage);
    }

    #[test]
    fn test_hold_has_no_slippage() {
        let now = Utc::now();
        let market = MarketView::new(1, vec![snapshot("a", "USDC", 4.0, now)]);
        let hold = CandidateMove::hold(Placement::new("a", "USDC"), 100.0);
        let est = analyst(vec![]).estimate(&hold, &market).unwrap();
        assert_eq!(est.expected, 4.0);
    }

    #[test]
    fn test_normalize_clamps() {
        let a = analyst(vec![]);
        assert_eq!(a.normalize(-1.0), 0.0);
        assert_relative_eq!(a.normalize(5.0), 0.2);
        assert_eq!(a.normalize(40.0), 1.0);
    }

    fn context(market: MarketView) -> AnalysisContext {
        AnalysisContext {
            market,
            wallet: wallet(),
            profile: RiskProfile {
                level: RiskLevel::Med,
                max_ltv: 0.5,
                max_concentration_per_protocol: 0.4,
                min_liquidation_buffer: 0.3,
            },
        }
    }

    #[test]
    fn test_assess_compares_against_same_leverage_peers() {
        let now = Utc::now();
        let ctx = context(MarketView::new(
            1,
            vec![
                snapshot("a", "USDC", 4.0, now),
                snapshot("b", "USDC", 6.0, now),
                snapshot("c", "USDC", 5.0, now),
            ],
        ));
        // Net of borrow cost the best destination falls below the mean raw supply
        // rate, but well above the leveraged alternatives
        let mv = CandidateMove::leveraged(Placement::new("a", "USDC"), Placement::new("b", "USDC"), 10.0, 10.0);
        let signal = analyst(vec![]).assess(&mv, &ctx).unwrap();
        assert!(signal.value < 5.0);
        assert!(signal.confidence > 0.8);
    }

    #[test]
    fn test_assess_carries_reliability() {
        let now = Utc::now();
        let ctx = context(MarketView::new(
            1,
            vec![snapshot("a", "USDC", 4.0, now), snapshot("b", "USDC", 6.0, now)],
        ));
        let mv = CandidateMove::new(Placement::new("a", "USDC"), Placement::new("b", "USDC"), 10.0);

        let known = analyst(vec![("b", 0.95)]).assess(&mv, &ctx).unwrap();
        assert_eq!(known.reliability, Some(0.95));
        let unknown = analyst(vec![]).assess(&mv, &ctx).unwrap();
        assert_eq!(unknown.reliability, Some(crate::ports::DEFAULT_RELIABILITY));
    }

    #[test]
    fn test_assess_missing_destination() {
        let ctx = context(MarketView::new(1, vec![]));
        let mv = CandidateMove::new(Placement::new("a", "USDC"), Placement::new("b", "USDC"), 10.0);
        assert!(matches!(
            analyst(vec![]).assess(&mv, &ctx),
            Err(StrategyError::MissingMarket(_))
        ));
    }
}
