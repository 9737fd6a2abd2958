//! Candidate generation
//!
//! Every supplied position at or above `min_position_size`, and holding at
//! least `min_position_allocation` of the wallet's supplied value, is a source. For
//! each source the group holds the "hold" baseline plus, for every other
//! protocol quoting the same asset, a plain move and (when leverage is
//! enabled) a leveraged move. A leveraged loop in place is also offered.

use crate::domain::{CandidateMove, MarketView, WalletState};

use super::portfolio_manager::OperationalRules;

/// All alternatives for one source position
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateGroup {
    pub hold: CandidateMove,
    pub moves: Vec<CandidateMove>,
}

impl CandidateGroup {
    /// Hold first, then the moves
    pub fn all(&self) -> impl Iterator<Item = &CandidateMove> {
        std::iter::once(&self.hold).chain(self.moves.iter())
    }
}

pub fn generate(
    wallet: &WalletState,
    market: &MarketView,
    rules: &OperationalRules,
    leverage_ratio: f64,
) -> Vec<CandidateGroup> {
    let mut groups = Vec::new();
    let total = wallet.supplied_value(market);

    for position in wallet.supplied() {
        if position.amount < rules.min_position_size {
            tracing::debug!(
                "Skipping {} {}: below min position size {}",
                position.amount,
                position.placement(),
                rules.min_position_size
            );
            continue;
        }

        let value = position.amount * market.price(&position.asset).unwrap_or(0.0);
        if total > 0.0 && value / total < rules.min_position_allocation {
            tracing::debug!(
                "Holding {}: {:.1}% of supplied value is below the {:.1}% allocation floor",
                position.placement(),
                value / total * 100.0,
                rules.min_position_allocation * 100.0
            );
            continue;
        }

        let source = position.placement();
        let amount = position.amount;
        let mut moves = Vec::new();

        if leverage_ratio > 0.0 && market.get(&source).is_some() {
            moves.push(CandidateMove::leveraged(
                source.clone(),
                source.clone(),
                amount,
                amount * leverage_ratio,
            ));
        }

        for dest in market.for_asset(&position.asset) {
            if dest.protocol == source.protocol {
                continue;
            }
            let to = dest.placement();
            moves.push(CandidateMove::new(source.clone(), to.clone(), amount));
            if leverage_ratio > 0.0 {
                moves.push(CandidateMove::leveraged(
                    source.clone(),
                    to,
                    amount,
                    amount * leverage_ratio,
                ));
            }
        }

        groups.push(CandidateGroup {
            hold: CandidateMove::hold(source, amount),
            moves,
        });
    }

    groups
}
