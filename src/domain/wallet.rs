//! Wallet State
//!
//! Lending positions held by one wallet, validated on entry, plus the
//! per-protocol valuation the risk checks are built on.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::market::{MarketView, Placement};
use super::recommendation::CandidateMove;

/// Amounts below this are treated as closed positions
const DUST: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionRole {
    Supplied,
    Borrowed,
}

impl fmt::Display for PositionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionRole::Supplied => write!(f, "supplied"),
            PositionRole::Borrowed => write!(f, "borrowed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletPosition {
    pub asset: String,
    /// Amount in asset units, never negative
    pub amount: f64,
    pub protocol: String,
    pub role: PositionRole,
}

impl WalletPosition {
    pub fn supplied(protocol: &str, asset: &str, amount: f64) -> Self {
        Self {
            asset: asset.to_string(),
            amount,
            protocol: protocol.to_string(),
            role: PositionRole::Supplied,
        }
    }

    pub fn borrowed(protocol: &str, asset: &str, amount: f64) -> Self {
        Self {
            role: PositionRole::Borrowed,
            ..Self::supplied(protocol, asset, amount)
        }
    }

    pub fn placement(&self) -> Placement {
        Placement::new(self.protocol.clone(), self.asset.clone())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WalletError {
    #[error("Negative amount {amount} for {role} {asset}@{protocol}")]
    NegativeAmount {
        protocol: String,
        asset: String,
        role: PositionRole,
        amount: f64,
    },

    #[error("Non-finite amount for {asset}@{protocol}")]
    NonFiniteAmount { protocol: String, asset: String },

    #[error("Duplicate {role} position for {asset}@{protocol}")]
    DuplicatePosition {
        protocol: String,
        asset: String,
        role: PositionRole,
    },
}

/// Collateral and debt a wallet holds on one protocol, valued in USD
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProtocolBook {
    pub collateral_value: f64,
    pub debt_value: f64,
    /// Sum of collateral value × liquidation threshold
    pub threshold_weighted_value: f64,
}

impl ProtocolBook {
    pub fn ltv(&self) -> f64 {
        if self.debt_value <= DUST {
            0.0
        } else if self.collateral_value <= DUST {
            f64::INFINITY
        } else {
            self.debt_value / self.collateral_value
        }
    }

    /// Collateral-weighted liquidation threshold
    pub fn liquidation_threshold(&self) -> f64 {
        if self.collateral_value <= DUST {
            0.0
        } else {
            self.threshold_weighted_value / self.collateral_value
        }
    }

    /// Fractional distance to liquidation: 1.0 with no debt, 0.0 at or past the threshold
    pub fn liquidation_buffer(&self) -> f64 {
        if self.debt_value <= DUST {
            return 1.0;
        }
        let threshold = self.liquidation_threshold();
        if threshold <= 0.0 {
            return 0.0;
        }
        (1.0 - self.ltv() / threshold).clamp(0.0, 1.0)
    }
}

/// Validated set of positions for one wallet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletState {
    wallet_id: String,
    positions: Vec<WalletPosition>,
}

impl WalletState {
    /// Validate positions: finite, non-negative, unique per (protocol, asset, role)
    pub fn new(wallet_id: impl Into<String>, positions: Vec<WalletPosition>) -> Result<Self, WalletError> {
        let mut seen = HashSet::new();
        for p in &positions {
            if !p.amount.is_finite() {
                return Err(WalletError::NonFiniteAmount {
                    protocol: p.protocol.clone(),
                    asset: p.asset.clone(),
                });
            }
            if p.amount < 0.0 {
                return Err(WalletError::NegativeAmount {
                    protocol: p.protocol.clone(),
                    asset: p.asset.clone(),
                    role: p.role,
                    amount: p.amount,
                });
            }
            if !seen.insert((p.protocol.clone(), p.asset.clone(), p.role)) {
                return Err(WalletError::DuplicatePosition {
                    protocol: p.protocol.clone(),
                    asset: p.asset.clone(),
                    role: p.role,
                });
            }
        }

        Ok(Self {
            wallet_id: wallet_id.into(),
            positions,
        })
    }

    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    pub fn positions(&self) -> &[WalletPosition] {
        &self.positions
    }

    pub fn supplied(&self) -> impl Iterator<Item = &WalletPosition> {
        self.positions.iter().filter(|p| p.role == PositionRole::Supplied)
    }

    pub fn amount(&self, placement: &Placement, role: PositionRole) -> f64 {
        self.positions
            .iter()
            .find(|p| p.role == role && p.protocol == placement.protocol && p.asset == placement.asset)
            .map(|p| p.amount)
            .unwrap_or(0.0)
    }

    /// Supplied balance of an asset summed over protocols
    pub fn balance(&self, asset: &str) -> f64 {
        self.supplied().filter(|p| p.asset == asset).map(|p| p.amount).sum()
    }

    /// Every placement the wallet touches, supplied or borrowed
    pub fn placements(&self) -> BTreeSet<Placement> {
        self.positions.iter().map(|p| p.placement()).collect()
    }

    pub fn protocols(&self) -> BTreeSet<String> {
        self.positions.iter().map(|p| p.protocol.clone()).collect()
    }

    pub fn book(&self, protocol: &str, market: &MarketView) -> ProtocolBook {
        let mut book = ProtocolBook::default();
        for p in self.positions.iter().filter(|p| p.protocol == protocol) {
            let price = market.price(&p.asset).unwrap_or(0.0);
            let value = p.amount * price;
            match p.role {
                PositionRole::Supplied => {
                    let threshold = market
                        .get(&p.placement())
                        .map(|s| s.liquidation_threshold)
                        .unwrap_or(0.0);
                    book.collateral_value += value;
                    book.threshold_weighted_value += value * threshold;
                }
                PositionRole::Borrowed => book.debt_value += value,
            }
        }
        book
    }

    /// Total supplied value in USD
    pub fn supplied_value(&self, market: &MarketView) -> f64 {
        self.supplied()
            .map(|p| p.amount * market.price(&p.asset).unwrap_or(0.0))
            .sum()
    }

    /// Share of supplied value sitting on one protocol
    pub fn concentration(&self, protocol: &str, market: &MarketView) -> f64 {
        let total = self.supplied_value(market);
        if total <= DUST {
            return 0.0;
        }
        self.book(protocol, market).collateral_value / total
    }

    pub fn max_concentration(&self, market: &MarketView) -> f64 {
        self.protocols()
            .iter()
            .map(|p| self.concentration(p, market))
            .fold(0.0, f64::max)
    }

    /// Positions of either role worth more than `min_value` in USD
    pub fn positions_above(&self, min_value: f64, market: &MarketView) -> usize {
        self.positions
            .iter()
            .filter(|p| p.amount * market.price(&p.asset).unwrap_or(0.0) > min_value)
            .count()
    }

    /// Wallet as it would look after the move; the receiver is untouched
    pub fn apply(&self, mv: &CandidateMove) -> WalletState {
        if mv.is_hold() {
            return self.clone();
        }

        let mut book: BTreeMap<(String, String, PositionRole), f64> = self
            .positions
            .iter()
            .map(|p| ((p.protocol.clone(), p.asset.clone(), p.role), p.amount))
            .collect();

        let from = (mv.from.protocol.clone(), mv.from.asset.clone(), PositionRole::Supplied);
        if let Some(amount) = book.get_mut(&from) {
            *amount = (*amount - mv.amount).max(0.0);
        }

        let to = (mv.to.protocol.clone(), mv.to.asset.clone(), PositionRole::Supplied);
        *book.entry(to).or_insert(0.0) += mv.amount + mv.borrow_amount;

        if mv.borrow_amount > 0.0 {
            let debt = (mv.to.protocol.clone(), mv.to.asset.clone(), PositionRole::Borrowed);
            *book.entry(debt).or_insert(0.0) += mv.borrow_amount;
        }

        let positions = book
            .into_iter()
            .filter(|(_, amount)| *amount > DUST)
            .map(|((protocol, asset, role), amount)| WalletPosition {
                asset,
                amount,
                protocol,
                role,
            })
            .collect();

        WalletState {
            wallet_id: self.wallet_id.clone(),
            positions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::fixtures::snapshot;
    use chrono::Utc;

    fn market() -> MarketView {
        let now = Utc::now();
        MarketView::new(
            1,
            vec![
                snapshot("kamino", "USDC", 4.0, now),
                snapshot("marginfi", "USDC", 6.0, now),
            ],
        )
    }

    #[test]
    fn test_rejects_negative_amount() {
        let result = WalletState::new("w", vec![WalletPosition::supplied("kamino", "USDC", -1.0)]);
        assert!(matches!(result, Err(WalletError::NegativeAmount { .. })));
    }

    #[test]
    fn test_rejects_duplicate_triple() {
        let result = WalletState::new(
            "w",
            vec![
                WalletPosition::supplied("kamino", "USDC", 1.0),
                WalletPosition::supplied("kamino", "USDC", 2.0),
            ],
        );
        assert!(matches!(result, Err(WalletError::DuplicatePosition { .. })));

        // Same placement with a different role is fine
        let ok = WalletState::new(
            "w",
            vec![
                WalletPosition::supplied("kamino", "USDC", 1.0),
                WalletPosition::borrowed("kamino", "USDC", 0.5),
            ],
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_book_ltv_and_buffer() {
        let wallet = WalletState::new(
            "w",
            vec![
                WalletPosition::supplied("kamino", "USDC", 100.0),
                WalletPosition::borrowed("kamino", "USDC", 40.0),
            ],
        )
        .unwrap();

        let book = wallet.book("kamino", &market());
        assert!((book.ltv() - 0.4).abs() < 1e-12);
        assert!((book.liquidation_threshold() - 0.85).abs() < 1e-12);
        assert!((book.liquidation_buffer() - (1.0 - 0.4 / 0.85)).abs() < 1e-12);
    }

    #[test]
    fn test_debt_without_collateral_is_unbounded_ltv() {
        let book = ProtocolBook {
            collateral_value: 0.0,
            debt_value: 10.0,
            threshold_weighted_value: 0.0,
        };
        assert!(book.ltv().is_infinite());
        assert_eq!(book.liquidation_buffer(), 0.0);
    }

    #[test]
    fn test_apply_plain_move() {
        let wallet = WalletState::new("w", vec![WalletPosition::supplied("kamino", "USDC", 100.0)]).unwrap();
        let mv = CandidateMove::new(
            Placement::new("kamino", "USDC"),
            Placement::new("marginfi", "USDC"),
            100.0,
        );

        let after = wallet.apply(&mv);
        assert_eq!(after.positions().len(), 1);
        assert_eq!(after.amount(&Placement::new("marginfi", "USDC"), PositionRole::Supplied), 100.0);
        // Original untouched
        assert_eq!(wallet.amount(&Placement::new("kamino", "USDC"), PositionRole::Supplied), 100.0);
    }

    #[test]
    fn test_apply_leveraged_move_adds_debt() {
        let wallet = WalletState::new("w", vec![WalletPosition::supplied("kamino", "USDC", 100.0)]).unwrap();
        let mv = CandidateMove::leveraged(
            Placement::new("kamino", "USDC"),
            Placement::new("marginfi", "USDC"),
            100.0,
            150.0,
        );

        let after = wallet.apply(&mv);
        let to = Placement::new("marginfi", "USDC");
        assert_eq!(after.amount(&to, PositionRole::Supplied), 250.0);
        assert_eq!(after.amount(&to, PositionRole::Borrowed), 150.0);
        assert!((after.book("marginfi", &market()).ltv() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_concentration() {
        let wallet = WalletState::new(
            "w",
            vec![
                WalletPosition::supplied("kamino", "USDC", 75.0),
                WalletPosition::supplied("marginfi", "USDC", 25.0),
            ],
        )
        .unwrap();
        let m = market();
        assert!((wallet.concentration("kamino", &m) - 0.75).abs() < 1e-12);
        assert!((wallet.max_concentration(&m) - 0.75).abs() < 1e-12);
        assert_eq!(wallet.balance("USDC"), 100.0);
    }

    #[test]
    fn test_positions_above_counts_debt() {
        let wallet = WalletState::new("w", vec![WalletPosition::supplied("kamino", "USDC", 2000.0)]).unwrap();
        let m = market();
        assert_eq!(wallet.positions_above(1000.0, &m), 1);
        assert_eq!(wallet.wallet_id(), "w");

        let looped = wallet.apply(&CandidateMove::leveraged(
            Placement::new("kamino", "USDC"),
            Placement::new("kamino", "USDC"),
            2000.0,
            3000.0,
        ));
        assert_eq!(looped.positions_above(1000.0, &m), 2);
        assert_eq!(looped.wallet_id(), "w");
        assert_eq!(looped.positions_above(10_000.0, &m), 0);
    }
}
