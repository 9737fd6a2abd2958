//! Liquidity-impact slippage model
//!
//! slippage_pct = coefficient * (move_size / available_liquidity) * 100
//!
//! Moving into a reserve with no free liquidity is priced at `cap_pct`.

use crate::ports::SlippageModel;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidityImpactSlippage {
    pub coefficient: f64,
    pub cap_pct: f64,
}

impl LiquidityImpactSlippage {
    pub fn new(coefficient: f64) -> Self {
        Self {
            coefficient,
            cap_pct: 100.0,
        }
    }
}

impl Default for LiquidityImpactSlippage {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl SlippageModel for LiquidityImpactSlippage {
    fn estimate_pct(&self, move_size: f64, available_liquidity: f64) -> f64 {
        if move_size <= 0.0 {
            return 0.0;
        }
        if available_liquidity <= 0.0 {
            return self.cap_pct;
        }
        (self.coefficient * move_size / available_liquidity * 100.0).min(self.cap_pct)
    }
}
