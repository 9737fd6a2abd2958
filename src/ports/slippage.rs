/// Estimated price impact of moving funds into a reserve.
///
/// Implementations must be monotonic non-decreasing in `move_size` for a
/// fixed `available_liquidity`.
pub trait SlippageModel: Send + Sync {
    /// Estimated slippage in percentage points of APY-equivalent cost
    fn estimate_pct(&self, move_size: f64, available_liquidity: f64) -> f64;
}
