//! Market snapshots
//!
//! Canonical per-(protocol, asset) lending market observations and the
//! read-only index the analysis stage works from.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A (protocol, asset) pair identifying a lending reserve
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Placement {
    pub protocol: String,
    pub asset: String,
}

impl Placement {
    pub fn new(protocol: impl Into<String>, asset: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            asset: asset.into(),
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.asset, self.protocol)
    }
}

/// Normalized view of one lending reserve at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub protocol: String,
    pub asset: String,
    /// Supply APY in percent (4.0 = 4%)
    pub supply_apy: f64,
    /// Borrow APY in percent
    pub borrow_apy: f64,
    /// Maximum loan-to-value the protocol grants this collateral (0..1)
    pub ltv: f64,
    /// LTV above which the position can be liquidated (0..1)
    pub liquidation_threshold: f64,
    /// Asset price in USD
    pub price_usd: f64,
    /// Total supplied to the reserve, in asset units
    pub total_supply: f64,
    /// Total borrowed from the reserve, in asset units
    pub total_borrows: f64,
    pub observed_at: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn placement(&self) -> Placement {
        Placement::new(self.protocol.clone(), self.asset.clone())
    }

    /// Liquidity that can still be drawn from the reserve, in asset units
    pub fn available_liquidity(&self) -> f64 {
        (self.total_supply - self.total_borrows).max(0.0)
    }

    pub fn utilization(&self) -> f64 {
        if self.total_supply <= 0.0 {
            0.0
        } else {
            self.total_borrows / self.total_supply
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.observed_at
    }
}

/// One generation of normalized snapshots, tagged with the provider's version token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBatch {
    pub version: u64,
    pub snapshots: Vec<MarketSnapshot>,
    /// Records dropped during normalization
    pub rejected: usize,
}

/// Read-only index over a snapshot batch, keyed by placement
#[derive(Debug, Clone, Default)]
pub struct MarketView {
    version: u64,
    by_placement: BTreeMap<Placement, MarketSnapshot>,
}

impl MarketView {
    pub fn new(version: u64, snapshots: impl IntoIterator<Item = MarketSnapshot>) -> Self {
        let mut by_placement = BTreeMap::new();
        for snapshot in snapshots {
            let key = snapshot.placement();
            match by_placement.get(&key) {
                Some(existing) if existing_is_newer(existing, &snapshot) => {}
                _ => {
                    by_placement.insert(key, snapshot);
                }
            }
        }
        Self { version, by_placement }
    }

    pub fn from_batch(batch: &SnapshotBatch) -> Self {
        Self::new(batch.version, batch.snapshots.iter().cloned())
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.by_placement.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_placement.is_empty()
    }

    pub fn get(&self, placement: &Placement) -> Option<&MarketSnapshot> {
        self.by_placement.get(placement)
    }

    /// Snapshots in deterministic (protocol, asset) order
    pub fn snapshots(&self) -> impl Iterator<Item = &MarketSnapshot> {
        self.by_placement.values()
    }

    /// All reserves for an asset, ordered by protocol
    pub fn for_asset<'a>(&'a self, asset: &'a str) -> impl Iterator<Item = &'a MarketSnapshot> + 'a {
        self.by_placement.values().filter(move |s| s.asset == asset)
    }

    /// USD price of an asset; reserves quote the same oracle so the first one wins
    pub fn price(&self, asset: &str) -> Option<f64> {
        self.for_asset(asset).map(|s| s.price_usd).next()
    }

    /// A copy of this view without the given placements
    pub fn without(&self, dropped: &[Placement]) -> Self {
        let by_placement = self
            .by_placement
            .iter()
            .filter(|(k, _)| !dropped.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            version: self.version,
            by_placement,
        }
    }
}

fn existing_is_newer(existing: &MarketSnapshot, candidate: &MarketSnapshot) -> bool {
    existing.observed_at > candidate.observed_at
}
