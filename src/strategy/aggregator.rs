//! Market Data Aggregator
//!
//! Normalizes raw per-protocol records into `MarketSnapshot`s. A malformed
//! record is dropped with a `DataIntegrityError`; the rest of the batch
//! survives. Duplicate placements collapse to the newest observation.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{MarketSnapshot, Placement, SnapshotBatch};
use crate::ports::{RawMarketBatch, RawMarketFeed};

/// One record that failed validation
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{protocol} record {index}: {reason}")]
pub struct DataIntegrityError {
    pub protocol: String,
    pub index: usize,
    pub reason: String,
}

/// Output of one normalization pass
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    pub version: u64,
    pub snapshots: Vec<MarketSnapshot>,
    pub rejections: Vec<DataIntegrityError>,
}

impl NormalizedBatch {
    pub fn into_snapshot_batch(self) -> SnapshotBatch {
        SnapshotBatch {
            version: self.version,
            rejected: self.rejections.len(),
            snapshots: self.snapshots,
        }
    }
}

// Canonical field name followed by accepted aliases
const ASSET: &[&str] = &["asset", "symbol", "market_name"];
const SUPPLY_APY: &[&str] = &["supply_apy", "supply_rate"];
const BORROW_APY: &[&str] = &["borrow_apy", "borrow_rate"];
const LTV: &[&str] = &["ltv", "max_ltv", "loan_to_value"];
const LIQ_THRESHOLD: &[&str] = &["liquidation_threshold", "liq_threshold"];
const PRICE: &[&str] = &["price_usd", "price"];
const TOTAL_SUPPLY: &[&str] = &["total_supply"];
const TOTAL_BORROWS: &[&str] = &["total_borrows"];
const OBSERVED_AT: &[&str] = &["observed_at", "timestamp"];

#[derive(Debug, Clone, Default)]
pub struct MarketDataAggregator;

impl MarketDataAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, raw: &RawMarketBatch) -> NormalizedBatch {
        let mut latest: BTreeMap<Placement, MarketSnapshot> = BTreeMap::new();
        let mut rejections = Vec::new();

        for feed in &raw.feeds {
            for (index, record) in feed.records.iter().enumerate() {
                match Self::parse_record(feed, record) {
                    Ok(snapshot) => {
                        let key = snapshot.placement();
                        match latest.get(&key) {
                            Some(existing) if existing.observed_at > snapshot.observed_at => {}
                            _ => {
                                latest.insert(key, snapshot);
                            }
                        }
                    }
                    Err(reason) => {
                        let err = DataIntegrityError {
                            protocol: feed.protocol.clone(),
                            index,
                            reason,
                        };
                        tracing::warn!("Dropping market record: {}", err);
                        rejections.push(err);
                    }
                }
            }
        }

        let snapshots: Vec<MarketSnapshot> = latest.into_values().collect();
        tracing::info!(
            "Normalized market batch v{}: {} snapshots, {} rejected",
            raw.version,
            snapshots.len(),
            rejections.len()
        );

        NormalizedBatch {
            version: raw.version,
            snapshots,
            rejections,
        }
    }

    fn parse_record(feed: &RawMarketFeed, record: &Value) -> Result<MarketSnapshot, String> {
        let obj = record
            .as_object()
            .ok_or_else(|| "record is not an object".to_string())?;

        let protocol = match obj.get("protocol").or_else(|| obj.get("protocol_name")) {
            Some(v) => v
                .as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| "protocol is not a string".to_string())?,
            None => feed.protocol.clone(),
        };
        if protocol.is_empty() {
            return Err("empty protocol".into());
        }

        let asset = text_field(obj, ASSET)?;
        let supply_apy = number_field(obj, SUPPLY_APY)?;
        let borrow_apy = number_field(obj, BORROW_APY)?;
        let ltv = number_field(obj, LTV)?;
        let liquidation_threshold = number_field(obj, LIQ_THRESHOLD)?;
        let price_usd = number_field(obj, PRICE)?;
        let total_supply = number_field(obj, TOTAL_SUPPLY)?;
        let total_borrows = number_field(obj, TOTAL_BORROWS)?;
        let observed_at = time_field(obj, OBSERVED_AT)?;

        if supply_apy < 0.0 || borrow_apy < 0.0 {
            return Err(format!("negative APY ({supply_apy}, {borrow_apy})"));
        }
        if !(0.0..=1.0).contains(&liquidation_threshold) {
            return Err(format!("liquidation_threshold {liquidation_threshold} outside [0, 1]"));
        }
        if ltv < 0.0 || ltv > liquidation_threshold {
            return Err(format!(
                "ltv {ltv} outside [0, liquidation_threshold {liquidation_threshold}]"
            ));
        }
        if price_usd <= 0.0 {
            return Err(format!("non-positive price {price_usd}"));
        }
        if total_supply < 0.0 || total_borrows < 0.0 || total_borrows > total_supply {
            return Err(format!(
                "inconsistent reserve totals (supply {total_supply}, borrows {total_borrows})"
            ));
        }

        Ok(MarketSnapshot {
            protocol,
            asset,
            supply_apy,
            borrow_apy,
            ltv,
            liquidation_threshold,
            price_usd,
            total_supply,
            total_borrows,
            observed_at,
        })
    }
}

fn lookup<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Result<&'a Value, String> {
    names
        .iter()
        .find_map(|n| obj.get(*n).filter(|v| !v.is_null()))
        .ok_or_else(|| format!("missing field {}", names[0]))
}

fn text_field(obj: &Map<String, Value>, names: &[&str]) -> Result<String, String> {
    let value = lookup(obj, names)?
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| format!("{} is not a string", names[0]))?;
    if value.is_empty() {
        return Err(format!("empty {}", names[0]));
    }
    Ok(value)
}

/// Accepts JSON numbers and decimal strings such as `"4.25"`
fn number_field(obj: &Map<String, Value>, names: &[&str]) -> Result<f64, String> {
    let parsed = match lookup(obj, names)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Decimal::from_str(s.trim())
            .map_err(|e| format!("{}: {}", names[0], e))?
            .to_f64(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(format!("{} is not a number", names[0])),
    }
}

/// RFC3339 string or unix seconds
fn time_field(obj: &Map<String, Value>, names: &[&str]) -> Result<DateTime<Utc>, String> {
    match lookup(obj, names)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| format!("{}: {}", names[0], e)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| format!("{} is not a valid unix timestamp", names[0])),
        _ => Err(format!("{} is not a timestamp", names[0])),
    }
}
