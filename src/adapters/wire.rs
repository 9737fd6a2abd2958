//! Wire formats of the market and wallet data API
//!
//! `/current_markets` returns one entry per token with its lending reserves;
//! `/wallet/{id}` returns balances and protocol positions. Numeric fields
//! arrive as decimal strings.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{PositionRole, WalletPosition};
use crate::ports::{RawMarketBatch, RawMarketFeed, WalletDataError};

/// `market_price_sf` is a fixed-point price scaled by 2^60
const PRICE_SCALE: f64 = 1_152_921_504_606_846_976.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMarket {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub market_price_sf: Option<Value>,
    #[serde(default)]
    pub price_usd: Option<Value>,
    #[serde(default)]
    pub mint: String,
    #[serde(default)]
    pub lending_reserves: Vec<LendingReserve>,
}

impl TokenMarket {
    fn price(&self) -> Option<Value> {
        if let Some(p) = &self.price_usd {
            return Some(p.clone());
        }
        let sf = match self.market_price_sf.as_ref()? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => Decimal::from_str(s).ok()?.to_f64()?,
            _ => return None,
        };
        serde_json::Number::from_f64(sf / PRICE_SCALE).map(Value::Number)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendingReserve {
    pub protocol_name: String,
    #[serde(default)]
    pub market_name: String,
    pub total_supply: Value,
    pub total_borrows: Value,
    pub supply_rate: Value,
    #[serde(default)]
    pub supply_rate_7d: Option<Value>,
    #[serde(default)]
    pub supply_rate_30d: Option<Value>,
    /// borrow_rate, ltv, liquidation_threshold, observed_at and friends
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Regroups token-major market data into one raw feed per protocol.
/// Reserves without a timestamp are stamped with `fetched_at`.
pub fn market_batch(
    tokens: Vec<TokenMarket>,
    version: u64,
    protocols: &[String],
    fetched_at: DateTime<Utc>,
) -> RawMarketBatch {
    let mut feeds: BTreeMap<String, Vec<Value>> = BTreeMap::new();

    for token in &tokens {
        let price = token.price();
        for reserve in &token.lending_reserves {
            if !protocols.is_empty() && !protocols.contains(&reserve.protocol_name) {
                continue;
            }

            let mut record = reserve.extra.clone();
            record.insert("protocol".into(), Value::String(reserve.protocol_name.clone()));
            record.insert("asset".into(), Value::String(token.symbol.clone()));
            record.insert("supply_apy".into(), reserve.supply_rate.clone());
            record.insert("total_supply".into(), reserve.total_supply.clone());
            record.insert("total_borrows".into(), reserve.total_borrows.clone());
            if let Some(p) = &price {
                record.entry("price_usd").or_insert_with(|| p.clone());
            }
            if !record.contains_key("observed_at") && !record.contains_key("timestamp") {
                record.insert("observed_at".into(), Value::String(fetched_at.to_rfc3339()));
            }

            feeds
                .entry(reserve.protocol_name.clone())
                .or_default()
                .push(Value::Object(record));
        }
    }

    RawMarketBatch {
        version,
        feeds: feeds
            .into_iter()
            .map(|(protocol, records)| RawMarketFeed { protocol, records })
            .collect(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletData {
    #[serde(default)]
    pub wallet_balances: Vec<WalletBalance>,
    #[serde(default)]
    pub wallet_positions: Vec<WirePosition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBalance {
    pub symbol: String,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePosition {
    pub symbol: String,
    pub protocol_name: String,
    #[serde(default)]
    pub market_name: String,
    pub amount: String,
    pub obligation_type: String,
}

/// Positions keyed by (protocol, asset, role); sub-markets of one protocol
/// are summed
pub fn wallet_positions(data: WalletData) -> Result<Vec<WalletPosition>, WalletDataError> {
    let mut merged: BTreeMap<(String, String, PositionRole), f64> = BTreeMap::new();

    for p in data.wallet_positions {
        let role = match p.obligation_type.to_ascii_lowercase().as_str() {
            "supply" | "deposit" | "collateral" => PositionRole::Supplied,
            "borrow" | "debt" => PositionRole::Borrowed,
            other => {
                return Err(WalletDataError::Malformed(format!(
                    "unknown obligation_type '{}' for {} on {}",
                    other, p.symbol, p.protocol_name
                )))
            }
        };
        let amount = Decimal::from_str(p.amount.trim())
            .ok()
            .and_then(|d| d.to_f64())
            .ok_or_else(|| {
                WalletDataError::Malformed(format!("bad amount '{}' for {}", p.amount, p.symbol))
            })?;

        *merged.entry((p.protocol_name, p.symbol, role)).or_insert(0.0) += amount;
    }

    Ok(merged
        .into_iter()
        .map(|((protocol, asset, role), amount)| WalletPosition {
            asset,
            amount,
            protocol,
            role,
        })
        .collect())
}
