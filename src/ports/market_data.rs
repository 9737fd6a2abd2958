use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Market data error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketDataError {
    #[error("Market data source unavailable: {0}")]
    Unavailable(String),

    #[error("REST API error: {0}")]
    RestError(String),

    #[error("Data parsing error: {0}")]
    ParseError(String),
}

/// Unvalidated records from one protocol, as delivered by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMarketFeed {
    pub protocol: String,
    pub records: Vec<serde_json::Value>,
}

/// All feeds from one fetch, tagged with the provider's version token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMarketBatch {
    pub version: u64,
    pub feeds: Vec<RawMarketFeed>,
}

/// Source of raw lending-market feeds.
///
/// May return a partial batch: protocols that could not be fetched are
/// simply absent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch(&self, protocols: &[String]) -> Result<RawMarketBatch, MarketDataError>;
}
