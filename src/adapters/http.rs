//! Lending data API client
//!
//! HTTP client for the market and wallet data service.
//! Serves `GET /current_markets` and `GET /wallet/{id}`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::wire::{self, TokenMarket, WalletData};
use crate::domain::WalletPosition;
use crate::ports::{
    Clock, MarketDataError, MarketDataProvider, RawMarketBatch, WalletDataError,
    WalletDataProvider,
};

/// Response header carrying the provider's snapshot version
pub const VERSION_HEADER: &str = "x-snapshot-version";

#[derive(Debug, Clone)]
pub struct LendingApiConfig {
    pub market_url: String,
    pub wallet_url: String,
    pub timeout: Duration,
}

impl Default for LendingApiConfig {
    fn default() -> Self {
        Self {
            market_url: "http://localhost:3001".to_string(),
            wallet_url: "http://localhost:3001".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Failure talking to the data service, before it is mapped onto a port error
#[derive(Debug)]
enum ApiFailure {
    Transport(String),
    NotFound,
    Status(StatusCode, String),
    Decode(String),
}

#[derive(Clone)]
pub struct LendingApiClient {
    config: LendingApiConfig,
    http: Client,
    clock: Arc<dyn Clock>,
}

impl LendingApiClient {
    pub fn with_config(config: LendingApiConfig, clock: Arc<dyn Clock>) -> Result<Self, MarketDataError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MarketDataError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, http, clock })
    }

    async fn get(&self, url: &str) -> Result<Response, ApiFailure> {
        tracing::debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ApiFailure::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ApiFailure::NotFound);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiFailure::Status(status, body))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiFailure> {
        let body = response
            .text()
            .await
            .map_err(|e| ApiFailure::Transport(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| {
            ApiFailure::Decode(format!("{} - Body: {}", e, body.chars().take(200).collect::<String>()))
        })
    }
}

fn snapshot_version(response: &Response, fallback: i64) -> u64 {
    response
        .headers()
        .get(VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(fallback.max(0) as u64)
}

#[async_trait]
impl MarketDataProvider for LendingApiClient {
    async fn fetch(&self, protocols: &[String]) -> Result<RawMarketBatch, MarketDataError> {
        let url = format!("{}/current_markets", self.config.market_url.trim_end_matches('/'));
        let fetched_at = self.clock.now();

        let response = self.get(&url).await.map_err(|e| match e {
            ApiFailure::Status(status, body) => {
                MarketDataError::RestError(format!("API error ({}): {}", status, body))
            }
            ApiFailure::NotFound => MarketDataError::RestError(format!("{} not found", url)),
            ApiFailure::Transport(msg) | ApiFailure::Decode(msg) => MarketDataError::Unavailable(msg),
        })?;

        let version = snapshot_version(&response, fetched_at.timestamp());
        let tokens: Vec<TokenMarket> = Self::decode(response).await.map_err(|e| match e {
            ApiFailure::Decode(msg) => MarketDataError::ParseError(msg),
            other => MarketDataError::Unavailable(format!("{:?}", other)),
        })?;

        let batch = wire::market_batch(tokens, version, protocols, fetched_at);
        tracing::info!(
            "Fetched {} protocol feeds (version {})",
            batch.feeds.len(),
            batch.version
        );
        Ok(batch)
    }
}

#[async_trait]
impl WalletDataProvider for LendingApiClient {
    async fn fetch(&self, wallet_id: &str) -> Result<Vec<WalletPosition>, WalletDataError> {
        let url = format!("{}/wallet/{}", self.config.wallet_url.trim_end_matches('/'), wallet_id);

        let response = self.get(&url).await.map_err(|e| match e {
            ApiFailure::NotFound => WalletDataError::NotFound(wallet_id.to_string()),
            ApiFailure::Status(status, body) => {
                WalletDataError::Unavailable(format!("API error ({}): {}", status, body))
            }
            ApiFailure::Transport(msg) | ApiFailure::Decode(msg) => WalletDataError::Unavailable(msg),
        })?;

        let data: WalletData = Self::decode(response).await.map_err(|e| match e {
            ApiFailure::Decode(msg) => WalletDataError::Malformed(msg),
            other => WalletDataError::Unavailable(format!("{:?}", other)),
        })?;

        let positions = wire::wallet_positions(data)?;
        tracing::info!("Fetched {} positions for wallet {}", positions.len(), wallet_id);
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SystemClock;

    #[test]
    fn test_default_config() {
        let config = LendingApiConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.market_url.starts_with("http://"));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let config = LendingApiConfig {
            market_url: "http://127.0.0.1:9".to_string(),
            wallet_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_millis(500),
        };
        let client = LendingApiClient::with_config(config, Arc::new(SystemClock)).unwrap();

        let market = MarketDataProvider::fetch(&client, &[]).await;
        assert!(matches!(market, Err(MarketDataError::Unavailable(_))));

        let wallet = WalletDataProvider::fetch(&client, "abc").await;
        assert!(matches!(wallet, Err(WalletDataError::Unavailable(_))));
    }
}
