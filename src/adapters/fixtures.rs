//! File-backed data providers
//!
//! Read the same JSON the data API serves, from disk. Used for demos and
//! offline runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::wire::{self, TokenMarket, WalletData};
use crate::domain::WalletPosition;
use crate::ports::{
    Clock, MarketDataError, MarketDataProvider, RawMarketBatch, WalletDataError,
    WalletDataProvider,
};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MarketFile {
    Versioned { version: u64, tokens: Vec<TokenMarket> },
    Plain(Vec<TokenMarket>),
}

pub struct FileMarketProvider {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileMarketProvider {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }
}

#[async_trait]
impl MarketDataProvider for FileMarketProvider {
    async fn fetch(&self, protocols: &[String]) -> Result<RawMarketBatch, MarketDataError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| MarketDataError::Unavailable(format!("{}: {}", self.path.display(), e)))?;

        let now = self.clock.now();
        let (version, tokens) = match serde_json::from_str::<MarketFile>(&content)
            .map_err(|e| MarketDataError::ParseError(format!("{}: {}", self.path.display(), e)))?
        {
            MarketFile::Versioned { version, tokens } => (version, tokens),
            MarketFile::Plain(tokens) => (now.timestamp().max(0) as u64, tokens),
        };

        tracing::debug!("Loaded {} tokens from {}", tokens.len(), self.path.display());
        Ok(wire::market_batch(tokens, version, protocols, now))
    }
}

/// Wallet file: a map of wallet id to the API's wallet payload
pub struct FileWalletProvider {
    path: PathBuf,
}

impl FileWalletProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl WalletDataProvider for FileWalletProvider {
    async fn fetch(&self, wallet_id: &str) -> Result<Vec<WalletPosition>, WalletDataError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| WalletDataError::Unavailable(format!("{}: {}", self.path.display(), e)))?;

        let mut wallets: HashMap<String, WalletData> = serde_json::from_str(&content)
            .map_err(|e| WalletDataError::Malformed(format!("{}: {}", self.path.display(), e)))?;
        let data = wallets
            .remove(wallet_id)
            .ok_or_else(|| WalletDataError::NotFound(wallet_id.to_string()))?;

        wire::wallet_positions(data)
    }
}
