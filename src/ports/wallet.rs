use async_trait::async_trait;
use thiserror::Error;

use crate::domain::WalletPosition;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WalletDataError {
    #[error("Wallet source unavailable: {0}")]
    Unavailable(String),

    #[error("Wallet not found: {0}")]
    NotFound(String),

    #[error("Malformed wallet data: {0}")]
    Malformed(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletDataProvider: Send + Sync {
    async fn fetch(&self, wallet_id: &str) -> Result<Vec<WalletPosition>, WalletDataError>;
}
