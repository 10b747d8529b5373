pub mod vscale;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;

/// A named Vscale account credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub token: String,
}

impl Account {
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Billing API request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Billing API error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Source of account balances, in roubles.
///
/// A failed lookup is an error, never a zero balance.
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    async fn balance(&self, token: &str) -> Result<f64, ProviderError>;
}

/// Fetch every account's balance concurrently, preserving account order.
pub async fn fetch_all<'a>(
    provider: &dyn BalanceProvider,
    accounts: &'a [Account],
) -> Vec<(&'a Account, Result<f64, ProviderError>)> {
    let results = join_all(accounts.iter().map(|acc| provider.balance(&acc.token))).await;
    accounts.iter().zip(results).collect()
}
