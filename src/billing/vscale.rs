use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{BalanceProvider, ProviderError};

pub const DEFAULT_BASE_URL: &str = "https://api.vscale.io/v1";

/// Body of `GET /billing/balance`; amounts are in kopecks
#[derive(Debug, Deserialize)]
struct BillingResponse {
    balance: i64,
}

pub struct VscaleClient {
    client: reqwest::Client,
    base_url: String,
}

impl VscaleClient {
    pub fn new(base_url: &str) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn kopecks_to_roubles(kopecks: i64) -> f64 {
    kopecks as f64 / 100.0
}

#[async_trait]
impl BalanceProvider for VscaleClient {
    async fn balance(&self, token: &str) -> Result<f64, ProviderError> {
        let url = format!("{}/billing/balance", self.base_url);

        debug!("Fetching Vscale balance: {}", url);

        let response = self
            .client
            .get(&url)
            .header("X-Token", token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let billing: BillingResponse = response.json().await?;
        Ok(kopecks_to_roubles(billing.balance))
    }
}
