//! Price oracles supplying one snapshot per fast-pass cycle.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::types::PriceResponse;

/// Token symbol or address to current price. Absent tokens are unpriced.
pub type PriceSnapshot = HashMap<String, Decimal>;

const DEFAULT_PRICE_API: &str = "https://api.jup.ag/price/v2";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(15);

#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_prices(&self) -> Result<PriceSnapshot>;

    /// Start quoting another token. Oracles with a fixed table ignore this.
    async fn watch(&self, _token: &str) {}
}

/// Oracle serving a fixed, updatable price table.
pub struct StaticPriceOracle {
    prices: RwLock<PriceSnapshot>,
}

impl StaticPriceOracle {
    pub fn new(prices: PriceSnapshot) -> Self {
        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Placeholder quotes used for dry runs without a price API.
    pub fn with_sample_prices() -> Self {
        Self::new(HashMap::from([
            ("SOLANA".to_string(), dec!(20.45)),
            ("BONK".to_string(), dec!(0.00002)),
            ("TAKI".to_string(), dec!(0.0115)),
        ]))
    }

    pub async fn set_price(&self, token: &str, price: Decimal) {
        self.prices.write().await.insert(token.to_string(), price);
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn get_prices(&self) -> Result<PriceSnapshot> {
        Ok(self.prices.read().await.clone())
    }
}

/// Oracle backed by a Jupiter-style `GET /price?ids=A,B` endpoint.
pub struct HttpPriceOracle {
    client: Client,
    base_url: String,
    tokens: RwLock<Vec<String>>,
}

impl HttpPriceOracle {
    pub fn new(tokens: Vec<String>) -> Result<Self> {
        Self::with_base_url(DEFAULT_PRICE_API.to_string(), tokens)
    }

    /// Create with custom base URL (for self-hosted price services).
    pub fn with_base_url(base_url: String, tokens: Vec<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            tokens: RwLock::new(tokens),
        })
    }

    async fn fetch_once(&self, ids: &str) -> Result<PriceSnapshot> {
        let url = format!("{}?ids={}", self.base_url, ids);
        debug!(url = %url, "Fetching prices");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch prices")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Price request failed: {} - {}", status, body);
        }

        let body: PriceResponse = response
            .json()
            .await
            .context("Failed to parse price response")?;

        Ok(body.into_snapshot())
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn get_prices(&self) -> Result<PriceSnapshot> {
        let ids = self.tokens.read().await.join(",");
        if ids.is_empty() {
            return Ok(PriceSnapshot::new());
        }

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(MAX_RETRY_ELAPSED),
            ..Default::default()
        };

        backoff::future::retry(policy, || async {
            self.fetch_once(&ids).await.map_err(|e| {
                warn!(error = %e, "Price fetch failed, retrying");
                backoff::Error::transient(e)
            })
        })
        .await
    }

    async fn watch(&self, token: &str) {
        let mut tokens = self.tokens.write().await;
        if !tokens.iter().any(|t| t == token) {
            debug!(token = %token, "Watching token");
            tokens.push(token.to_string());
        }
    }
}
