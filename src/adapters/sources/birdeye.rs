//! Birdeye Client
//!
//! Holder and 24h trading activity from the token overview endpoint.
//! Requires an API key (`X-API-KEY`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::http::{self, DEFAULT_TIMEOUT_SECS};
use crate::domain::{SourceData, SourceName, TradingData};
use crate::ports::{SourceClient, SourceError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BirdeyeConfig {
    pub base_url: String,
    /// Overridden by `BIRDEYE_API_KEY`
    pub api_key: Option<String>,
    pub chain: String,
    pub timeout_secs: u64,
}

impl Default for BirdeyeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://public-api.birdeye.so".to_string(),
            api_key: None,
            chain: "solana".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOverview {
    holder: Option<u64>,
    #[serde(rename = "uniqueWallet24h")]
    unique_wallet_24h: Option<u64>,
    trade24h: Option<u64>,
    buy24h: Option<u64>,
    sell24h: Option<u64>,
}

fn trading_data(envelope: Envelope<RawOverview>) -> Result<TradingData, SourceError> {
    if !envelope.success {
        return Err(SourceError::permanent(format!(
            "birdeye rejected request: {}",
            envelope.message.unwrap_or_else(|| "unknown reason".to_string())
        )));
    }
    let raw = envelope
        .data
        .ok_or_else(|| SourceError::permanent("birdeye returned no data"))?;

    Ok(TradingData {
        holder_count: raw.holder.unwrap_or(0),
        unique_wallets_24h: raw.unique_wallet_24h.unwrap_or(0),
        trades_24h: raw.trade24h.unwrap_or(0),
        buys_24h: raw.buy24h.unwrap_or(0),
        sells_24h: raw.sell24h.unwrap_or(0),
    })
}

/// Birdeye trading data source
#[derive(Debug, Clone)]
pub struct BirdeyeClient {
    config: BirdeyeConfig,
    http: Client,
}

impl BirdeyeClient {
    pub fn new(config: BirdeyeConfig) -> Result<Self, SourceError> {
        let http = http::build_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn has_api_key(&self) -> bool {
        self.config.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    fn request(&self, path: &str) -> Result<RequestBuilder, SourceError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SourceError::permanent("birdeye API key not configured"))?;

        Ok(self
            .http
            .get(format!("{}{}", self.config.base_url, path))
            .header("X-API-KEY", key)
            .header("x-chain", &self.config.chain))
    }

    fn overview_request(&self, address: &str) -> Result<RequestBuilder, SourceError> {
        Ok(self
            .request("/defi/token_overview")?
            .query(&[("address", address)]))
    }
}

#[async_trait]
impl SourceClient for BirdeyeClient {
    fn name(&self) -> SourceName {
        SourceName::Birdeye
    }

    async fn fetch(&self, address: &str) -> Result<SourceData, SourceError> {
        let request = self.overview_request(address)?;
        let envelope: Envelope<RawOverview> = http::get_json(request).await?;
        trading_data(envelope).map(SourceData::Trading)
    }

    async fn health_check(&self) -> bool {
        match self.request("/defi/networks") {
            Ok(request) => http::probe(request).await,
            Err(_) => false,
        }
    }
}
