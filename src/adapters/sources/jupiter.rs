//! Jupiter Token Client
//!
//! Listing status from Jupiter's Token API V2: verification, tags, organic score
//! and 24h volume.
//!
//! # Endpoints Used
//! - `GET {base}/search?query={mint}` (mint sent as an encoded query parameter)
//!
//! `lite-api.jup.ag` is the free tier; with an API key, `api.jup.ag` is used.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::http::{self, DEFAULT_TIMEOUT_SECS};
use crate::domain::{ListingData, SourceData, SourceName};
use crate::ports::{SourceClient, SourceError};

const LITE_TOKEN_API: &str = "https://lite-api.jup.ag/tokens/v2";
const PRO_TOKEN_API: &str = "https://api.jup.ag/tokens/v2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JupiterConfig {
    /// Token API V2 base URL; empty selects lite or pro by API key
    pub token_api_url: String,
    /// Overridden by `JUPITER_API_KEY`
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for JupiterConfig {
    fn default() -> Self {
        Self {
            token_api_url: String::new(),
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl JupiterConfig {
    pub fn resolved_url(&self) -> &str {
        if !self.token_api_url.is_empty() {
            &self.token_api_url
        } else if self.api_key.is_some() {
            PRO_TOKEN_API
        } else {
            LITE_TOKEN_API
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawToken {
    id: String,
    #[serde(default)]
    tags: Vec<String>,
    is_verified: Option<bool>,
    organic_score: Option<f64>,
    stats24h: Option<RawStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStats {
    buy_volume: Option<f64>,
    sell_volume: Option<f64>,
}

fn listing_data(address: &str, tokens: Vec<RawToken>) -> Result<ListingData, SourceError> {
    let token = tokens
        .into_iter()
        .find(|t| t.id == address)
        .ok_or_else(|| SourceError::permanent(format!("token not listed on jupiter: {}", address)))?;

    let verified = token
        .is_verified
        .unwrap_or_else(|| token.tags.iter().any(|t| t == "verified"));

    let daily_volume_usd = token.stats24h.as_ref().and_then(|s| {
        match (s.buy_volume, s.sell_volume) {
            (None, None) => None,
            (buy, sell) => Some(buy.unwrap_or(0.0) + sell.unwrap_or(0.0)),
        }
    });

    Ok(ListingData {
        verified,
        tags: token.tags,
        daily_volume_usd,
        organic_score: token.organic_score.map(|s| s.clamp(0.0, 100.0)),
    })
}

/// Jupiter listing data source
#[derive(Debug, Clone)]
pub struct JupiterClient {
    config: JupiterConfig,
    http: Client,
}

impl JupiterClient {
    pub fn new(config: JupiterConfig) -> Result<Self, SourceError> {
        let http = http::build_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    fn request(&self, url: &str) -> RequestBuilder {
        let request = self.http.get(url);
        match self.config.api_key.as_deref() {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    fn search_request(&self, address: &str) -> RequestBuilder {
        let url = format!("{}/search", self.config.resolved_url());
        self.request(&url).query(&[("query", address)])
    }
}

#[async_trait]
impl SourceClient for JupiterClient {
    fn name(&self) -> SourceName {
        SourceName::Jupiter
    }

    async fn fetch(&self, address: &str) -> Result<SourceData, SourceError> {
        let tokens: Vec<RawToken> = http::get_json(self.search_request(address)).await?;
        listing_data(address, tokens).map(SourceData::Listing)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/tag?query=verified", self.config.resolved_url());
        http::probe(self.request(&url)).await
    }
}
