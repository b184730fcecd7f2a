//! DexScreener Client
//!
//! Market data (price, liquidity, volume, age) for a token and the discovery feed
//! of newly profiled tokens.
//!
//! # Endpoints Used
//! - `GET /token-pairs/v1/{chain}/{address}`: all pairs for a token
//! - `GET /token-profiles/latest/v1`: latest token profiles (discovery)

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::http::{self, DEFAULT_TIMEOUT_SECS};
use crate::domain::{MarketData, SourceData, SourceName, TokenCandidate};
use crate::ports::{DiscoveryPort, SourceClient, SourceError};

/// DexScreener client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DexScreenerConfig {
    pub base_url: String,
    /// Chain id used in pair lookups and to filter discovery
    pub chain: String,
    pub timeout_secs: u64,
}

impl Default for DexScreenerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.dexscreener.com".to_string(),
            chain: "solana".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPair {
    base_token: RawBaseToken,
    price_usd: Option<String>,
    liquidity: Option<RawLiquidity>,
    volume: Option<RawWindowed>,
    price_change: Option<RawWindowed>,
    market_cap: Option<f64>,
    fdv: Option<f64>,
    /// Milliseconds since epoch
    pair_created_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawBaseToken {
    address: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawLiquidity {
    usd: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawWindowed {
    h24: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProfile {
    chain_id: String,
    token_address: String,
}

impl RawPair {
    fn liquidity_usd(&self) -> f64 {
        self.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0)
    }
}

/// Pick the deepest pair and flatten it into `MarketData`
fn market_data_from_pairs(address: &str, pairs: &[RawPair]) -> Result<MarketData, SourceError> {
    let matching: Vec<&RawPair> = pairs
        .iter()
        .filter(|p| p.base_token.address == address)
        .collect();
    let candidates = if matching.is_empty() {
        pairs.iter().collect()
    } else {
        matching
    };

    let pair = candidates
        .into_iter()
        .max_by(|a, b| a.liquidity_usd().total_cmp(&b.liquidity_usd()))
        .ok_or_else(|| SourceError::permanent(format!("no pairs for {}", address)))?;

    Ok(MarketData {
        price_usd: http::parse_f64(pair.price_usd.as_deref()),
        liquidity_usd: pair.liquidity_usd(),
        volume_24h_usd: pair.volume.as_ref().and_then(|v| v.h24).unwrap_or(0.0),
        price_change_24h_pct: pair.price_change.as_ref().and_then(|v| v.h24).unwrap_or(0.0),
        market_cap_usd: pair.market_cap.or(pair.fdv),
        pair_created_at: pair
            .pair_created_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
    })
}

/// Keep profiles on `chain`, dropping duplicate addresses
fn candidates_from_profiles(chain: &str, profiles: Vec<RawProfile>, now: DateTime<Utc>) -> Vec<TokenCandidate> {
    let mut seen = std::collections::HashSet::new();
    profiles
        .into_iter()
        .filter(|p| p.chain_id == chain)
        .filter(|p| seen.insert(p.token_address.clone()))
        .map(|p| {
            TokenCandidate::from_address(p.token_address)
                .with_chain(chain)
                .with_detected_at(now)
        })
        .collect()
}

/// DexScreener market data source and discovery feed
#[derive(Debug, Clone)]
pub struct DexScreenerClient {
    config: DexScreenerConfig,
    http: Client,
}

impl DexScreenerClient {
    pub fn new(config: DexScreenerConfig) -> Result<Self, SourceError> {
        let http = http::build_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    async fn raw_pairs(&self, address: &str) -> Result<Vec<RawPair>, SourceError> {
        let url = format!(
            "{}/token-pairs/v1/{}/{}",
            self.config.base_url,
            self.config.chain,
            http::path_segment(address)?
        );
        http::get_json(self.http.get(&url)).await
    }
}

#[async_trait]
impl SourceClient for DexScreenerClient {
    fn name(&self) -> SourceName {
        SourceName::DexScreener
    }

    async fn fetch(&self, address: &str) -> Result<SourceData, SourceError> {
        let pairs = self.raw_pairs(address).await?;
        market_data_from_pairs(address, &pairs).map(SourceData::Market)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/token-profiles/latest/v1", self.config.base_url);
        http::probe(self.http.get(&url)).await
    }
}

#[async_trait]
impl DiscoveryPort for DexScreenerClient {
    fn service(&self) -> &str {
        SourceName::DexScreener.as_str()
    }

    async fn discover(&self) -> Result<Vec<TokenCandidate>, SourceError> {
        let url = format!("{}/token-profiles/latest/v1", self.config.base_url);
        let profiles: Vec<RawProfile> = http::get_json(self.http.get(&url)).await?;
        let candidates = candidates_from_profiles(&self.config.chain, profiles, Utc::now());
        tracing::debug!(count = candidates.len(), "DexScreener discovery batch");
        Ok(candidates)
    }
}
