//! Source Adapters
//!
//! HTTP clients for the four upstream providers:
//! - DexScreener: market data and the discovery feed
//! - Birdeye: holders and trading activity
//! - RugCheck: contract safety report
//! - Jupiter: listing and verification status

pub mod http;
pub mod dexscreener;
pub mod birdeye;
pub mod rugcheck;
pub mod jupiter;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ports::{DiscoveryPort, SourceClient, SourceError};

pub use birdeye::{BirdeyeClient, BirdeyeConfig};
pub use dexscreener::{DexScreenerClient, DexScreenerConfig};
pub use jupiter::{JupiterClient, JupiterConfig};
pub use rugcheck::{RugCheckClient, RugCheckConfig};

/// Per-provider client settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub dexscreener: DexScreenerConfig,
    pub birdeye: BirdeyeConfig,
    pub rugcheck: RugCheckConfig,
    pub jupiter: JupiterConfig,
}

/// Live clients plus the discovery feed
pub struct SourceSet {
    pub sources: Vec<Arc<dyn SourceClient>>,
    pub discovery: Arc<dyn DiscoveryPort>,
}

impl SourceSet {
    pub fn from_config(config: &SourcesConfig) -> Result<Self, SourceError> {
        let dexscreener = Arc::new(DexScreenerClient::new(config.dexscreener.clone())?);
        let birdeye = BirdeyeClient::new(config.birdeye.clone())?;
        if !birdeye.has_api_key() {
            tracing::warn!("Birdeye API key not set, trading data will be degraded");
        }

        let sources: Vec<Arc<dyn SourceClient>> = vec![
            dexscreener.clone(),
            Arc::new(birdeye),
            Arc::new(RugCheckClient::new(config.rugcheck.clone())?),
            Arc::new(JupiterClient::new(config.jupiter.clone())?),
        ];

        Ok(Self {
            sources,
            discovery: dexscreener,
        })
    }
}
