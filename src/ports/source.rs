//! Source Ports
//!
//! Contracts for upstream data providers. The pipeline only depends on
//! `fetch(address) -> SourceData | SourceError` and a liveness probe.

use async_trait::async_trait;
use thiserror::Error;

use crate::adapters::rate_limiter::Retryable;
use crate::domain::{SourceData, SourceName, TokenCandidate};

/// Errors a provider can return
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    /// Network failure, timeout, 429 or 5xx - worth retrying
    #[error("Transient source error: {0}")]
    Transient(String),

    /// 4xx, not found, undecodable payload - retrying will not help
    #[error("Permanent source error: {0}")]
    Permanent(String),
}

impl SourceError {
    pub fn transient(msg: impl Into<String>) -> Self {
        SourceError::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        SourceError::Permanent(msg.into())
    }
}

impl Retryable for SourceError {
    fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

/// One upstream provider queried per token
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Which provider this is; also the rate-limit service key
    fn name(&self) -> SourceName;

    /// Fetch and validate this provider's data for a token
    async fn fetch(&self, address: &str) -> Result<SourceData, SourceError>;

    /// Liveness probe used for batch health gating
    async fn health_check(&self) -> bool;
}

/// Feed of newly listed tokens
#[async_trait]
pub trait DiscoveryPort: Send + Sync {
    /// Rate-limit service key for discovery calls
    fn service(&self) -> &str;

    async fn discover(&self) -> Result<Vec<TokenCandidate>, SourceError>;
}
