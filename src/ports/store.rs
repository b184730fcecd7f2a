//! Store Port
//!
//! Persistence collaborator. Writes are at-least-once; deduplication by primary
//! key (token address, analysis timestamp) is the store's job.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{CombinedAnalysis, TokenCandidate};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_token(&self, token: &TokenCandidate) -> Result<(), PersistenceError>;

    async fn save_analysis(&self, analysis: &CombinedAnalysis) -> Result<(), PersistenceError>;
}
