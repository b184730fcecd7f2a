//! Token Candidates
//!
//! A token as first seen by the discovery feed, before any analysis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default chain used when a candidate is created without one
pub const DEFAULT_CHAIN: &str = "solana";

/// A newly discovered token, keyed by its address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCandidate {
    /// Token address (mint on Solana), unique per candidate
    pub address: String,
    /// Token symbol
    pub symbol: String,
    /// Token name
    pub name: String,
    /// Chain identifier (e.g. "solana")
    pub chain: String,
    /// When the discovery feed first reported this token
    pub first_detected_at: DateTime<Utc>,
}

impl TokenCandidate {
    pub fn new(address: impl Into<String>, symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            symbol: symbol.into(),
            name: name.into(),
            chain: DEFAULT_CHAIN.to_string(),
            first_detected_at: Utc::now(),
        }
    }

    /// Candidate known only by address (e.g. a manual `analyze` request)
    pub fn from_address(address: impl Into<String>) -> Self {
        Self::new(address, String::new(), String::new())
    }

    pub fn with_chain(mut self, chain: impl Into<String>) -> Self {
        self.chain = chain.into();
        self
    }

    pub fn with_detected_at(mut self, at: DateTime<Utc>) -> Self {
        self.first_detected_at = at;
        self
    }

    /// Hours since first detection
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.first_detected_at).num_seconds().max(0);
        secs as f64 / 3600.0
    }

    /// Symbol for logging, falls back to a shortened address
    pub fn display_symbol(&self) -> &str {
        if self.symbol.is_empty() {
            self.address
                .char_indices()
                .nth(8)
                .map_or(&self.address[..], |(i, _)| &self.address[..i])
        } else {
            &self.symbol
        }
    }
}
