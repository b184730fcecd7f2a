//! Analysis Records
//!
//! Typed per-source results, the combined analysis emitted per job,
//! the job state machine and pipeline counters.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream data providers queried for every token
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceName {
    DexScreener,
    Birdeye,
    RugCheck,
    Jupiter,
}

impl SourceName {
    pub const ALL: [SourceName; 4] = [
        SourceName::DexScreener,
        SourceName::Birdeye,
        SourceName::RugCheck,
        SourceName::Jupiter,
    ];

    /// Service key used for rate limits, cache keys and config
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceName::DexScreener => "dexscreener",
            SourceName::Birdeye => "birdeye",
            SourceName::RugCheck => "rugcheck",
            SourceName::Jupiter => "jupiter",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DEX pair data (price, liquidity, volume)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub price_usd: f64,
    pub liquidity_usd: f64,
    pub volume_24h_usd: f64,
    pub price_change_24h_pct: f64,
    pub market_cap_usd: Option<f64>,
    /// Pair creation time, used for token age
    pub pair_created_at: Option<DateTime<Utc>>,
}

/// On-chain trading activity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradingData {
    pub holder_count: u64,
    pub unique_wallets_24h: u64,
    pub trades_24h: u64,
    pub buys_24h: u64,
    pub sells_24h: u64,
}

impl TradingData {
    /// Buys over total trades, 0.5 when there is no activity
    pub fn buy_ratio(&self) -> f64 {
        let total = self.buys_24h + self.sells_24h;
        if total == 0 {
            0.5
        } else {
            self.buys_24h as f64 / total as f64
        }
    }
}

/// Contract / holder safety report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityData {
    /// Normalised risk 0-100, higher is worse
    pub risk_score: f64,
    pub mint_authority_revoked: bool,
    pub freeze_authority_revoked: bool,
    pub top10_holder_pct: Option<f64>,
    pub lp_locked_pct: Option<f64>,
    /// Names of the risks the provider flagged
    pub flagged_risks: Vec<String>,
}

/// Aggregator listing status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingData {
    pub verified: bool,
    pub tags: Vec<String>,
    pub daily_volume_usd: Option<f64>,
    /// Provider's organic-activity score, 0-100
    pub organic_score: Option<f64>,
}

/// Validated payload from one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceData {
    Market(MarketData),
    Trading(TradingData),
    Security(SecurityData),
    Listing(ListingData),
}

impl SourceData {
    /// Provider that produces this kind of payload
    pub fn source(&self) -> SourceName {
        match self {
            SourceData::Market(_) => SourceName::DexScreener,
            SourceData::Trading(_) => SourceName::Birdeye,
            SourceData::Security(_) => SourceName::RugCheck,
            SourceData::Listing(_) => SourceName::Jupiter,
        }
    }
}

/// Outcome of querying one provider within a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SourceResult {
    /// Provider answered
    Present { data: SourceData },
    /// Provider failed permanently or exhausted its retries
    Degraded { error: String, attempts: u32 },
}

impl SourceResult {
    pub fn present(data: SourceData) -> Self {
        SourceResult::Present { data }
    }

    pub fn degraded(error: impl Into<String>, attempts: u32) -> Self {
        SourceResult::Degraded {
            error: error.into(),
            attempts,
        }
    }

    pub fn data(&self) -> Option<&SourceData> {
        match self {
            SourceResult::Present { data } => Some(data),
            SourceResult::Degraded { .. } => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, SourceResult::Degraded { .. })
    }
}

/// Flattened view of a token that filters evaluate
///
/// Optional fields are `None` when the providing source was degraded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetrics {
    pub address: String,
    pub chain: String,
    pub age_hours: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub volume_24h_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub price_change_24h_pct: Option<f64>,
    pub holder_count: Option<u64>,
    pub top10_holder_pct: Option<f64>,
    pub mint_authority_revoked: Option<bool>,
    pub verified: Option<bool>,
    pub overall_score: f64,
    pub risk_score: f64,
    pub opportunity_score: f64,
}

impl TokenMetrics {
    /// Collect source fields into the flat view; scores are filled in later
    pub fn from_sources(
        address: &str,
        chain: &str,
        sources: &BTreeMap<SourceName, SourceResult>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut metrics = TokenMetrics {
            address: address.to_string(),
            chain: chain.to_string(),
            ..Default::default()
        };

        for data in sources.values().filter_map(SourceResult::data) {
            match data {
                SourceData::Market(m) => {
                    metrics.liquidity_usd = Some(m.liquidity_usd);
                    metrics.volume_24h_usd = Some(m.volume_24h_usd);
                    metrics.market_cap_usd = m.market_cap_usd;
                    metrics.price_change_24h_pct = Some(m.price_change_24h_pct);
                    metrics.age_hours = m.pair_created_at.map(|created| {
                        (now - created).num_seconds().max(0) as f64 / 3600.0
                    });
                }
                SourceData::Trading(t) => {
                    metrics.holder_count = Some(t.holder_count);
                }
                SourceData::Security(s) => {
                    metrics.mint_authority_revoked = Some(s.mint_authority_revoked);
                    metrics.top10_holder_pct = s.top10_holder_pct;
                }
                SourceData::Listing(l) => {
                    metrics.verified = Some(l.verified);
                }
            }
        }

        metrics
    }
}

/// Result of one aggregation job, immutable after emission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedAnalysis {
    pub token_address: String,
    pub sources: BTreeMap<SourceName, SourceResult>,
    pub metrics: TokenMetrics,
    pub overall_score: f64,
    pub risk_score: f64,
    pub opportunity_score: f64,
    /// True iff `failed_filters` is empty
    pub passed: bool,
    pub failed_filters: Vec<String>,
    /// True when any source is degraded
    pub has_errors: bool,
    pub timestamp: DateTime<Utc>,
}

impl CombinedAnalysis {
    /// Sources that did not contribute to this analysis
    pub fn degraded_sources(&self) -> Vec<SourceName> {
        self.sources
            .iter()
            .filter(|(_, result)| result.is_degraded())
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        !self.has_errors
    }
}

/// Per-address job phases; transitions are strictly ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Discovered,
    Fetching,
    Combining,
    Scoring,
    Filtering,
    Passed,
    Rejected,
    /// Every source degraded
    Failed,
}

impl JobState {
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Discovered, Fetching)
                | (Fetching, Combining)
                | (Combining, Scoring)
                | (Combining, Failed)
                | (Scoring, Filtering)
                | (Filtering, Passed)
                | (Filtering, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Passed | JobState::Rejected | JobState::Failed)
    }
}

/// Process-lifetime pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Jobs that reached a terminal state
    pub processed: u64,
    pub passed: u64,
    /// Completed analyses that failed at least one filter
    pub rejected: u64,
    /// Jobs where every source degraded
    pub failed: u64,
    /// Degraded source results across all jobs
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_name_round_trip() {
        for source in SourceName::ALL {
            assert_eq!(SourceName::parse(source.as_str()), Some(source));
        }
        assert_eq!(SourceName::parse("coingecko"), None);
    }

    #[test]
    fn test_job_state_order() {
        use JobState::*;
        let happy = [Discovered, Fetching, Combining, Scoring, Filtering, Passed];
        for pair in happy.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(Filtering.can_transition_to(Rejected));
        assert!(Combining.can_transition_to(Failed));
    }

    #[test]
    fn test_job_state_cannot_skip() {
        use JobState::*;
        assert!(!Discovered.can_transition_to(Combining));
        assert!(!Fetching.can_transition_to(Scoring));
        assert!(!Scoring.can_transition_to(Passed));
        assert!(!Passed.can_transition_to(Fetching));
        assert!(!Fetching.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Passed.is_terminal());
        assert!(JobState::Rejected.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Filtering.is_terminal());
    }

    #[test]
    fn test_metrics_skip_degraded_sources() {
        let mut sources = BTreeMap::new();
        sources.insert(
            SourceName::DexScreener,
            SourceResult::present(SourceData::Market(MarketData {
                liquidity_usd: 25_000.0,
                volume_24h_usd: 90_000.0,
                ..Default::default()
            })),
        );
        sources.insert(SourceName::Birdeye, SourceResult::degraded("timeout", 4));

        let metrics = TokenMetrics::from_sources("Mint111", "solana", &sources, Utc::now());

        assert_eq!(metrics.liquidity_usd, Some(25_000.0));
        assert_eq!(metrics.volume_24h_usd, Some(90_000.0));
        assert_eq!(metrics.holder_count, None);
        assert_eq!(metrics.verified, None);
    }

    #[test]
    fn test_buy_ratio_without_trades() {
        assert_eq!(TradingData::default().buy_ratio(), 0.5);
        let t = TradingData { buys_24h: 30, sells_24h: 10, ..Default::default() };
        assert!((t.buy_ratio() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_source_result_serializes_tagged() {
        let result = SourceResult::degraded("HTTP 503", 3);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["attempts"], 3);
    }
}
