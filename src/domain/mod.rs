//! Domain Layer - Core types and pure logic for the analysis pipeline
//!
//! No I/O happens here. External interactions go through the ports layer.
//!
//! - `token`: discovered token candidates
//! - `analysis`: source payloads, combined analysis, job states, counters
//! - `filter`: declarative filter specs and the filter pipeline
//! - `scoring`: per-source sub-scores and weighted combination
//! - `events`: events published by the aggregator

pub mod token;
pub mod analysis;
pub mod filter;
pub mod scoring;
pub mod events;

pub use token::{TokenCandidate, DEFAULT_CHAIN};
pub use analysis::{
    CombinedAnalysis, JobState, ListingData, MarketData, PipelineStats, SecurityData,
    SourceData, SourceName, SourceResult, TokenMetrics, TradingData,
};
pub use filter::{
    apply_custom_filter, apply_filter, apply_filter_chain, apply_filter_chain_with_stats,
    apply_filter_with_stats, Filter, FilterError, FilterPipeline, FilterSpec, FilterStats,
    FilterSubject, FilteredTokens,
};
pub use scoring::{Scorer, Scores, ScoringConfig, ScoringError, SourceWeights, SubScore};
pub use events::PipelineEvent;
