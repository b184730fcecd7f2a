//! Pipeline Events
//!
//! Closed set of events the aggregator publishes. Subscribers (store, notifiers)
//! receive them over a broadcast channel and never call back into the pipeline.

use std::sync::Arc;

use super::analysis::{CombinedAnalysis, PipelineStats};
use super::token::TokenCandidate;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A token was seen for the first time
    TokenDiscovered(TokenCandidate),
    /// Analysis completed and every filter passed
    AnalysisPassed(Arc<CombinedAnalysis>),
    /// Analysis completed but at least one filter failed
    AnalysisFailed(Arc<CombinedAnalysis>),
    /// Job failed because every source degraded
    PipelineError {
        token_address: String,
        message: String,
    },
    /// Counters changed
    StatsUpdated(PipelineStats),
}

impl PipelineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::TokenDiscovered(_) => "token_discovered",
            PipelineEvent::AnalysisPassed(_) => "analysis_passed",
            PipelineEvent::AnalysisFailed(_) => "analysis_failed",
            PipelineEvent::PipelineError { .. } => "pipeline_error",
            PipelineEvent::StatsUpdated(_) => "stats_updated",
        }
    }

    /// Address the event is about, if any
    pub fn token_address(&self) -> Option<&str> {
        match self {
            PipelineEvent::TokenDiscovered(t) => Some(&t.address),
            PipelineEvent::AnalysisPassed(a) | PipelineEvent::AnalysisFailed(a) => {
                Some(&a.token_address)
            }
            PipelineEvent::PipelineError { token_address, .. } => Some(token_address),
            PipelineEvent::StatsUpdated(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_and_address() {
        let event = PipelineEvent::TokenDiscovered(TokenCandidate::from_address("Mint111"));
        assert_eq!(event.kind(), "token_discovered");
        assert_eq!(event.token_address(), Some("Mint111"));

        let stats = PipelineEvent::StatsUpdated(PipelineStats::default());
        assert_eq!(stats.kind(), "stats_updated");
        assert_eq!(stats.token_address(), None);
    }
}
