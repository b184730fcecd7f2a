//! Event Sinks
//!
//! Background consumers of the aggregator's event stream. A sink never feeds
//! back into the pipeline; failures are logged and the sink keeps reading.
//! Both sinks end when the channel closes and report how many events they handled.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::domain::PipelineEvent;
use crate::ports::{Notifier, Store};

/// Persist discovered tokens and finished analyses
pub fn spawn_store_sink(
    mut rx: broadcast::Receiver<PipelineEvent>,
    store: Arc<dyn Store>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut written = 0u64;
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Store sink lagged, {} events dropped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let result = match &event {
                PipelineEvent::TokenDiscovered(token) => store.upsert_token(token).await,
                PipelineEvent::AnalysisPassed(analysis) | PipelineEvent::AnalysisFailed(analysis) => {
                    store.save_analysis(analysis).await
                }
                _ => continue,
            };

            match result {
                Ok(()) => written += 1,
                Err(e) => error!(
                    "Failed to persist {} for {}: {}",
                    event.kind(),
                    event.token_address().unwrap_or("-"),
                    e
                ),
            }
        }
        debug!("Store sink stopped after {} writes", written);
        written
    })
}

/// Forward events to every notifier that wants them
pub fn spawn_notifier_sink(
    mut rx: broadcast::Receiver<PipelineEvent>,
    notifiers: Vec<Arc<dyn Notifier>>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut delivered = 0u64;
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Notifier sink lagged, {} events dropped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            for notifier in notifiers.iter().filter(|n| n.wants(&event)) {
                match notifier.notify(&event).await {
                    Ok(()) => delivered += 1,
                    Err(e) => warn!("Notifier '{}' failed on {}: {}", notifier.name(), event.kind(), e),
                }
            }
        }
        debug!("Notifier sink stopped after {} deliveries", delivered);
        delivered
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CombinedAnalysis, PipelineStats, TokenCandidate, TokenMetrics};
    use crate::ports::mocks::{MemoryStore, RecordingNotifier};
    use crate::ports::store::MockStore;
    use crate::ports::PersistenceError;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn analysis(address: &str, passed: bool) -> Arc<CombinedAnalysis> {
        Arc::new(CombinedAnalysis {
            token_address: address.to_string(),
            sources: BTreeMap::new(),
            metrics: TokenMetrics::default(),
            overall_score: 55.0,
            risk_score: 40.0,
            opportunity_score: 50.0,
            passed,
            failed_filters: Vec::new(),
            has_errors: false,
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_store_sink_persists_tokens_and_analyses() {
        let (tx, rx) = broadcast::channel(16);
        let store = Arc::new(MemoryStore::new());
        let handle = spawn_store_sink(rx, store.clone());

        tx.send(PipelineEvent::TokenDiscovered(TokenCandidate::from_address("Mint111"))).unwrap();
        tx.send(PipelineEvent::StatsUpdated(PipelineStats::default())).unwrap();
        tx.send(PipelineEvent::AnalysisPassed(analysis("Mint111", true))).unwrap();
        tx.send(PipelineEvent::AnalysisFailed(analysis("Mint222", false))).unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), 3);
        assert_eq!(store.tokens().len(), 1);
        assert_eq!(store.analyses().len(), 2);
    }

    #[tokio::test]
    async fn test_store_sink_survives_write_errors() {
        let mut store = MockStore::new();
        store
            .expect_upsert_token()
            .times(2)
            .returning(|t| {
                if t.address == "Bad" {
                    Err(PersistenceError::Unavailable("disk full".into()))
                } else {
                    Ok(())
                }
            });
        store
            .expect_save_analysis()
            .withf(|a| a.token_address == "Good")
            .times(1)
            .returning(|_| Ok(()));

        let (tx, rx) = broadcast::channel(16);
        let handle = spawn_store_sink(rx, Arc::new(store));

        tx.send(PipelineEvent::TokenDiscovered(TokenCandidate::from_address("Bad"))).unwrap();
        tx.send(PipelineEvent::TokenDiscovered(TokenCandidate::from_address("Good"))).unwrap();
        tx.send(PipelineEvent::AnalysisPassed(analysis("Good", true))).unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_store_sink_continues_after_lag() {
        let (tx, rx) = broadcast::channel(2);
        for i in 0..5 {
            tx.send(PipelineEvent::TokenDiscovered(TokenCandidate::from_address(format!("Mint{}", i))))
                .unwrap();
        }
        drop(tx);

        let store = Arc::new(MemoryStore::new());
        let written = spawn_store_sink(rx, store.clone()).await.unwrap();

        assert_eq!(written, 2);
        let mut addresses: Vec<String> = store.tokens().into_iter().map(|t| t.address).collect();
        addresses.sort();
        assert_eq!(addresses, vec!["Mint3", "Mint4"]);
    }

    #[tokio::test]
    async fn test_notifier_sink_respects_interest() {
        let (tx, rx) = broadcast::channel(16);
        let recording = RecordingNotifier::new();
        let log: Arc<dyn Notifier> = Arc::new(crate::adapters::alerts::LogNotifier);
        let handle = spawn_notifier_sink(rx, vec![Arc::new(recording.clone()), log]);

        tx.send(PipelineEvent::AnalysisPassed(analysis("Mint111", true))).unwrap();
        tx.send(PipelineEvent::AnalysisFailed(analysis("Mint222", false))).unwrap();
        tx.send(PipelineEvent::StatsUpdated(PipelineStats::default())).unwrap();
        drop(tx);

        // recording takes all three, the log notifier only the passed analysis
        assert_eq!(handle.await.unwrap(), 4);
        assert_eq!(
            recording.received(),
            vec!["analysis_passed", "analysis_failed", "stats_updated"]
        );
    }
}
