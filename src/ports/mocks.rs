//! In-memory port implementations that record calls and return scripted responses

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::notifier::{Notifier, NotifyError};
use super::source::{DiscoveryPort, SourceClient, SourceError};
use super::store::{PersistenceError, Store};
use crate::domain::{CombinedAnalysis, PipelineEvent, SourceData, SourceName, TokenCandidate};

/// Mock provider: plays back a script, then repeats a fallback response
#[derive(Debug)]
pub struct MockSource {
    name: SourceName,
    script: Mutex<VecDeque<Result<SourceData, SourceError>>>,
    fallback: Result<SourceData, SourceError>,
    calls: Mutex<Vec<String>>,
    healthy: AtomicBool,
    delay: Option<Duration>,
}

impl MockSource {
    /// Always answers with `data`
    pub fn succeeding(data: SourceData) -> Self {
        Self {
            name: data.source(),
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(data),
            calls: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
            delay: None,
        }
    }

    /// Always fails with `error`
    pub fn failing(name: SourceName, error: SourceError) -> Self {
        Self {
            name,
            script: Mutex::new(VecDeque::new()),
            fallback: Err(error),
            calls: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
            delay: None,
        }
    }

    /// Builder: responses returned before the fallback, in order
    pub fn with_script(self, script: Vec<Result<SourceData, SourceError>>) -> Self {
        *self.script.lock() = script.into();
        self
    }

    /// Builder: simulate upstream latency
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Addresses fetched so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_for(&self, address: &str) -> usize {
        self.calls.lock().iter().filter(|a| *a == address).count()
    }
}

#[async_trait]
impl SourceClient for MockSource {
    fn name(&self) -> SourceName {
        self.name
    }

    async fn fetch(&self, address: &str) -> Result<SourceData, SourceError> {
        self.calls.lock().push(address.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Mock discovery feed returning a fixed batch per call
#[derive(Debug, Default)]
pub struct MockDiscovery {
    batches: Mutex<VecDeque<Result<Vec<TokenCandidate>, SourceError>>>,
    calls: AtomicU32,
}

impl MockDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: queue one discovery response
    pub fn with_batch(self, batch: Vec<TokenCandidate>) -> Self {
        self.batches.lock().push_back(Ok(batch));
        self
    }

    pub fn with_error(self, error: SourceError) -> Self {
        self.batches.lock().push_back(Err(error));
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryPort for MockDiscovery {
    fn service(&self) -> &str {
        SourceName::DexScreener.as_str()
    }

    async fn discover(&self) -> Result<Vec<TokenCandidate>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Store that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    tokens: Mutex<HashMap<String, TokenCandidate>>,
    analyses: Mutex<Vec<CombinedAnalysis>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    pub fn tokens(&self) -> Vec<TokenCandidate> {
        self.tokens.lock().values().cloned().collect()
    }

    pub fn analyses(&self) -> Vec<CombinedAnalysis> {
        self.analyses.lock().clone()
    }

    fn check_writable(&self) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(PersistenceError::Unavailable("memory store set to fail".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_token(&self, token: &TokenCandidate) -> Result<(), PersistenceError> {
        self.check_writable()?;
        self.tokens.lock().insert(token.address.clone(), token.clone());
        Ok(())
    }

    async fn save_analysis(&self, analysis: &CombinedAnalysis) -> Result<(), PersistenceError> {
        self.check_writable()?;
        self.analyses.lock().push(analysis.clone());
        Ok(())
    }
}

/// Notifier that records the kinds of events it was handed
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    received: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    fn wants(&self, _event: &PipelineEvent) -> bool {
        true
    }

    async fn notify(&self, event: &PipelineEvent) -> Result<(), NotifyError> {
        self.received.lock().push(event.kind().to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MarketData;

    #[tokio::test]
    async fn test_mock_source_script_then_fallback() {
        let source = MockSource::succeeding(SourceData::Market(MarketData::default()))
            .with_script(vec![Err(SourceError::transient("503"))]);

        assert!(source.fetch("Mint111").await.is_err());
        assert!(source.fetch("Mint111").await.is_ok());
        assert!(source.fetch("Mint222").await.is_ok());

        assert_eq!(source.calls_for("Mint111"), 2);
        assert_eq!(source.call_count(), 3);
        assert_eq!(source.name(), SourceName::DexScreener);
    }

    #[tokio::test]
    async fn test_mock_source_health_toggle() {
        let source = MockSource::failing(SourceName::Birdeye, SourceError::permanent("401"));
        assert!(source.health_check().await);
        source.set_healthy(false);
        assert!(!source.health_check().await);
    }

    #[tokio::test]
    async fn test_memory_store_upserts_by_address() {
        let store = MemoryStore::new();
        store.upsert_token(&TokenCandidate::new("Mint111", "A", "A")).await.unwrap();
        store.upsert_token(&TokenCandidate::new("Mint111", "B", "B")).await.unwrap();

        let tokens = store.tokens();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].symbol, "B");

        store.set_failing(true);
        assert!(store.upsert_token(&TokenCandidate::from_address("X")).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_discovery_batches() {
        let discovery = MockDiscovery::new()
            .with_batch(vec![TokenCandidate::from_address("Mint111")]);

        assert_eq!(discovery.discover().await.unwrap().len(), 1);
        assert!(discovery.discover().await.unwrap().is_empty());
        assert_eq!(discovery.call_count(), 2);
    }
}
