//! Analysis Aggregator
//!
//! Runs one job per token address:
//! Discovered → Fetching → Combining → Scoring → Filtering → Passed | Rejected
//! (or Combining → Failed when every source degrades).
//!
//! Key features:
//! - Concurrent fan-out across all sources, each behind the cache and its own rate limit
//! - A failed source degrades the analysis instead of failing the job
//! - Concurrent requests for the same address share a single job
//! - Typed events over a broadcast channel
//! - Batch runs gated on critical-source health, bounded by a semaphore
//! - Graceful drain of in-flight jobs on shutdown

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, watch, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::adapters::cache::TtlCache;
use crate::adapters::rate_limiter::{RateLimiter, RetryError};
use crate::domain::{
    CombinedAnalysis, FilterPipeline, JobState, PipelineEvent, PipelineStats, Scorer,
    SourceData, SourceName, SourceResult, TokenCandidate, TokenMetrics, DEFAULT_CHAIN,
};
use crate::ports::{DiscoveryPort, SourceClient, SourceError};

/// Default broadcast buffer for pipeline events
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AggregatorError {
    #[error("Invalid aggregator configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid token address: '{0}'")]
    InvalidAddress(String),

    #[error("All {count} sources degraded for {address}")]
    AllSourcesDegraded { address: String, count: usize },

    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("Analysis job for {0} ended without a result")]
    JobAborted(String),

    #[error("Aggregator is draining, no new jobs accepted")]
    ShuttingDown,
}

/// Aggregator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Upper bound on concurrent jobs within one batch
    pub max_concurrent_jobs: usize,
    /// Sources that must be healthy for a batch to run
    pub critical_sources: Vec<SourceName>,
    /// Tracked tokens older than this are dropped by cleanup
    pub token_max_age_hours: f64,
    /// Chain assumed for addresses not seen by discovery
    pub chain: String,
    pub event_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 8,
            critical_sources: vec![SourceName::DexScreener],
            token_max_age_hours: 24.0,
            chain: DEFAULT_CHAIN.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Liveness of every source at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthReport {
    pub sources: BTreeMap<SourceName, bool>,
}

impl HealthReport {
    pub fn unhealthy(&self) -> Vec<SourceName> {
        self.sources
            .iter()
            .filter(|(_, healthy)| !**healthy)
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn all_healthy(&self) -> bool {
        self.sources.values().all(|h| *h)
    }
}

/// Counts for one batch of jobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Tokens returned by discovery (0 for refresh batches)
    pub candidates: usize,
    pub new_tokens: usize,
    pub analyzed: usize,
    pub passed: usize,
    pub rejected: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BatchOutcome {
    /// Not run because a critical source was unhealthy
    Skipped { unhealthy: Vec<SourceName> },
    Completed(BatchSummary),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub expired_cache_entries: usize,
    pub pruned_tokens: usize,
}

type JobResult = Result<Arc<CombinedAnalysis>, AggregatorError>;
type JobReceiver = watch::Receiver<Option<JobResult>>;

struct Inner {
    sources: Vec<Arc<dyn SourceClient>>,
    discovery: Arc<dyn DiscoveryPort>,
    limiter: Arc<RateLimiter>,
    cache: Arc<TtlCache<SourceData>>,
    filters: FilterPipeline,
    scorer: Scorer,
    config: AggregatorConfig,
    in_flight: Mutex<HashMap<String, JobReceiver>>,
    tracked: Mutex<HashMap<String, TokenCandidate>>,
    stats: Mutex<PipelineStats>,
    events: broadcast::Sender<PipelineEvent>,
    idle: Notify,
    accepting: AtomicBool,
}

/// Cheaply cloneable handle to the shared pipeline
#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<Inner>,
}

/// Removes the in-flight entry when a job ends, even by panic
struct InFlightGuard {
    inner: Arc<Inner>,
    address: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        in_flight.remove(&self.address);
        if in_flight.is_empty() {
            self.inner.idle.notify_waiters();
        }
    }
}

/// Per-job state machine, transitions only forward
struct JobTrace<'a> {
    address: &'a str,
    state: JobState,
}

impl<'a> JobTrace<'a> {
    fn new(address: &'a str) -> Self {
        Self {
            address,
            state: JobState::Discovered,
        }
    }

    fn advance(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal job transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(address = self.address, from = ?self.state, to = ?next, "Job state");
        self.state = next;
    }
}

fn cache_key(source: SourceName, address: &str) -> String {
    format!("{}:{}", source, address)
}

impl Aggregator {
    /// Wire the pipeline; every source and the discovery feed need a rate limit
    pub fn new(
        sources: Vec<Arc<dyn SourceClient>>,
        discovery: Arc<dyn DiscoveryPort>,
        limiter: Arc<RateLimiter>,
        cache: Arc<TtlCache<SourceData>>,
        filters: FilterPipeline,
        scorer: Scorer,
        config: AggregatorConfig,
    ) -> Result<Self, AggregatorError> {
        if sources.is_empty() {
            return Err(AggregatorError::InvalidConfig("at least one source is required".into()));
        }
        if config.max_concurrent_jobs == 0 {
            return Err(AggregatorError::InvalidConfig("max_concurrent_jobs must be > 0".into()));
        }

        let mut names = Vec::with_capacity(sources.len());
        for source in &sources {
            let name = source.name();
            if names.contains(&name) {
                return Err(AggregatorError::InvalidConfig(format!("duplicate source '{}'", name)));
            }
            if !limiter.has_service(name.as_str()) {
                return Err(AggregatorError::InvalidConfig(format!(
                    "no rate limit configured for source '{}'",
                    name
                )));
            }
            names.push(name);
        }
        if !limiter.has_service(discovery.service()) {
            return Err(AggregatorError::InvalidConfig(format!(
                "no rate limit configured for discovery service '{}'",
                discovery.service()
            )));
        }
        if let Some(missing) = config.critical_sources.iter().find(|c| !names.contains(c)) {
            return Err(AggregatorError::InvalidConfig(format!(
                "critical source '{}' is not configured",
                missing
            )));
        }

        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Ok(Self {
            inner: Arc::new(Inner {
                sources,
                discovery,
                limiter,
                cache,
                filters,
                scorer,
                config,
                in_flight: Mutex::new(HashMap::new()),
                tracked: Mutex::new(HashMap::new()),
                stats: Mutex::new(PipelineStats::default()),
                events,
                idle: Notify::new(),
                accepting: AtomicBool::new(true),
            }),
        })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.inner.config
    }

    pub fn source_names(&self) -> Vec<SourceName> {
        self.inner.sources.iter().map(|s| s.name()).collect()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.limiter
    }

    pub fn cache(&self) -> &Arc<TtlCache<SourceData>> {
        &self.inner.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> PipelineStats {
        *self.inner.stats.lock()
    }

    /// Jobs currently running
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Start tracking a token; returns false if it was already tracked
    pub fn track(&self, candidate: TokenCandidate) -> bool {
        let mut tracked = self.inner.tracked.lock();
        if tracked.contains_key(&candidate.address) {
            return false;
        }
        tracked.insert(candidate.address.clone(), candidate);
        true
    }

    /// Tracked tokens, oldest detection first
    pub fn tracked_tokens(&self) -> Vec<TokenCandidate> {
        let mut tokens: Vec<TokenCandidate> = self.inner.tracked.lock().values().cloned().collect();
        tokens.sort_by(|a, b| a.first_detected_at.cmp(&b.first_detected_at));
        tokens
    }

    fn emit(&self, event: PipelineEvent) {
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }

    /// Analyze one token, joining an identical job if one is already running
    pub async fn aggregate(&self, address: &str) -> Result<CombinedAnalysis, AggregatorError> {
        let address = address.trim();
        if address.is_empty() || address.chars().any(char::is_whitespace) {
            return Err(AggregatorError::InvalidAddress(address.to_string()));
        }

        let mut rx = self.join_or_start(address)?;

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };

        match outcome {
            Some(result) => result.map(|analysis| (*analysis).clone()),
            None => Err(AggregatorError::JobAborted(address.to_string())),
        }
    }

    fn join_or_start(&self, address: &str) -> Result<JobReceiver, AggregatorError> {
        let mut in_flight = self.inner.in_flight.lock();

        if let Some(rx) = in_flight.get(address) {
            debug!(address, "Joining in-flight analysis");
            return Ok(rx.clone());
        }
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(AggregatorError::ShuttingDown);
        }

        let (tx, rx) = watch::channel(None);
        in_flight.insert(address.to_string(), rx.clone());

        let this = self.clone();
        let guard = InFlightGuard {
            inner: self.inner.clone(),
            address: address.to_string(),
        };
        tokio::spawn(async move {
            let result = this.run_job(&guard.address).await;
            let _ = tx.send(Some(result));
            drop(guard);
        });

        Ok(rx)
    }

    async fn run_job(&self, address: &str) -> JobResult {
        let mut job = JobTrace::new(address);

        job.advance(JobState::Fetching);
        let sources = self.fetch_all(address).await;

        job.advance(JobState::Combining);
        let degraded = sources.values().filter(|r| r.is_degraded()).count();

        if degraded == sources.len() {
            job.advance(JobState::Failed);
            let error = AggregatorError::AllSourcesDegraded {
                address: address.to_string(),
                count: degraded,
            };
            let stats = {
                let mut stats = self.inner.stats.lock();
                stats.processed += 1;
                stats.failed += 1;
                stats.errors += degraded as u64;
                *stats
            };
            warn!("Analysis failed for {}: every source degraded", address);
            self.emit(PipelineEvent::PipelineError {
                token_address: address.to_string(),
                message: error.to_string(),
            });
            self.emit(PipelineEvent::StatsUpdated(stats));
            return Err(error);
        }

        let chain = self
            .inner
            .tracked
            .lock()
            .get(address)
            .map(|t| t.chain.clone())
            .unwrap_or_else(|| self.inner.config.chain.clone());
        let now = Utc::now();
        let mut metrics = TokenMetrics::from_sources(address, &chain, &sources, now);

        job.advance(JobState::Scoring);
        let scores = self.inner.scorer.score(&sources);
        metrics.overall_score = scores.overall;
        metrics.risk_score = scores.risk;
        metrics.opportunity_score = scores.opportunity;

        job.advance(JobState::Filtering);
        let failed_filters = self.inner.filters.failed_filters(&metrics);
        let passed = failed_filters.is_empty();

        let analysis = Arc::new(CombinedAnalysis {
            token_address: address.to_string(),
            has_errors: degraded > 0,
            sources,
            metrics,
            overall_score: scores.overall,
            risk_score: scores.risk,
            opportunity_score: scores.opportunity,
            passed,
            failed_filters,
            timestamp: now,
        });

        job.advance(if passed {
            JobState::Passed
        } else {
            JobState::Rejected
        });

        let stats = {
            let mut stats = self.inner.stats.lock();
            stats.processed += 1;
            stats.errors += degraded as u64;
            if passed {
                stats.passed += 1;
            } else {
                stats.rejected += 1;
            }
            *stats
        };

        if passed {
            info!(
                "PASSED {} score={:.1} risk={:.1} opportunity={:.1} degraded={}",
                address, analysis.overall_score, analysis.risk_score, analysis.opportunity_score, degraded
            );
            self.emit(PipelineEvent::AnalysisPassed(analysis.clone()));
        } else {
            debug!(
                address,
                failed = ?analysis.failed_filters,
                score = analysis.overall_score,
                "Analysis rejected"
            );
            self.emit(PipelineEvent::AnalysisFailed(analysis.clone()));
        }
        self.emit(PipelineEvent::StatsUpdated(stats));

        Ok(analysis)
    }

    /// Query every source concurrently; each one yields exactly one result
    async fn fetch_all(&self, address: &str) -> BTreeMap<SourceName, SourceResult> {
        let mut tasks = JoinSet::new();
        for source in &self.inner.sources {
            let source = source.clone();
            let limiter = self.inner.limiter.clone();
            let cache = self.inner.cache.clone();
            let address = address.to_string();
            tasks.spawn(async move {
                let name = source.name();
                let result = fetch_one(source, &limiter, &cache, &address).await;
                (name, result)
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, result)) => {
                    results.insert(name, result);
                }
                Err(e) => warn!(address, error = %e, "Source fetch task failed"),
            }
        }

        for source in &self.inner.sources {
            results
                .entry(source.name())
                .or_insert_with(|| SourceResult::degraded("fetch task aborted", 0));
        }
        results
    }

    /// Liveness of every source, probed concurrently
    pub async fn check_health(&self) -> HealthReport {
        let mut tasks = JoinSet::new();
        for source in &self.inner.sources {
            let source = source.clone();
            tasks.spawn(async move { (source.name(), source.health_check().await) });
        }

        let mut report = HealthReport::default();
        while let Some(joined) = tasks.join_next().await {
            if let Ok((name, healthy)) = joined {
                report.sources.insert(name, healthy);
            }
        }
        for source in &self.inner.sources {
            report.sources.entry(source.name()).or_insert(false);
        }
        report
    }

    /// `Some(Skipped)` when a critical source is down
    async fn health_gate(&self) -> Option<BatchOutcome> {
        if self.inner.config.critical_sources.is_empty() {
            return None;
        }
        let report = self.check_health().await;
        let unhealthy: Vec<SourceName> = report
            .unhealthy()
            .into_iter()
            .filter(|s| self.inner.config.critical_sources.contains(s))
            .collect();

        if unhealthy.is_empty() {
            None
        } else {
            warn!("Skipping batch, critical sources unhealthy: {:?}", unhealthy);
            Some(BatchOutcome::Skipped { unhealthy })
        }
    }

    /// Discover new tokens and analyze the ones not seen before
    pub async fn run_discovery(&self) -> Result<BatchOutcome, AggregatorError> {
        if let Some(skipped) = self.health_gate().await {
            return Ok(skipped);
        }

        let discovery = &self.inner.discovery;
        let candidates = self
            .inner
            .limiter
            .run_with_retry(discovery.service(), || discovery.discover())
            .await
            .map_err(|e| AggregatorError::Discovery(e.to_string()))?;

        let mut fresh = Vec::new();
        for candidate in &candidates {
            if self.track(candidate.clone()) {
                debug!(address = %candidate.address, "New token discovered");
                self.emit(PipelineEvent::TokenDiscovered(candidate.clone()));
                fresh.push(candidate.address.clone());
            }
        }

        let mut summary = self.analyze_batch(fresh).await;
        summary.candidates = candidates.len();
        summary.new_tokens = summary.analyzed;

        info!(
            "Discovery: {} candidates, {} new, {} passed, {} rejected, {} failed",
            summary.candidates, summary.new_tokens, summary.passed, summary.rejected, summary.failed
        );
        Ok(BatchOutcome::Completed(summary))
    }

    /// Re-analyze every tracked token
    pub async fn refresh_metrics(&self) -> BatchOutcome {
        if let Some(skipped) = self.health_gate().await {
            return skipped;
        }

        let addresses: Vec<String> = self.tracked_tokens().into_iter().map(|t| t.address).collect();
        let summary = self.analyze_batch(addresses).await;

        info!(
            "Refresh: {} tokens, {} passed, {} rejected, {} failed",
            summary.analyzed, summary.passed, summary.rejected, summary.failed
        );
        BatchOutcome::Completed(summary)
    }

    /// Aggregate `addresses` with at most `max_concurrent_jobs` running at once
    pub async fn analyze_batch(&self, addresses: Vec<String>) -> BatchSummary {
        let permits = Arc::new(Semaphore::new(self.inner.config.max_concurrent_jobs));
        let mut tasks = JoinSet::new();

        for address in addresses {
            let this = self.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                Some(this.aggregate(&address).await)
            });
        }

        let mut summary = BatchSummary::default();
        while let Some(joined) = tasks.join_next().await {
            summary.analyzed += 1;
            match joined {
                Ok(Some(Ok(analysis))) if analysis.passed => summary.passed += 1,
                Ok(Some(Ok(_))) => summary.rejected += 1,
                Ok(Some(Err(e))) => {
                    debug!(error = %e, "Batch job failed");
                    summary.failed += 1;
                }
                Ok(None) | Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    /// Sweep the cache and stop tracking tokens past the age limit
    pub fn cleanup(&self) -> CleanupReport {
        let expired_cache_entries = self.inner.cache.sweep();

        let now = Utc::now();
        let max_age = self.inner.config.token_max_age_hours;
        let pruned_tokens = {
            let mut tracked = self.inner.tracked.lock();
            let before = tracked.len();
            tracked.retain(|_, token| token.age_hours(now) <= max_age);
            before - tracked.len()
        };

        info!(
            "Cleanup: {} expired cache entries, {} tokens pruned",
            expired_cache_entries, pruned_tokens
        );
        CleanupReport {
            expired_cache_entries,
            pruned_tokens,
        }
    }

    /// Stop accepting jobs and wait up to `grace` for in-flight ones
    ///
    /// Returns false if jobs were still running when the grace period ran out.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.inner.accepting.store(false, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + grace;

        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let remaining = self.in_flight();
            if remaining == 0 {
                info!("All in-flight jobs drained");
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!("Drain timed out, abandoning {} in-flight jobs", self.in_flight());
                return false;
            }
        }
    }
}

async fn fetch_one(
    source: Arc<dyn SourceClient>,
    limiter: &RateLimiter,
    cache: &TtlCache<SourceData>,
    address: &str,
) -> SourceResult {
    let name = source.name();
    let key = cache_key(name, address);

    if let Some(data) = cache.get(&key) {
        trace!(source = %name, address, "Cache hit");
        return SourceResult::present(data);
    }

    let fetched = limiter
        .run_with_retry(name.as_str(), || source.fetch(address))
        .await
        .and_then(|data| {
            if data.source() == name {
                Ok(data)
            } else {
                Err(RetryError::Permanent {
                    attempts: 1,
                    error: SourceError::permanent(format!(
                        "{} returned a {} payload",
                        name,
                        data.source()
                    )),
                })
            }
        });

    match fetched {
        Ok(data) => {
            cache.set(key, data.clone(), None);
            SourceResult::present(data)
        }
        Err(e) => {
            let attempts = e.attempts();
            let message = match e.last_error() {
                Some(err) => err.to_string(),
                None => e.to_string(),
            };
            warn!(source = %name, address, attempts, error = %message, "Source degraded");
            SourceResult::degraded(message, attempts)
        }
    }
}
