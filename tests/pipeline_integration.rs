//! Pipeline Integration Tests
//!
//! Exercise the assembled pipeline end to end with in-memory ports:
//! 1. Scheduler → Aggregator → store and notifier sinks
//! 2. Cache reuse across refreshes and expiry under the paused clock
//! 3. Health gating and total source failure
//! 4. Config-driven filters and file persistence
//!
//! No network access; every upstream is a mock.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tempfile::{NamedTempFile, TempDir};

use token_radar::adapters::{JsonlStore, LogNotifier, RateLimitError, RateLimiter, TtlCache};
use token_radar::application::{
    spawn_notifier_sink, spawn_store_sink, Aggregator, AggregatorConfig, Scheduler,
    SchedulerConfig, SchedulerHealth,
};
use token_radar::config::{load_config, Config};
use token_radar::domain::{
    FilterPipeline, FilterSpec, ListingData, MarketData, Scorer, SecurityData, SourceData,
    SourceName, TokenCandidate, TradingData,
};
use token_radar::ports::mocks::{MemoryStore, MockDiscovery, MockSource, RecordingNotifier};
use token_radar::ports::{DiscoveryPort, Notifier, SourceClient, SourceError, Store};

// ============================================================================
// Fixtures
// ============================================================================

fn market() -> SourceData {
    SourceData::Market(MarketData {
        price_usd: 0.0021,
        liquidity_usd: 85_000.0,
        volume_24h_usd: 410_000.0,
        price_change_24h_pct: 35.0,
        market_cap_usd: Some(2_100_000.0),
        pair_created_at: None,
    })
}

fn trading() -> SourceData {
    SourceData::Trading(TradingData {
        holder_count: 1_450,
        unique_wallets_24h: 620,
        trades_24h: 3_100,
        buys_24h: 1_900,
        sells_24h: 1_200,
    })
}

fn security() -> SourceData {
    SourceData::Security(SecurityData {
        risk_score: 12.0,
        mint_authority_revoked: true,
        freeze_authority_revoked: true,
        top10_holder_pct: Some(31.0),
        lp_locked_pct: Some(100.0),
        flagged_risks: vec![],
    })
}

fn listing() -> SourceData {
    SourceData::Listing(ListingData {
        verified: false,
        tags: vec![],
        daily_volume_usd: Some(380_000.0),
        organic_score: Some(55.0),
    })
}

fn healthy_sources() -> Vec<Arc<MockSource>> {
    vec![
        Arc::new(MockSource::succeeding(market())),
        Arc::new(MockSource::succeeding(trading())),
        Arc::new(MockSource::succeeding(security())),
        Arc::new(MockSource::succeeding(listing())),
    ]
}

fn failing_sources() -> Vec<Arc<MockSource>> {
    SourceName::ALL
        .iter()
        .map(|name| Arc::new(MockSource::failing(*name, SourceError::permanent("HTTP 404"))))
        .collect()
}

fn new_tokens() -> Vec<TokenCandidate> {
    vec![
        TokenCandidate::new("MintAAA111", "AAA", "Alpha"),
        TokenCandidate::new("MintBBB222", "BBB", "Beta"),
    ]
}

/// Aggregator over mocks, rate limited with the default per-service limits
fn pipeline(
    sources: &[Arc<MockSource>],
    discovery: Arc<MockDiscovery>,
    filters: &[FilterSpec],
) -> Aggregator {
    let config = Config::default();
    Aggregator::new(
        sources.iter().map(|s| s.clone() as Arc<dyn SourceClient>).collect(),
        discovery as Arc<dyn DiscoveryPort>,
        Arc::new(RateLimiter::new(config.rate_limits).unwrap()),
        Arc::new(TtlCache::new(config.cache)),
        FilterPipeline::new(filters).unwrap(),
        Scorer::default(),
        AggregatorConfig::default(),
    )
    .unwrap()
}

fn count(received: &[String], kind: &str) -> usize {
    received.iter().filter(|k| k.as_str() == kind).count()
}

// ============================================================================
// Scheduler → Aggregator → sinks
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_discovery_batch_reaches_store_and_notifiers() {
    let sources = healthy_sources();
    let discovery = Arc::new(MockDiscovery::new().with_batch(new_tokens()));
    let aggregator = pipeline(
        &sources,
        discovery.clone(),
        &[FilterSpec::value("minLiquidity", 10_000.0), FilterSpec::chain("solana")],
    );

    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new();
    let store_sink = spawn_store_sink(aggregator.subscribe(), store.clone());
    let notifier_sink = spawn_notifier_sink(
        aggregator.subscribe(),
        vec![Arc::new(notifier.clone()) as Arc<dyn Notifier>],
    );

    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler.register_pipeline(&aggregator).unwrap();
    scheduler.trigger("discovery").await.unwrap();

    let stats = aggregator.stats();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.passed, 2);
    assert_eq!(stats.errors, 0);
    assert_eq!(aggregator.tracked_tokens().len(), 2);
    assert_eq!(discovery.call_count(), 1);

    drop(scheduler);
    drop(aggregator);
    assert_eq!(store_sink.await.unwrap(), 4);
    notifier_sink.await.unwrap();

    assert_eq!(store.tokens().len(), 2);
    let analyses = store.analyses();
    assert_eq!(analyses.len(), 2);
    assert!(analyses.iter().all(|a| a.passed && !a.has_errors));

    let received = notifier.received();
    assert_eq!(count(&received, "token_discovered"), 2);
    assert_eq!(count(&received, "analysis_passed"), 2);
    assert_eq!(count(&received, "analysis_failed"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_known_tokens_are_not_rediscovered() {
    let sources = healthy_sources();
    let discovery = Arc::new(
        MockDiscovery::new()
            .with_batch(new_tokens())
            .with_batch(new_tokens()),
    );
    let aggregator = pipeline(&sources, discovery, &[]);
    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler.register_pipeline(&aggregator).unwrap();

    scheduler.trigger("discovery").await.unwrap();
    scheduler.trigger("discovery").await.unwrap();

    assert_eq!(aggregator.stats().processed, 2);
    assert_eq!(sources[0].call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_reuses_cache_until_ttl_expires() {
    let sources = healthy_sources();
    let discovery = Arc::new(MockDiscovery::new().with_batch(new_tokens()));
    let aggregator = pipeline(&sources, discovery, &[]);

    aggregator.run_discovery().await.unwrap();
    aggregator.refresh_metrics().await;
    for source in &sources {
        assert_eq!(source.call_count(), 2, "{} refetched inside ttl", source.name());
    }
    assert_eq!(aggregator.stats().processed, 4);

    // default ttl is 300s
    tokio::time::advance(Duration::from_secs(301)).await;
    aggregator.refresh_metrics().await;
    for source in &sources {
        assert_eq!(source.call_count(), 4);
    }
}

#[tokio::test(start_paused = true)]
async fn test_running_scheduler_ticks_discovery() {
    let sources = healthy_sources();
    let discovery = Arc::new(MockDiscovery::new().with_batch(new_tokens()));
    let aggregator = pipeline(&sources, discovery.clone(), &[]);

    let scheduler = Scheduler::new(SchedulerConfig {
        discovery_interval_secs: 60,
        ..Default::default()
    });
    scheduler.register_pipeline(&aggregator).unwrap();
    scheduler.start();

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(discovery.call_count(), 2);
    assert_eq!(scheduler.health(), SchedulerHealth::Healthy);
    let discovery_metrics = scheduler
        .metrics()
        .into_iter()
        .find(|m| m.name == "discovery")
        .unwrap();
    assert_eq!(discovery_metrics.total_executions, 2);
    assert_eq!(discovery_metrics.total_errors, 0);

    scheduler.stop().await;
    assert!(aggregator.drain(Duration::from_secs(5)).await);
}

// ============================================================================
// Degradation and gating
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_batch_skipped_while_critical_source_down() {
    let sources = healthy_sources();
    sources[0].set_healthy(false);
    let discovery = Arc::new(MockDiscovery::new().with_batch(new_tokens()));
    let aggregator = pipeline(&sources, discovery.clone(), &[]);

    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler.register_pipeline(&aggregator).unwrap();
    scheduler.trigger("discovery").await.unwrap();

    assert_eq!(discovery.call_count(), 0);
    assert_eq!(aggregator.stats().processed, 0);

    sources[0].set_healthy(true);
    scheduler.trigger("discovery").await.unwrap();
    assert_eq!(discovery.call_count(), 1);
    assert_eq!(aggregator.stats().processed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_total_source_failure_is_reported_not_persisted() {
    let sources = failing_sources();
    let aggregator = pipeline(&sources, Arc::new(MockDiscovery::new()), &[]);

    let store = Arc::new(MemoryStore::new());
    let notifier = RecordingNotifier::new();
    let store_sink = spawn_store_sink(aggregator.subscribe(), store.clone());
    let notifier_sink = spawn_notifier_sink(
        aggregator.subscribe(),
        vec![Arc::new(notifier.clone()) as Arc<dyn Notifier>, Arc::new(LogNotifier)],
    );

    assert!(aggregator.aggregate("MintDead999").await.is_err());
    let stats = aggregator.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.errors, 4);

    drop(aggregator);
    assert_eq!(store_sink.await.unwrap(), 0);
    // recording + log notifier both take the error
    assert_eq!(notifier_sink.await.unwrap(), 3);
    assert!(store.analyses().is_empty());
    assert_eq!(count(&notifier.received(), "pipeline_error"), 1);
}

// ============================================================================
// Configuration and persistence
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_config_filters_drive_rejection() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(
        br#"
[[filters]]
type = "minLiquidity"
value = 50000.0

[[filters]]
type = "maxTop10HolderPct"
value = 20.0

[[filters]]
type = "requireVerified"
"#,
    )
    .unwrap();
    let config = load_config(file.path()).unwrap();

    let sources = healthy_sources();
    let aggregator = pipeline(&sources, Arc::new(MockDiscovery::new()), &config.filters);
    let analysis = aggregator.aggregate("MintCCC333").await.unwrap();

    assert!(!analysis.passed);
    assert_eq!(analysis.failed_filters, vec!["maxTop10HolderPct", "requireVerified"]);
    assert_eq!(aggregator.stats().rejected, 1);
}

#[tokio::test(start_paused = true)]
async fn test_jsonl_store_persists_sink_output() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(JsonlStore::open(dir.path()).unwrap());

    let sources = healthy_sources();
    let discovery = Arc::new(MockDiscovery::new().with_batch(new_tokens()));
    let aggregator = pipeline(&sources, discovery, &[]);
    let sink = spawn_store_sink(aggregator.subscribe(), store.clone() as Arc<dyn Store>);

    aggregator.run_discovery().await.unwrap();
    drop(aggregator);
    assert_eq!(sink.await.unwrap(), 4);

    let reopened = JsonlStore::open(dir.path()).unwrap();
    let mut symbols: Vec<String> = reopened.tokens().into_iter().map(|t| t.symbol).collect();
    symbols.sort();
    assert_eq!(symbols, vec!["AAA", "BBB"]);

    let analyses = reopened.load_analyses().unwrap();
    assert_eq!(analyses.len(), 2);
    assert!(analyses.iter().all(|a| a.sources.len() == SourceName::ALL.len()));
}

#[test]
fn test_limiter_from_default_config_rejects_unknown_service() {
    let limiter = RateLimiter::new(Config::default().rate_limits).unwrap();

    assert!(tokio_test::block_on(limiter.admit("birdeye")).is_ok());
    assert!(matches!(
        tokio_test::block_on(limiter.admit("coingecko")),
        Err(RateLimitError::UnknownService(_))
    ));
}
