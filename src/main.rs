//! token-radar - new token discovery and analysis pipeline

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use token_radar::adapters::cli::{
    render_analysis, render_health, render_task_metrics, AnalyzeCmd, CliApp, Command,
    OutputFormat, RunCmd, StatusCmd,
};
use token_radar::adapters::{
    spawn_sweeper, JsonlStore, LogNotifier, RateLimiter, SourceSet, TtlCache, WebhookNotifier,
};
use token_radar::application::{
    spawn_notifier_sink, spawn_store_sink, Aggregator, BatchOutcome, Scheduler,
};
use token_radar::config::{load_config, Config};
use token_radar::domain::{FilterPipeline, Scorer};
use token_radar::ports::{Notifier, Store};

/// How long sinks get to flush queued events on exit
const SINK_FLUSH_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (API keys go here, not in the config file)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();
    let config = load_config(&app.config)
        .with_context(|| format!("Failed to load configuration from {}", app.config.display()))?;
    init_logging(app.verbose, app.debug, &config.logging.level);

    match app.command {
        Command::Run(cmd) => run_command(config, cmd).await,
        Command::Analyze(cmd) => analyze_command(config, cmd).await,
        Command::CheckConfig => check_config_command(&config, &app.config),
        Command::Status(cmd) => status_command(config, cmd).await,
    }
}

/// `RUST_LOG` wins, then `--debug` / `--verbose`, then `[logging].level`
fn init_logging(verbose: bool, debug: bool, configured: &str) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        configured
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn build_aggregator(config: &Config) -> Result<Aggregator> {
    let sources = SourceSet::from_config(&config.sources).context("Failed to create source clients")?;
    let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone())?);
    let cache = Arc::new(TtlCache::new(config.cache.clone()));
    let filters = FilterPipeline::new(&config.filters)?;
    let scorer = Scorer::new(config.scoring.clone())?;

    let aggregator = Aggregator::new(
        sources.sources,
        sources.discovery,
        limiter,
        cache,
        filters,
        scorer,
        config.pipeline.aggregator.clone(),
    )
    .context("Failed to create aggregator")?;
    Ok(aggregator)
}

fn build_notifiers(config: &Config) -> Result<Vec<Arc<dyn Notifier>>> {
    let alerts = &config.alerts;
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();

    if alerts.log_enabled {
        notifiers.push(Arc::new(LogNotifier));
    }
    if alerts.discord_enabled {
        notifiers.push(Arc::new(
            WebhookNotifier::discord(&alerts.discord_webhook_url).context("Failed to create Discord notifier")?,
        ));
    }
    if alerts.telegram_enabled {
        notifiers.push(Arc::new(
            WebhookNotifier::telegram(&alerts.telegram_bot_token, &alerts.telegram_chat_id)
                .context("Failed to create Telegram notifier")?,
        ));
    }
    Ok(notifiers)
}

async fn run_command(config: Config, cmd: RunCmd) -> Result<()> {
    tracing::info!("Starting token-radar...");

    let aggregator = build_aggregator(&config)?;
    let data_dir = config.store.resolved_data_dir();
    let store: Arc<dyn Store> = Arc::new(
        JsonlStore::open(&data_dir)
            .with_context(|| format!("Failed to open store at {}", data_dir.display()))?,
    );

    let store_sink = spawn_store_sink(aggregator.subscribe(), store);
    let notifiers = build_notifiers(&config)?;
    let notifier_sink = (!notifiers.is_empty()).then(|| spawn_notifier_sink(aggregator.subscribe(), notifiers));

    if cmd.once {
        match aggregator.run_discovery().await? {
            BatchOutcome::Skipped { unhealthy } => {
                println!("Discovery skipped, critical sources unhealthy: {:?}", unhealthy);
            }
            BatchOutcome::Completed(s) => {
                println!(
                    "Discovered {} candidates, {} new: {} passed, {} rejected, {} failed",
                    s.candidates, s.new_tokens, s.passed, s.rejected, s.failed
                );
            }
        }
    } else {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = spawn_sweeper(aggregator.cache(), shutdown_rx);

        let scheduler = Scheduler::new(config.scheduler.clone());
        scheduler.register_pipeline(&aggregator)?;
        scheduler.start();

        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
        tracing::info!("Shutdown signal received");

        scheduler.stop().await;
        let _ = shutdown_tx.send(true);
        if !aggregator.drain(config.pipeline.shutdown_grace()).await {
            tracing::warn!("Shutdown grace elapsed with jobs still running");
        }
        let _ = sweeper.await;

        tracing::info!(
            "Final task metrics:\n{}",
            render_task_metrics(&scheduler.metrics(), &scheduler.health())
        );
    }

    let stats = aggregator.stats();
    tracing::info!(
        "Processed {} tokens: {} passed, {} rejected, {} failed, {} source errors",
        stats.processed,
        stats.passed,
        stats.rejected,
        stats.failed,
        stats.errors
    );

    // Sinks finish once the last aggregator handle is gone
    drop(aggregator);
    let flush = Duration::from_secs(SINK_FLUSH_SECS);
    if tokio::time::timeout(flush, store_sink).await.is_err() {
        tracing::warn!("Store sink did not finish within {:?}", flush);
    }
    if let Some(sink) = notifier_sink {
        let _ = tokio::time::timeout(flush, sink).await;
    }

    tracing::info!("token-radar stopped");
    Ok(())
}

async fn analyze_command(config: Config, cmd: AnalyzeCmd) -> Result<()> {
    let aggregator = build_aggregator(&config)?;
    let analysis = aggregator
        .aggregate(&cmd.address)
        .await
        .with_context(|| format!("Failed to analyze {}", cmd.address))?;

    match cmd.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&analysis)?),
        OutputFormat::Text => print!("{}", render_analysis(&analysis)),
    }
    Ok(())
}

fn check_config_command(config: &Config, path: &std::path::Path) -> Result<()> {
    println!("Configuration OK: {}", path.display());
    println!("  Rate limits:  {}", config.rate_limits.len());
    println!("  Filters:      {}", config.filters.len());
    println!(
        "  Critical:     {:?}",
        config.pipeline.aggregator.critical_sources
    );
    println!(
        "  Intervals:    discovery {}s, refresh {}s, cleanup {}s",
        config.scheduler.discovery_interval_secs,
        config.scheduler.refresh_interval_secs,
        config.scheduler.cleanup_interval_secs
    );
    println!("  Data dir:     {}", config.store.resolved_data_dir().display());
    if config.sources.birdeye.api_key.is_none() {
        println!("  Warning: no Birdeye API key, trading data will be degraded");
    }
    Ok(())
}

async fn status_command(config: Config, cmd: StatusCmd) -> Result<()> {
    let aggregator = build_aggregator(&config)?;
    let report = aggregator.check_health().await;

    match cmd.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("Source health:");
            print!("{}", render_health(&report));
        }
    }

    if !report.all_healthy() {
        anyhow::bail!("Unhealthy sources: {:?}", report.unhealthy());
    }
    Ok(())
}
