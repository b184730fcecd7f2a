//! CLI Commands
//!
//! Argument definitions and text rendering for the token-radar binary.

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::application::{HealthReport, SchedulerHealth, TaskMetrics};
use crate::domain::{CombinedAnalysis, SourceResult};

pub const DEFAULT_CONFIG_PATH: &str = "config/radar.toml";

/// token-radar - discover and score newly listed tokens
#[derive(Parser, Debug)]
#[command(
    name = "token-radar",
    version = env!("CARGO_PKG_VERSION"),
    about = "Discover, analyze and score newly listed tokens",
    long_about = "token-radar polls a discovery feed for new tokens, pulls market, trading, \
                  security and listing data for each, scores the combined result and \
                  reports the tokens that pass the configured filters."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        default_value = DEFAULT_CONFIG_PATH
    )]
    pub config: PathBuf,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the scheduled discovery pipeline
    Run(RunCmd),

    /// Analyze a single token address
    Analyze(AnalyzeCmd),

    /// Load and validate the configuration
    CheckConfig,

    /// Probe every source and print its health
    Status(StatusCmd),
}

#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Run one discovery batch and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Parser, Debug)]
pub struct AnalyzeCmd {
    /// Token mint address
    #[arg(value_name = "ADDRESS")]
    pub address: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct StatusCmd {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Multi-line report for one analysis
pub fn render_analysis(analysis: &CombinedAnalysis) -> String {
    let mut out = String::new();
    let verdict = if analysis.passed { "PASSED" } else { "REJECTED" };

    let _ = writeln!(out, "Token:       {}", analysis.token_address);
    let _ = writeln!(out, "Verdict:     {}", verdict);
    let _ = writeln!(
        out,
        "Scores:      overall {:.1} | risk {:.1} | opportunity {:.1}",
        analysis.overall_score, analysis.risk_score, analysis.opportunity_score
    );

    let m = &analysis.metrics;
    let fmt_usd = |v: Option<f64>| v.map(|v| format!("${:.0}", v)).unwrap_or_else(|| "n/a".into());
    let _ = writeln!(
        out,
        "Market:      liquidity {} | volume 24h {} | market cap {}",
        fmt_usd(m.liquidity_usd),
        fmt_usd(m.volume_24h_usd),
        fmt_usd(m.market_cap_usd)
    );

    let _ = writeln!(out, "Sources:");
    for (name, result) in &analysis.sources {
        match result {
            SourceResult::Present { .. } => {
                let _ = writeln!(out, "  {:<12} ok", name.as_str());
            }
            SourceResult::Degraded { error, attempts } => {
                let _ = writeln!(
                    out,
                    "  {:<12} degraded after {} attempt(s): {}",
                    name.as_str(),
                    attempts,
                    error
                );
            }
        }
    }

    if !analysis.failed_filters.is_empty() {
        let _ = writeln!(out, "Failed:      {}", analysis.failed_filters.join(", "));
    }
    out
}

/// One line per source
pub fn render_health(report: &HealthReport) -> String {
    let mut out = String::new();
    for (name, healthy) in &report.sources {
        let _ = writeln!(
            out,
            "  {:<12} {}",
            name.as_str(),
            if *healthy { "healthy" } else { "UNHEALTHY" }
        );
    }
    out
}

pub fn render_task_metrics(metrics: &[TaskMetrics], health: &SchedulerHealth) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Scheduler: {:?}", health);
    for m in metrics {
        let _ = writeln!(
            out,
            "  {:<10} every {:>5}s | runs {:>4} | errors {:>3} ({:.0}%) | avg {:?}",
            m.name,
            m.interval.as_secs(),
            m.total_executions,
            m.total_errors,
            m.error_rate * 100.0,
            m.average_execution_time
        );
        if let Some(err) = &m.last_error {
            let _ = writeln!(out, "             last error: {}", err);
        }
    }
    out
}
