//! CLI Adapter
//!
//! Command-line interface for token-radar.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{
    render_analysis, render_health, render_task_metrics, AnalyzeCmd, CliApp, Command,
    OutputFormat, RunCmd, StatusCmd, DEFAULT_CONFIG_PATH,
};
