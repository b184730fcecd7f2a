//! Application Layer - Pipeline orchestration
//!
//! - `aggregator`: per-token analysis jobs, batches, events
//! - `scheduler`: interval driver for discovery, refresh and cleanup
//! - `sinks`: background consumers of pipeline events

pub mod aggregator;
pub mod scheduler;
pub mod sinks;

pub use aggregator::{
    Aggregator, AggregatorConfig, AggregatorError, BatchOutcome, BatchSummary, CleanupReport,
    HealthReport,
};
pub use scheduler::{
    CleanupTask, DiscoveryTask, RefreshTask, ScheduledTask, Scheduler, SchedulerConfig,
    SchedulerError, SchedulerHealth, TaskMetrics,
};
pub use sinks::{spawn_notifier_sink, spawn_store_sink};
