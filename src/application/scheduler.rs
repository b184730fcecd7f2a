//! Interval Scheduler
//!
//! Drives discovery, refresh and cleanup on fixed intervals.
//!
//! Each registered task gets its own loop. Every execution runs in a spawned
//! task, so an error or a panic is recorded in the task's metrics and the loop
//! keeps ticking. Executions of the same task never overlap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::aggregator::{Aggregator, BatchOutcome};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("Task '{0}' needs a non-zero interval")]
    InvalidInterval(String),

    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    #[error("Cannot register tasks while the scheduler is running")]
    AlreadyRunning,

    #[error("Task '{name}' failed: {error}")]
    TaskFailed { name: String, error: String },
}

/// Unit of periodic work
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> anyhow::Result<()>;
}

/// Intervals for the pipeline tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub discovery_interval_secs: u64,
    pub refresh_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    /// Slack past a task's interval before health reports it stale
    pub stale_grace_secs: u64,
    /// Run every task once immediately on start
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            discovery_interval_secs: 60,
            refresh_interval_secs: 300,
            cleanup_interval_secs: 3600,
            stale_grace_secs: 120,
            run_on_start: true,
        }
    }
}

impl SchedulerConfig {
    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_secs)
    }
}

/// Execution metrics for one task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskMetrics {
    pub name: String,
    pub interval: Duration,
    pub total_executions: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub average_execution_time: Duration,
    pub last_execution: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SchedulerHealth {
    Stopped,
    Healthy,
    /// Tasks that have not run within `interval + stale_grace`
    Stale { tasks: Vec<String> },
}

#[derive(Debug, Default)]
struct TaskStats {
    executions: u64,
    errors: u64,
    total_time: Duration,
    last_execution: Option<DateTime<Utc>>,
    last_run_at: Option<Instant>,
    last_error: Option<String>,
}

struct TaskEntry {
    task: Arc<dyn ScheduledTask>,
    interval: Duration,
    stats: Mutex<TaskStats>,
    /// Held while an execution is in progress
    gate: tokio::sync::Mutex<()>,
}

impl TaskEntry {
    fn name(&self) -> &str {
        self.task.name()
    }

    fn metrics(&self) -> TaskMetrics {
        let stats = self.stats.lock();
        TaskMetrics {
            name: self.name().to_string(),
            interval: self.interval,
            total_executions: stats.executions,
            total_errors: stats.errors,
            error_rate: if stats.executions == 0 {
                0.0
            } else {
                stats.errors as f64 / stats.executions as f64
            },
            average_execution_time: if stats.executions == 0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(stats.total_time.as_secs_f64() / stats.executions as f64)
            },
            last_execution: stats.last_execution,
            last_error: stats.last_error.clone(),
        }
    }

    /// Run once in a spawned task and record the outcome
    async fn execute(&self) -> Result<(), String> {
        let _running = self.gate.lock().await;
        let started = Instant::now();
        let task = self.task.clone();

        let outcome = tokio::spawn(async move { task.run().await }).await;
        let elapsed = started.elapsed();

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(join) => Some(describe_join_error(join)),
        };

        {
            let mut stats = self.stats.lock();
            stats.executions += 1;
            stats.total_time += elapsed;
            stats.last_execution = Some(Utc::now());
            stats.last_run_at = Some(Instant::now());
            if let Some(msg) = &failure {
                stats.errors += 1;
                stats.last_error = Some(msg.clone());
            }
        }

        match failure {
            None => {
                debug!(task = self.name(), elapsed_ms = elapsed.as_millis() as u64, "Task completed");
                Ok(())
            }
            Some(msg) => {
                error!("Task '{}' failed after {:?}: {}", self.name(), elapsed, msg);
                Err(msg)
            }
        }
    }
}

fn describe_join_error(join: JoinError) -> String {
    if join.is_panic() {
        let payload = join.into_panic();
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        format!("task panicked: {}", msg)
    } else {
        "task cancelled".to_string()
    }
}

/// Resolves once shutdown is signalled or the scheduler is gone
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn task_loop(entry: Arc<TaskEntry>, mut shutdown: watch::Receiver<bool>, run_on_start: bool) {
    let mut ticker = tokio::time::interval(entry.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    if !run_on_start {
        ticker.tick().await;
    }

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_signalled(&mut shutdown) => break,
        }

        // The spawned run keeps going if shutdown interrupts it here
        tokio::select! {
            _ = entry.execute() => {}
            _ = shutdown_signalled(&mut shutdown) => {
                debug!(task = entry.name(), "Shutdown during execution");
                break;
            }
        }
    }
    debug!(task = entry.name(), "Task loop stopped");
}

/// Runs registered tasks on their intervals
pub struct Scheduler {
    config: SchedulerConfig,
    tasks: Mutex<Vec<Arc<TaskEntry>>>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started_at: Mutex<Option<Instant>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            shutdown,
            handles: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn register(&self, task: Arc<dyn ScheduledTask>, interval: Duration) -> Result<(), SchedulerError> {
        let name = task.name().to_string();
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval(name));
        }

        let mut tasks = self.tasks.lock();
        if tasks.iter().any(|t| t.name() == name) {
            return Err(SchedulerError::DuplicateTask(name));
        }
        tasks.push(Arc::new(TaskEntry {
            task,
            interval,
            stats: Mutex::new(TaskStats::default()),
            gate: tokio::sync::Mutex::new(()),
        }));
        info!("Registered task '{}' every {:?}", name, interval);
        Ok(())
    }

    /// Register discovery, refresh and cleanup for `aggregator` at the configured intervals
    pub fn register_pipeline(&self, aggregator: &Aggregator) -> Result<(), SchedulerError> {
        let c = &self.config;
        self.register(
            Arc::new(DiscoveryTask::new(aggregator.clone())),
            Duration::from_secs(c.discovery_interval_secs),
        )?;
        self.register(
            Arc::new(RefreshTask::new(aggregator.clone())),
            Duration::from_secs(c.refresh_interval_secs),
        )?;
        self.register(
            Arc::new(CleanupTask::new(aggregator.clone())),
            Duration::from_secs(c.cleanup_interval_secs),
        )
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.lock().iter().map(|t| t.name().to_string()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn one loop per task; a second call while running does nothing
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already running");
            return;
        }

        self.shutdown.send_replace(false);
        *self.started_at.lock() = Some(Instant::now());

        let tasks = self.tasks.lock().clone();
        let mut handles = self.handles.lock();
        for entry in tasks {
            let rx = self.shutdown.subscribe();
            handles.push(tokio::spawn(task_loop(entry, rx, self.config.run_on_start)));
        }
        info!("Scheduler started with {} tasks", handles.len());
    }

    /// Signal every loop to stop and wait for them; a no-op when stopped
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.shutdown.send_replace(true);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Task loop ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
    }

    /// Run a task now, outside its schedule
    pub async fn trigger(&self, name: &str) -> Result<(), SchedulerError> {
        let entry = self
            .tasks
            .lock()
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))?;

        info!("Manually triggering task '{}'", name);
        entry.execute().await.map_err(|error| SchedulerError::TaskFailed {
            name: name.to_string(),
            error,
        })
    }

    pub fn metrics(&self) -> Vec<TaskMetrics> {
        self.tasks.lock().iter().map(|t| t.metrics()).collect()
    }

    pub fn health(&self) -> SchedulerHealth {
        if !self.is_running() {
            return SchedulerHealth::Stopped;
        }

        let now = Instant::now();
        let started_at = (*self.started_at.lock()).unwrap_or(now);
        let grace = self.config.stale_grace();

        let stale: Vec<String> = self
            .tasks
            .lock()
            .iter()
            .filter(|entry| {
                let last = entry.stats.lock().last_run_at.unwrap_or(started_at);
                now.duration_since(last) > entry.interval + grace
            })
            .map(|entry| entry.name().to_string())
            .collect();

        if stale.is_empty() {
            SchedulerHealth::Healthy
        } else {
            SchedulerHealth::Stale { tasks: stale }
        }
    }
}

/// Discover and analyze new tokens
pub struct DiscoveryTask {
    aggregator: Aggregator,
}

impl DiscoveryTask {
    pub fn new(aggregator: Aggregator) -> Self {
        Self { aggregator }
    }
}

#[async_trait]
impl ScheduledTask for DiscoveryTask {
    fn name(&self) -> &str {
        "discovery"
    }

    async fn run(&self) -> anyhow::Result<()> {
        match self.aggregator.run_discovery().await? {
            BatchOutcome::Skipped { unhealthy } => {
                debug!("Discovery skipped, unhealthy: {:?}", unhealthy);
            }
            BatchOutcome::Completed(summary) => {
                debug!(new_tokens = summary.new_tokens, "Discovery batch done");
            }
        }
        Ok(())
    }
}

/// Re-analyze tracked tokens
pub struct RefreshTask {
    aggregator: Aggregator,
}

impl RefreshTask {
    pub fn new(aggregator: Aggregator) -> Self {
        Self { aggregator }
    }
}

#[async_trait]
impl ScheduledTask for RefreshTask {
    fn name(&self) -> &str {
        "refresh"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.aggregator.refresh_metrics().await;
        Ok(())
    }
}

/// Sweep the cache and prune old tokens
pub struct CleanupTask {
    aggregator: Aggregator,
}

impl CleanupTask {
    pub fn new(aggregator: Aggregator) -> Self {
        Self { aggregator }
    }
}

#[async_trait]
impl ScheduledTask for CleanupTask {
    fn name(&self) -> &str {
        "cleanup"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.aggregator.cleanup();
        Ok(())
    }
}
