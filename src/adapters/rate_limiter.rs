//! Per-Service Rate Limiter
//!
//! Sliding-window admission control plus an exponential-backoff retry wrapper.
//!
//! Every upstream service has its own window of accepted-request timestamps and its
//! own backoff state behind its own lock, so one service hitting its quota never
//! throttles another.
//!
//! Admission: drop timestamps older than the window; if the window is full, sleep
//! until the oldest one ages out and check again. The wait is a loop, so sustained
//! contention never grows the stack.
//!
//! Retries: `delay = min(base * factor^attempt + jitter, max_delay)` with jitter up
//! to 10% of the pre-jitter delay. The last error is always surfaced.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Default base delay before the first retry
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
/// Default retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default backoff multiplier per attempt
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
/// Default upper bound for a single backoff sleep
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Maximum jitter as a fraction of the pre-jitter delay
const JITTER_FRACTION: f64 = 0.10;

fn default_backoff_base_ms() -> u64 {
    DEFAULT_BACKOFF_BASE_MS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_backoff_factor() -> f64 {
    DEFAULT_BACKOFF_FACTOR
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RateLimitError {
    #[error("No rate limit configured for service '{0}'")]
    UnknownService(String),

    #[error("Invalid rate limit config for '{service}': {reason}")]
    InvalidConfig { service: String, reason: String },
}

/// Failure of a retried operation
#[derive(Debug, Error, Clone)]
pub enum RetryError<E>
where
    E: fmt::Display + fmt::Debug,
{
    #[error(transparent)]
    Config(#[from] RateLimitError),

    /// Operation failed with a non-retryable error
    #[error("Permanent failure after {attempts} attempt(s): {error}")]
    Permanent { attempts: u32, error: E },

    /// Every attempt failed
    #[error("Retries exhausted after {attempts} attempts, last error: {last_error}")]
    Exhausted { attempts: u32, last_error: E },
}

impl<E> RetryError<E>
where
    E: fmt::Display + fmt::Debug,
{
    /// Attempts made before giving up (0 for configuration errors)
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Config(_) => 0,
            RetryError::Permanent { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The operation's final error, if the operation ran at all
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Config(_) => None,
            RetryError::Permanent { error, .. } => Some(error),
            RetryError::Exhausted { last_error, .. } => Some(last_error),
        }
    }
}

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Quota and retry settings for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub service: String,
    pub max_requests: u32,
    pub window_ms: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RateLimitConfig {
    /// Config with default backoff settings
    pub fn new(service: impl Into<String>, max_requests: u32, window_ms: u64) -> Self {
        Self {
            service: service.into(),
            max_requests,
            window_ms,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }

    /// Builder: override retry behaviour
    pub fn with_backoff(mut self, base_ms: u64, factor: f64, max_delay_ms: u64, max_retries: u32) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_factor = factor;
        self.max_delay_ms = max_delay_ms;
        self.max_retries = max_retries;
        self
    }

    pub fn validate(&self) -> Result<(), RateLimitError> {
        let invalid = |reason: String| RateLimitError::InvalidConfig {
            service: self.service.clone(),
            reason,
        };

        if self.service.trim().is_empty() {
            return Err(invalid("service name cannot be empty".to_string()));
        }
        if self.max_requests == 0 {
            return Err(invalid("max_requests must be > 0".to_string()));
        }
        if self.window_ms == 0 {
            return Err(invalid("window_ms must be > 0".to_string()));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(invalid(format!(
                "backoff_factor must be >= 1, got {}",
                self.backoff_factor
            )));
        }
        if self.max_delay_ms < self.backoff_base_ms {
            return Err(invalid(format!(
                "max_delay_ms ({}) must be >= backoff_base_ms ({})",
                self.max_delay_ms, self.backoff_base_ms
            )));
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.backoff_base_ms),
            factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_retries: self.max_retries,
        }
    }
}

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Pre-jitter delay after the given zero-based failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let raw = base_ms * self.factor.powi(attempt.min(i32::MAX as u32) as i32);
        Duration::from_millis(raw.min(max_ms) as u64)
    }

    /// Delay with up to 10% random jitter, still capped at `max_delay`
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        let max_jitter_ms = (delay.as_millis() as f64 * JITTER_FRACTION) as u64;
        let jitter_ms = if max_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=max_jitter_ms)
        };
        (delay + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Backoff bookkeeping for one service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    /// Retryable failures since the last success
    pub consecutive_failures: u32,
    /// Pre-jitter delay scheduled after the most recent failure
    pub last_delay: Duration,
}

#[derive(Debug, Default)]
struct ServiceState {
    /// Accepted-request timestamps, oldest first
    admitted: VecDeque<Instant>,
    backoff: BackoffState,
}

impl ServiceState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.admitted.front() {
            if now.duration_since(*oldest) >= window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug)]
struct ServiceLimiter {
    config: RateLimitConfig,
    policy: RetryPolicy,
    state: Mutex<ServiceState>,
}

impl ServiceLimiter {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            policy: config.retry_policy(),
            config,
            state: Mutex::new(ServiceState::default()),
        }
    }

    async fn admit(&self) {
        let window = self.config.window();
        let max = self.config.max_requests as usize;

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.prune(now, window);

                if state.admitted.len() < max {
                    state.admitted.push_back(now);
                    return;
                }

                match state.admitted.front() {
                    Some(oldest) => window.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };

            trace!(
                service = %self.config.service,
                wait_ms = wait.as_millis() as u64,
                "Window full, waiting for a slot"
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn record_failure(&self, delay: Duration) -> BackoffState {
        let mut state = self.state.lock().await;
        state.backoff.consecutive_failures += 1;
        state.backoff.last_delay = delay;
        state.backoff
    }

    async fn record_success(&self) {
        let mut state = self.state.lock().await;
        if state.backoff != BackoffState::default() {
            debug!(service = %self.config.service, "Backoff reset after success");
            state.backoff = BackoffState::default();
        }
    }
}

/// Admission control and retries for every configured service
#[derive(Debug)]
pub struct RateLimiter {
    services: HashMap<String, ServiceLimiter>,
}

impl RateLimiter {
    /// Build from validated per-service configs; later duplicates replace earlier ones
    pub fn new(configs: impl IntoIterator<Item = RateLimitConfig>) -> Result<Self, RateLimitError> {
        let mut services = HashMap::new();
        for config in configs {
            config.validate()?;
            services.insert(config.service.clone(), ServiceLimiter::new(config));
        }
        Ok(Self { services })
    }

    fn service(&self, service: &str) -> Result<&ServiceLimiter, RateLimitError> {
        self.services
            .get(service)
            .ok_or_else(|| RateLimitError::UnknownService(service.to_string()))
    }

    pub fn has_service(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    pub fn config(&self, service: &str) -> Result<&RateLimitConfig, RateLimitError> {
        Ok(&self.service(service)?.config)
    }

    /// Wait until `service` has a free slot, then take it
    pub async fn admit(&self, service: &str) -> Result<(), RateLimitError> {
        self.service(service)?.admit().await;
        Ok(())
    }

    /// Requests admitted within the current window
    pub async fn window_usage(&self, service: &str) -> Result<usize, RateLimitError> {
        let limiter = self.service(service)?;
        let mut state = limiter.state.lock().await;
        state.prune(Instant::now(), limiter.config.window());
        Ok(state.admitted.len())
    }

    pub async fn backoff_state(&self, service: &str) -> Result<BackoffState, RateLimitError> {
        Ok(self.service(service)?.state.lock().await.backoff)
    }

    /// Run `op` gated by admission, retrying retryable failures with backoff
    ///
    /// Makes at most `max_retries + 1` attempts. Non-retryable errors return
    /// immediately as `RetryError::Permanent`.
    pub async fn run_with_retry<T, E, F, Fut>(
        &self,
        service: &str,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display + fmt::Debug,
    {
        let limiter = self.service(service)?;
        let policy = limiter.policy;
        let max_attempts = policy.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            limiter.admit().await;
            attempt += 1;

            let error = match op().await {
                Ok(value) => {
                    limiter.record_success().await;
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                debug!(service, attempt, error = %error, "Non-retryable failure");
                return Err(RetryError::Permanent {
                    attempts: attempt,
                    error,
                });
            }

            let backoff = limiter
                .record_failure(policy.delay_for_attempt(attempt - 1))
                .await;

            if attempt >= max_attempts {
                warn!(
                    service,
                    attempts = attempt,
                    consecutive_failures = backoff.consecutive_failures,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let delay = policy.jittered_delay(attempt - 1);
            debug!(
                service,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
