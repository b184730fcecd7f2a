//! Adapters Layer - External System Implementations
//!
//! This module contains the infrastructure behind the port traits:
//! - Rate limiter: per-service sliding windows and retry with backoff
//! - Cache: TTL cache with bounded size and a background sweeper
//! - Sources: HTTP clients for DexScreener, Birdeye, RugCheck and Jupiter
//! - Store: JSON file persistence
//! - Alerts: log and webhook notifiers
//! - CLI: Command-line interface definitions

pub mod rate_limiter;
pub mod cache;
pub mod sources;
pub mod store;
pub mod alerts;
pub mod cli;

pub use rate_limiter::{RateLimitConfig, RateLimitError, RateLimiter, RetryError, Retryable};
pub use cache::{spawn_sweeper, CacheConfig, CacheStats, TtlCache};
pub use sources::{SourceSet, SourcesConfig};
pub use store::JsonlStore;
pub use alerts::{LogNotifier, WebhookNotifier, WebhookTarget};
pub use cli::CliApp;
