//! token-radar - new token discovery and analysis pipeline
//!
//! Polls a discovery feed for newly listed tokens, fetches market, trading,
//! security and listing data for each one under per-service rate limits,
//! combines it into scored analyses and filters them.
//!
//! # Modules
//!
//! - `domain`: Core types (TokenCandidate, CombinedAnalysis, FilterPipeline, Scorer)
//! - `ports`: Trait abstractions (SourceClient, DiscoveryPort, Store, Notifier)
//! - `adapters`: Implementations (RateLimiter, TtlCache, HTTP sources, store, alerts, CLI)
//! - `application`: Aggregator, Scheduler and event sinks
//! - `config`: Configuration loading and validation

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod config;
pub mod application;
