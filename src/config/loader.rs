//! Configuration Loader
//!
//! Loads and validates the TOML configuration. Every section is optional and
//! falls back to defaults, so an empty file is a valid (filter-less) config.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::adapters::cache::CacheConfig;
use crate::adapters::rate_limiter::RateLimitConfig;
use crate::adapters::sources::SourcesConfig;
use crate::application::{AggregatorConfig, SchedulerConfig};
use crate::domain::{FilterPipeline, FilterSpec, ScoringConfig, SourceName};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub cache: CacheConfig,
    /// One entry per upstream service
    #[serde(default = "default_rate_limits")]
    pub rate_limits: Vec<RateLimitConfig>,
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Evaluated in order; an analysis passes only if all match
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub alerts: AlertsSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineSection::default(),
            cache: CacheConfig::default(),
            rate_limits: default_rate_limits(),
            scoring: ScoringConfig::default(),
            filters: Vec::new(),
            scheduler: SchedulerConfig::default(),
            sources: SourcesConfig::default(),
            store: StoreSection::default(),
            logging: LoggingSection::default(),
            alerts: AlertsSection::default(),
        }
    }
}

/// Published provider limits, per minute
fn default_rate_limits() -> Vec<RateLimitConfig> {
    vec![
        RateLimitConfig::new(SourceName::DexScreener.as_str(), 300, 60_000),
        RateLimitConfig::new(SourceName::Birdeye.as_str(), 100, 60_000),
        RateLimitConfig::new(SourceName::RugCheck.as_str(), 60, 60_000),
        RateLimitConfig::new(SourceName::Jupiter.as_str(), 60, 60_000),
    ]
}

/// Aggregator settings plus shutdown behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(flatten)]
    pub aggregator: AggregatorConfig,
    /// How long shutdown waits for in-flight jobs
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            aggregator: AggregatorConfig::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl PipelineSection {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Directory for `tokens.json` and `analyses.jsonl`; `~` is expanded
    pub data_dir: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

impl StoreSection {
    pub fn resolved_data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).to_string())
    }
}

/// Logging configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Alerts configuration section (optional)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertsSection {
    /// Log passed analyses and pipeline errors
    #[serde(default = "default_true")]
    pub log_enabled: bool,
    /// Enable Discord webhook notifications
    #[serde(default)]
    pub discord_enabled: bool,
    /// Discord webhook URL
    #[serde(default)]
    pub discord_webhook_url: String,
    /// Enable Telegram notifications
    #[serde(default)]
    pub telegram_enabled: bool,
    /// Telegram bot token
    #[serde(default)]
    pub telegram_bot_token: String,
    /// Telegram chat ID
    #[serde(default)]
    pub telegram_chat_id: String,
}

fn default_true() -> bool {
    true
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            log_enabled: true,
            discord_enabled: false,
            discord_webhook_url: String::new(),
            telegram_enabled: false,
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}

/// Load configuration from a TOML file, apply environment overrides, validate
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&content)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Fill secrets left empty in the file from the environment
    ///
    /// Checks `BIRDEYE_API_KEY`, `JUPITER_API_KEY` and `DISCORD_WEBHOOK_URL`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = |current: &Option<String>, key: &str| -> Option<String> {
            match current {
                Some(v) if !v.is_empty() => Some(v.clone()),
                _ => lookup(key).filter(|v| !v.is_empty()),
            }
        };

        self.sources.birdeye.api_key = from_env(&self.sources.birdeye.api_key, "BIRDEYE_API_KEY");
        self.sources.jupiter.api_key = from_env(&self.sources.jupiter.api_key, "JUPITER_API_KEY");

        if self.alerts.discord_webhook_url.is_empty() {
            if let Some(url) = lookup("DISCORD_WEBHOOK_URL").filter(|v| !v.is_empty()) {
                self.alerts.discord_webhook_url = url;
            }
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Rate limits: valid, unique, and present for every source
        let mut seen = HashSet::new();
        for limit in &self.rate_limits {
            limit.validate().map_err(|e| invalid(e.to_string()))?;
            if !seen.insert(limit.service.as_str()) {
                return Err(invalid(format!(
                    "duplicate rate limit for service '{}'",
                    limit.service
                )));
            }
        }
        for source in SourceName::ALL {
            if !seen.contains(source.as_str()) {
                return Err(invalid(format!("missing rate limit for service '{}'", source)));
            }
        }

        FilterPipeline::new(&self.filters).map_err(|e| invalid(e.to_string()))?;
        self.scoring.validate().map_err(|e| invalid(e.to_string()))?;

        // Pipeline
        let pipeline = &self.pipeline.aggregator;
        if pipeline.max_concurrent_jobs == 0 {
            return Err(invalid("max_concurrent_jobs must be > 0"));
        }
        if pipeline.event_capacity == 0 {
            return Err(invalid("event_capacity must be > 0"));
        }
        if pipeline.token_max_age_hours <= 0.0 {
            return Err(invalid(format!(
                "token_max_age_hours must be > 0, got {}",
                pipeline.token_max_age_hours
            )));
        }
        if pipeline.chain.trim().is_empty() {
            return Err(invalid("chain must not be empty"));
        }

        // Cache
        if self.cache.max_size == 0 {
            return Err(invalid("cache max_size must be > 0"));
        }
        if self.cache.default_ttl_secs == 0 || self.cache.sweep_interval_secs == 0 {
            return Err(invalid("cache default_ttl_secs and sweep_interval_secs must be > 0"));
        }

        // Scheduler
        let s = &self.scheduler;
        for (name, secs) in [
            ("discovery_interval_secs", s.discovery_interval_secs),
            ("refresh_interval_secs", s.refresh_interval_secs),
            ("cleanup_interval_secs", s.cleanup_interval_secs),
        ] {
            if secs == 0 {
                return Err(invalid(format!("{} must be > 0", name)));
            }
        }

        if self.store.data_dir.trim().is_empty() {
            return Err(invalid("store data_dir must not be empty"));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "logging level must be one of {:?}, got '{}'",
                LOG_LEVELS, self.logging.level
            )));
        }

        // Alerts
        if self.alerts.discord_enabled && self.alerts.discord_webhook_url.is_empty() {
            return Err(invalid("discord_enabled requires discord_webhook_url"));
        }
        if self.alerts.telegram_enabled
            && (self.alerts.telegram_bot_token.is_empty() || self.alerts.telegram_chat_id.is_empty())
        {
            return Err(invalid("telegram_enabled requires telegram_bot_token and telegram_chat_id"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_valid_config() -> String {
        r#"
[pipeline]
max_concurrent_jobs = 4
critical_sources = ["dexscreener", "rugcheck"]
token_max_age_hours = 12.0
shutdown_grace_secs = 10

[cache]
default_ttl_secs = 120
max_size = 500

[[rate_limits]]
service = "dexscreener"
max_requests = 300
window_ms = 60000

[[rate_limits]]
service = "birdeye"
max_requests = 100
window_ms = 60000
max_retries = 2

[[rate_limits]]
service = "rugcheck"
max_requests = 60
window_ms = 60000

[[rate_limits]]
service = "jupiter"
max_requests = 60
window_ms = 60000

[[filters]]
type = "minLiquidity"
value = 10000.0

[[filters]]
type = "priceChangeRange"
min = -50.0
max = 500.0

[[filters]]
type = "chain"
chain = "solana"

[scheduler]
discovery_interval_secs = 30

[store]
data_dir = "~/.token-radar"

[logging]
level = "debug"
"#
        .to_string()
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = write_config(&create_valid_config());
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.pipeline.aggregator.max_concurrent_jobs, 4);
        assert_eq!(
            config.pipeline.aggregator.critical_sources,
            vec![SourceName::DexScreener, SourceName::RugCheck]
        );
        assert_eq!(config.pipeline.shutdown_grace(), Duration::from_secs(10));
        assert_eq!(config.cache.max_size, 500);
        assert_eq!(config.rate_limits.len(), 4);
        assert_eq!(config.rate_limits[1].max_retries, 2);
        assert_eq!(config.filters.len(), 3);
        assert_eq!(config.scheduler.discovery_interval_secs, 30);
        assert_eq!(config.scheduler.refresh_interval_secs, 300);
        assert_eq!(config.logging.level, "debug");
        assert!(config.alerts.log_enabled);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = load_config(concat!(env!("CARGO_MANIFEST_DIR"), "/config/radar.toml")).unwrap();
        assert_eq!(config.filters.len(), 6);
        assert!(FilterPipeline::new(&config.filters).is_ok());
        assert_eq!(config.pipeline.aggregator.critical_sources, vec![SourceName::DexScreener]);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config, {
            let mut expected = Config::default();
            expected.apply_env_overrides(|key| std::env::var(key).ok());
            expected
        });
        assert_eq!(config.rate_limits.len(), SourceName::ALL.len());
        assert!(config.filters.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/radar.toml");
        assert!(matches!(result.unwrap_err(), ConfigError::IoError(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let file = write_config("[pipeline\nmax_concurrent_jobs = ");
        assert!(matches!(load_config(file.path()).unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_unknown_critical_source_fails_to_parse() {
        let file = write_config("[pipeline]\ncritical_sources = [\"coingecko\"]\n");
        assert!(matches!(load_config(file.path()).unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_invalid_rate_limit() {
        let mut config = Config::default();
        config.rate_limits[0].max_requests = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_missing_rate_limit_for_source() {
        let mut config = Config::default();
        config.rate_limits.retain(|l| l.service != "rugcheck");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("rugcheck"));
    }

    #[test]
    fn test_duplicate_rate_limit() {
        let mut config = Config::default();
        config.rate_limits.push(RateLimitConfig::new("jupiter", 10, 1000));
        assert!(config.validate().unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_invalid_filter() {
        let mut config = Config::default();
        config.filters.push(FilterSpec::value("minLiquidity", -5.0));
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = Config::default();
        config.filters.push(FilterSpec::flag("noSuchFilter"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_pipeline_and_scheduler() {
        let mut config = Config::default();
        config.pipeline.aggregator.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scheduler.refresh_interval_secs = 0;
        assert!(config.validate().unwrap_err().to_string().contains("refresh_interval_secs"));

        let mut config = Config::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_alerts_need_credentials() {
        let mut config = Config::default();
        config.alerts.discord_enabled = true;
        assert!(config.validate().is_err());

        config.alerts.discord_webhook_url = "https://discord.com/api/webhooks/1/x".into();
        assert!(config.validate().is_ok());

        config.alerts.telegram_enabled = true;
        config.alerts.telegram_bot_token = "123:abc".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_fill_empty_values() {
        let env: HashMap<&str, &str> = [
            ("BIRDEYE_API_KEY", "bird-key"),
            ("JUPITER_API_KEY", "jup-env"),
            ("DISCORD_WEBHOOK_URL", "https://discord.com/api/webhooks/2/y"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.sources.jupiter.api_key = Some("jup-file".into());
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.sources.birdeye.api_key.as_deref(), Some("bird-key"));
        assert_eq!(config.sources.jupiter.api_key.as_deref(), Some("jup-file"));
        assert_eq!(config.alerts.discord_webhook_url, "https://discord.com/api/webhooks/2/y");
    }

    #[test]
    fn test_empty_env_value_is_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(|_| Some(String::new()));
        assert!(config.sources.birdeye.api_key.is_none());
        assert!(config.alerts.discord_webhook_url.is_empty());
    }

    #[test]
    fn test_data_dir_tilde_expansion() {
        let store = StoreSection {
            data_dir: "~/radar".into(),
        };
        let resolved = store.resolved_data_dir();
        assert!(!resolved.to_string_lossy().starts_with('~'));
        assert!(resolved.ends_with("radar"));

        let plain = StoreSection::default();
        assert_eq!(plain.resolved_data_dir(), PathBuf::from("data"));
    }
}
