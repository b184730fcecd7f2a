//! Alert Notifiers
//!
//! - `LogNotifier`: writes passed analyses and pipeline errors to the log
//! - `WebhookNotifier`: posts the same events to Discord or Telegram

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::domain::PipelineEvent;
use crate::ports::{Notifier, NotifyError};

const TELEGRAM_API: &str = "https://api.telegram.org";
const WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Human-readable one-liner for an alert-worthy event
pub fn format_event(event: &PipelineEvent) -> Option<String> {
    match event {
        PipelineEvent::AnalysisPassed(analysis) => {
            let liquidity = analysis
                .metrics
                .liquidity_usd
                .map(|l| format!("${:.0}", l))
                .unwrap_or_else(|| "n/a".to_string());
            let degraded = analysis.degraded_sources();
            let mut msg = format!(
                "PASSED {} | score {:.1} (risk {:.1}, opportunity {:.1}) | liquidity {}",
                analysis.token_address,
                analysis.overall_score,
                analysis.risk_score,
                analysis.opportunity_score,
                liquidity
            );
            if !degraded.is_empty() {
                let names: Vec<&str> = degraded.iter().map(|s| s.as_str()).collect();
                msg.push_str(&format!(" | degraded: {}", names.join(", ")));
            }
            Some(msg)
        }
        PipelineEvent::AnalysisFailed(analysis) => Some(format!(
            "REJECTED {} | failed: {}",
            analysis.token_address,
            analysis.failed_filters.join(", ")
        )),
        PipelineEvent::PipelineError {
            token_address,
            message,
        } => Some(format!("ERROR {} | {}", token_address, message)),
        PipelineEvent::TokenDiscovered(token) => Some(format!(
            "DISCOVERED {} ({})",
            token.address,
            token.display_symbol()
        )),
        PipelineEvent::StatsUpdated(_) => None,
    }
}

/// Logs alert-worthy events through `tracing`
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &PipelineEvent) -> Result<(), NotifyError> {
        if let Some(msg) = format_event(event) {
            match event {
                PipelineEvent::PipelineError { .. } => tracing::warn!("{}", msg),
                _ => tracing::info!("{}", msg),
            }
        }
        Ok(())
    }
}

/// Webhook destination
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookTarget {
    Discord { url: String },
    Telegram { bot_token: String, chat_id: String },
}

impl WebhookTarget {
    fn label(&self) -> &'static str {
        match self {
            WebhookTarget::Discord { .. } => "discord",
            WebhookTarget::Telegram { .. } => "telegram",
        }
    }
}

/// Posts alerts to a chat webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    target: WebhookTarget,
    http: Client,
}

impl WebhookNotifier {
    pub fn new(target: WebhookTarget) -> Result<Self, NotifyError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()?;
        Ok(Self { target, http })
    }

    pub fn discord(url: impl Into<String>) -> Result<Self, NotifyError> {
        Self::new(WebhookTarget::Discord { url: url.into() })
    }

    pub fn telegram(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self, NotifyError> {
        Self::new(WebhookTarget::Telegram {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        })
    }

    pub fn target(&self) -> &WebhookTarget {
        &self.target
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        self.target.label()
    }

    async fn notify(&self, event: &PipelineEvent) -> Result<(), NotifyError> {
        let Some(text) = format_event(event) else {
            return Ok(());
        };

        let request = match &self.target {
            WebhookTarget::Discord { url } => self.http.post(url).json(&json!({ "content": text })),
            WebhookTarget::Telegram { bot_token, chat_id } => self
                .http
                .post(format!("{}/bot{}/sendMessage", TELEGRAM_API, bot_token))
                .json(&json!({ "chat_id": chat_id, "text": text })),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected(format!("{} returned {}: {}", self.name(), status, body)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CombinedAnalysis, PipelineStats, SourceName, SourceResult, TokenMetrics};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn analysis(passed: bool) -> Arc<CombinedAnalysis> {
        let mut sources = BTreeMap::new();
        sources.insert(SourceName::Jupiter, SourceResult::degraded("timeout", 4));
        Arc::new(CombinedAnalysis {
            token_address: "Mint111".to_string(),
            sources,
            metrics: TokenMetrics {
                liquidity_usd: Some(42_000.0),
                ..Default::default()
            },
            overall_score: 71.25,
            risk_score: 22.0,
            opportunity_score: 64.5,
            passed,
            failed_filters: if passed {
                vec![]
            } else {
                vec!["minLiquidity".into(), "maxRiskScore".into()]
            },
            has_errors: true,
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn test_format_passed_analysis() {
        let msg = format_event(&PipelineEvent::AnalysisPassed(analysis(true))).unwrap();
        assert!(msg.starts_with("PASSED Mint111"));
        assert!(msg.contains("score 71.2") || msg.contains("score 71.3"));
        assert!(msg.contains("$42000"));
        assert!(msg.contains("degraded: jupiter"));
    }

    #[test]
    fn test_format_rejected_lists_filters() {
        let msg = format_event(&PipelineEvent::AnalysisFailed(analysis(false))).unwrap();
        assert_eq!(msg, "REJECTED Mint111 | failed: minLiquidity, maxRiskScore");
    }

    #[test]
    fn test_stats_are_not_alerted() {
        assert!(format_event(&PipelineEvent::StatsUpdated(PipelineStats::default())).is_none());
    }

    #[test]
    fn test_default_interest_is_passed_and_errors() {
        let notifier = LogNotifier;
        assert!(notifier.wants(&PipelineEvent::AnalysisPassed(analysis(true))));
        assert!(notifier.wants(&PipelineEvent::PipelineError {
            token_address: "Mint111".into(),
            message: "all sources degraded".into(),
        }));
        assert!(!notifier.wants(&PipelineEvent::AnalysisFailed(analysis(false))));
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let notifier = LogNotifier;
        assert!(notifier
            .notify(&PipelineEvent::AnalysisPassed(analysis(true)))
            .await
            .is_ok());
    }

    #[test]
    fn test_webhook_names() {
        let discord = WebhookNotifier::discord("https://discord.com/api/webhooks/1/x").unwrap();
        assert_eq!(discord.name(), "discord");
        let telegram = WebhookNotifier::telegram("123:abc", "-100").unwrap();
        assert_eq!(telegram.name(), "telegram");
    }
}
