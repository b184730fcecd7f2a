//! RugCheck Client
//!
//! Contract safety report: mint/freeze authorities, holder concentration,
//! LP lock and flagged risks.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::http::{self, DEFAULT_TIMEOUT_SECS};
use crate::domain::{SecurityData, SourceData, SourceName};
use crate::ports::{SourceClient, SourceError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RugCheckConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for RugCheckConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.rugcheck.xyz".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReport {
    mint_authority: Option<String>,
    freeze_authority: Option<String>,
    #[serde(default)]
    top_holders: Vec<RawHolder>,
    #[serde(default)]
    markets: Vec<RawMarket>,
    #[serde(default)]
    risks: Vec<RawRisk>,
    #[serde(rename = "score_normalised")]
    score_normalised: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawHolder {
    #[serde(default)]
    pct: f64,
}

#[derive(Debug, Deserialize)]
struct RawMarket {
    lp: Option<RawLp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLp {
    lp_locked_pct: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawRisk {
    name: String,
    #[serde(default)]
    level: String,
}

/// Risk assumed per "danger" finding when no normalised score is given
const DANGER_RISK: f64 = 30.0;
/// Risk assumed per "warn" finding when no normalised score is given
const WARN_RISK: f64 = 10.0;

fn security_data(report: RawReport) -> SecurityData {
    let fallback_risk: f64 = report
        .risks
        .iter()
        .map(|r| match r.level.as_str() {
            "danger" => DANGER_RISK,
            "warn" => WARN_RISK,
            _ => 0.0,
        })
        .sum();

    let risk_score = report
        .score_normalised
        .filter(|s| s.is_finite())
        .unwrap_or(fallback_risk)
        .clamp(0.0, 100.0);

    let top10_holder_pct = if report.top_holders.is_empty() {
        None
    } else {
        Some(
            report
                .top_holders
                .iter()
                .take(10)
                .map(|h| h.pct)
                .sum::<f64>()
                .min(100.0),
        )
    };

    let lp_locked_pct = report
        .markets
        .iter()
        .filter_map(|m| m.lp.as_ref().and_then(|lp| lp.lp_locked_pct))
        .max_by(|a, b| a.total_cmp(b));

    SecurityData {
        risk_score,
        mint_authority_revoked: report.mint_authority.is_none(),
        freeze_authority_revoked: report.freeze_authority.is_none(),
        top10_holder_pct,
        lp_locked_pct,
        flagged_risks: report.risks.into_iter().map(|r| r.name).collect(),
    }
}

/// RugCheck security data source
#[derive(Debug, Clone)]
pub struct RugCheckClient {
    config: RugCheckConfig,
    http: Client,
}

impl RugCheckClient {
    pub fn new(config: RugCheckConfig) -> Result<Self, SourceError> {
        let http = http::build_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl SourceClient for RugCheckClient {
    fn name(&self) -> SourceName {
        SourceName::RugCheck
    }

    async fn fetch(&self, address: &str) -> Result<SourceData, SourceError> {
        let url = format!(
            "{}/v1/tokens/{}/report",
            self.config.base_url,
            http::path_segment(address)?
        );
        let report: RawReport = http::get_json(self.http.get(&url)).await?;
        Ok(SourceData::Security(security_data(report)))
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/ping", self.config.base_url);
        http::probe(self.http.get(&url)).await
    }
}
