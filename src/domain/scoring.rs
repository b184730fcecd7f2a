//! Token Scoring
//!
//! Turns each present source payload into a risk and an opportunity sub-score
//! (0-100) and combines them with per-source weights.
//!
//! Degraded sources are left out of the weighted average entirely; they are not
//! scored as zero. Weights and reference scales are configuration, not constants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::analysis::{SourceData, SourceName, SourceResult};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScoringError {
    #[error("Invalid scoring configuration: {0}")]
    InvalidConfig(String),
}

/// Relative weight of each source in the combined scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceWeights {
    pub dexscreener: f64,
    pub birdeye: f64,
    pub rugcheck: f64,
    pub jupiter: f64,
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            dexscreener: 0.35,
            birdeye: 0.20,
            rugcheck: 0.30,
            jupiter: 0.15,
        }
    }
}

impl SourceWeights {
    pub fn get(&self, source: SourceName) -> f64 {
        match source {
            SourceName::DexScreener => self.dexscreener,
            SourceName::Birdeye => self.birdeye,
            SourceName::RugCheck => self.rugcheck,
            SourceName::Jupiter => self.jupiter,
        }
    }
}

/// Scoring weights and the reference values at which a metric saturates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: SourceWeights,
    /// Liquidity (USD) that earns a full liquidity score
    pub liquidity_reference_usd: f64,
    /// 24h volume (USD) that earns a full volume score
    pub volume_reference_usd: f64,
    /// Holder count that earns a full distribution score
    pub holder_reference: f64,
    /// Risk added when mint authority is still active
    pub mint_authority_penalty: f64,
    /// Risk added when freeze authority is still active
    pub freeze_authority_penalty: f64,
    /// Top-10 concentration above which risk starts climbing
    pub concentration_threshold_pct: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: SourceWeights::default(),
            liquidity_reference_usd: 250_000.0,
            volume_reference_usd: 1_000_000.0,
            holder_reference: 2_000.0,
            mint_authority_penalty: 20.0,
            freeze_authority_penalty: 15.0,
            concentration_threshold_pct: 50.0,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ScoringError> {
        let weights = SourceName::ALL.map(|s| self.weights.get(s));
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ScoringError::InvalidConfig(
                "source weights must be finite and >= 0".to_string(),
            ));
        }
        if weights.iter().all(|w| *w == 0.0) {
            return Err(ScoringError::InvalidConfig(
                "at least one source weight must be > 0".to_string(),
            ));
        }
        for (name, value) in [
            ("liquidity_reference_usd", self.liquidity_reference_usd),
            ("volume_reference_usd", self.volume_reference_usd),
            ("holder_reference", self.holder_reference),
        ] {
            if !(value > 0.0) {
                return Err(ScoringError::InvalidConfig(format!(
                    "{} must be > 0, got {}",
                    name, value
                )));
            }
        }
        if !(0.0..=100.0).contains(&self.concentration_threshold_pct) {
            return Err(ScoringError::InvalidConfig(format!(
                "concentration_threshold_pct must be 0-100, got {}",
                self.concentration_threshold_pct
            )));
        }
        Ok(())
    }
}

/// One source's contribution, both in 0-100
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScore {
    /// Higher is riskier
    pub risk: f64,
    /// Higher is more attractive
    pub opportunity: f64,
}

impl SubScore {
    /// Opportunity and safety, equally weighted
    pub fn quality(&self) -> f64 {
        (self.opportunity + (100.0 - self.risk)) / 2.0
    }
}

/// Combined scores for one analysis
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub overall: f64,
    pub risk: f64,
    pub opportunity: f64,
    /// Number of present sources with a positive weight
    pub contributing_sources: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Result<Self, ScoringError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score a single source payload
    pub fn sub_score(&self, data: &SourceData) -> SubScore {
        let c = &self.config;
        match data {
            SourceData::Market(m) => {
                let liquidity = saturate(m.liquidity_usd, c.liquidity_reference_usd);
                let volume = saturate(m.volume_24h_usd, c.volume_reference_usd);
                // 0% change maps to 50, +100% or more to 100
                let momentum = clamp(50.0 + m.price_change_24h_pct / 2.0);
                SubScore {
                    risk: clamp(100.0 - liquidity),
                    opportunity: clamp(0.4 * liquidity + 0.4 * volume + 0.2 * momentum),
                }
            }
            SourceData::Trading(t) => {
                let holders = saturate(t.holder_count as f64, c.holder_reference);
                let wallets = saturate(t.unique_wallets_24h as f64, c.holder_reference);
                let buy_pressure = t.buy_ratio() * 100.0;
                SubScore {
                    risk: clamp(100.0 - holders),
                    opportunity: clamp(0.5 * holders + 0.3 * wallets + 0.2 * buy_pressure),
                }
            }
            SourceData::Security(s) => {
                let mut risk = s.risk_score;
                if !s.mint_authority_revoked {
                    risk += c.mint_authority_penalty;
                }
                if !s.freeze_authority_revoked {
                    risk += c.freeze_authority_penalty;
                }
                if let Some(top10) = s.top10_holder_pct {
                    if top10 > c.concentration_threshold_pct {
                        risk += top10 - c.concentration_threshold_pct;
                    }
                }
                let risk = clamp(risk);
                SubScore {
                    risk,
                    opportunity: 100.0 - risk,
                }
            }
            SourceData::Listing(l) => {
                let listing = if l.verified { 80.0 } else { 40.0 };
                let organic = l.organic_score.map(clamp).unwrap_or(listing);
                let volume = l
                    .daily_volume_usd
                    .map(|v| saturate(v, c.volume_reference_usd))
                    .unwrap_or(0.0);
                SubScore {
                    risk: if l.verified { 10.0 } else { 60.0 },
                    opportunity: clamp(0.4 * listing + 0.4 * organic + 0.2 * volume),
                }
            }
        }
    }

    /// Weighted combination over present sources; degraded ones are excluded
    pub fn score(&self, sources: &BTreeMap<SourceName, SourceResult>) -> Scores {
        let mut total_weight = 0.0;
        let mut overall = 0.0;
        let mut risk = 0.0;
        let mut opportunity = 0.0;
        let mut contributing = 0;

        for (name, result) in sources {
            let Some(data) = result.data() else { continue };
            let weight = self.config.weights.get(*name);
            if weight <= 0.0 {
                continue;
            }
            let sub = self.sub_score(data);
            total_weight += weight;
            overall += weight * sub.quality();
            risk += weight * sub.risk;
            opportunity += weight * sub.opportunity;
            contributing += 1;
        }

        if total_weight == 0.0 {
            return Scores::default();
        }

        Scores {
            overall: round2(overall / total_weight),
            risk: round2(risk / total_weight),
            opportunity: round2(opportunity / total_weight),
            contributing_sources: contributing,
        }
    }
}

/// Log-scaled 0-100 score that reaches 100 at `reference`
fn saturate(value: f64, reference: f64) -> f64 {
    if value <= 0.0 {
        return 0.0;
    }
    clamp(100.0 * (1.0 + value).ln() / (1.0 + reference).ln())
}

fn clamp(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
