//! Token Filters
//!
//! Declarative, side-effect-free predicates over token metrics.
//!
//! A `FilterSpec` is the config-facing shape (`{ type = "minLiquidity", value = 10000 }`).
//! It is validated into a `Filter` before anything is evaluated, so an unknown type or a
//! nonsensical threshold fails loudly instead of silently passing every token.
//!
//! All comparisons are inclusive: `minLiquidity = 10000` passes a token with exactly
//! 10000 USD of liquidity. A token missing the metric a filter needs fails that filter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::analysis::{CombinedAnalysis, TokenMetrics};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    #[error("Invalid filter configuration '{filter}': {reason}")]
    Configuration { filter: String, reason: String },
}

impl FilterError {
    fn config(filter: &str, reason: impl Into<String>) -> Self {
        FilterError::Configuration {
            filter: filter.to_string(),
            reason: reason.into(),
        }
    }
}

/// Declarative filter as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(rename = "type")]
    pub filter_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

impl FilterSpec {
    /// Threshold filter, e.g. `FilterSpec::value("minLiquidity", 10_000.0)`
    pub fn value(filter_type: &str, value: f64) -> Self {
        Self {
            filter_type: filter_type.to_string(),
            value: Some(value),
            min: None,
            max: None,
            chain: None,
        }
    }

    pub fn range(filter_type: &str, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            filter_type: filter_type.to_string(),
            value: None,
            min,
            max,
            chain: None,
        }
    }

    /// Boolean requirement such as `requireVerified`
    pub fn flag(filter_type: &str) -> Self {
        Self::range(filter_type, None, None)
    }

    pub fn chain(chain: &str) -> Self {
        Self {
            chain: Some(chain.to_string()),
            ..Self::flag("chain")
        }
    }
}

/// Validated filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    MinLiquidity(f64),
    MaxLiquidity(f64),
    MinVolume24h(f64),
    MinMarketCap(f64),
    MaxMarketCap(f64),
    MinHolders(u64),
    MaxTop10HolderPct(f64),
    MinAgeHours(f64),
    MaxAgeHours(f64),
    MaxRiskScore(f64),
    MinOverallScore(f64),
    MinOpportunityScore(f64),
    PriceChangeRange { min: Option<f64>, max: Option<f64> },
    RequireMintRevoked,
    RequireVerified,
    Chain(String),
}

impl Filter {
    /// Validate a spec into a filter
    pub fn from_spec(spec: &FilterSpec) -> Result<Self, FilterError> {
        let name = spec.filter_type.as_str();

        let filter = match name {
            "minLiquidity" => Filter::MinLiquidity(non_negative(spec)?),
            "maxLiquidity" => Filter::MaxLiquidity(non_negative(spec)?),
            "minVolume24h" => Filter::MinVolume24h(non_negative(spec)?),
            "minMarketCap" => Filter::MinMarketCap(non_negative(spec)?),
            "maxMarketCap" => Filter::MaxMarketCap(non_negative(spec)?),
            "minHolders" => {
                let value = non_negative(spec)?;
                if value.fract() != 0.0 {
                    return Err(FilterError::config(name, "holder count must be a whole number"));
                }
                Filter::MinHolders(value as u64)
            }
            "maxTop10HolderPct" => Filter::MaxTop10HolderPct(bounded(spec, 100.0)?),
            "minAgeHours" => Filter::MinAgeHours(non_negative(spec)?),
            "maxAgeHours" => Filter::MaxAgeHours(non_negative(spec)?),
            "maxRiskScore" => Filter::MaxRiskScore(bounded(spec, 100.0)?),
            "minOverallScore" => Filter::MinOverallScore(bounded(spec, 100.0)?),
            "minOpportunityScore" => Filter::MinOpportunityScore(bounded(spec, 100.0)?),
            "priceChangeRange" => {
                let (min, max) = (spec.min, spec.max);
                if min.is_none() && max.is_none() {
                    return Err(FilterError::config(name, "requires `min` and/or `max`"));
                }
                if min.map_or(false, |v| !v.is_finite()) || max.map_or(false, |v| !v.is_finite()) {
                    return Err(FilterError::config(name, "bounds must be finite"));
                }
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi {
                        return Err(FilterError::config(
                            name,
                            format!("min {} is greater than max {}", lo, hi),
                        ));
                    }
                }
                Filter::PriceChangeRange { min, max }
            }
            "requireMintRevoked" => Filter::RequireMintRevoked,
            "requireVerified" => Filter::RequireVerified,
            "chain" => match spec.chain.as_deref().map(str::trim) {
                Some(chain) if !chain.is_empty() => Filter::Chain(chain.to_lowercase()),
                _ => return Err(FilterError::config(name, "requires a non-empty `chain`")),
            },
            other => return Err(FilterError::config(other, "unknown filter type")),
        };

        Ok(filter)
    }

    /// Config name of this filter, used in `failed_filters` and rejection stats
    pub fn type_name(&self) -> &'static str {
        match self {
            Filter::MinLiquidity(_) => "minLiquidity",
            Filter::MaxLiquidity(_) => "maxLiquidity",
            Filter::MinVolume24h(_) => "minVolume24h",
            Filter::MinMarketCap(_) => "minMarketCap",
            Filter::MaxMarketCap(_) => "maxMarketCap",
            Filter::MinHolders(_) => "minHolders",
            Filter::MaxTop10HolderPct(_) => "maxTop10HolderPct",
            Filter::MinAgeHours(_) => "minAgeHours",
            Filter::MaxAgeHours(_) => "maxAgeHours",
            Filter::MaxRiskScore(_) => "maxRiskScore",
            Filter::MinOverallScore(_) => "minOverallScore",
            Filter::MinOpportunityScore(_) => "minOpportunityScore",
            Filter::PriceChangeRange { .. } => "priceChangeRange",
            Filter::RequireMintRevoked => "requireMintRevoked",
            Filter::RequireVerified => "requireVerified",
            Filter::Chain(_) => "chain",
        }
    }

    /// Evaluate against one token
    pub fn matches(&self, m: &TokenMetrics) -> bool {
        match self {
            Filter::MinLiquidity(x) => at_least(m.liquidity_usd, *x),
            Filter::MaxLiquidity(x) => at_most(m.liquidity_usd, *x),
            Filter::MinVolume24h(x) => at_least(m.volume_24h_usd, *x),
            Filter::MinMarketCap(x) => at_least(m.market_cap_usd, *x),
            Filter::MaxMarketCap(x) => at_most(m.market_cap_usd, *x),
            Filter::MinHolders(x) => m.holder_count.map_or(false, |h| h >= *x),
            Filter::MaxTop10HolderPct(x) => at_most(m.top10_holder_pct, *x),
            Filter::MinAgeHours(x) => at_least(m.age_hours, *x),
            Filter::MaxAgeHours(x) => at_most(m.age_hours, *x),
            Filter::MaxRiskScore(x) => m.risk_score <= *x,
            Filter::MinOverallScore(x) => m.overall_score >= *x,
            Filter::MinOpportunityScore(x) => m.opportunity_score >= *x,
            Filter::PriceChangeRange { min, max } => match m.price_change_24h_pct {
                Some(change) => {
                    min.map_or(true, |lo| change >= lo) && max.map_or(true, |hi| change <= hi)
                }
                None => false,
            },
            Filter::RequireMintRevoked => m.mint_authority_revoked == Some(true),
            Filter::RequireVerified => m.verified == Some(true),
            Filter::Chain(chain) => m.chain.eq_ignore_ascii_case(chain),
        }
    }
}

fn required_value(spec: &FilterSpec) -> Result<f64, FilterError> {
    let value = spec
        .value
        .ok_or_else(|| FilterError::config(&spec.filter_type, "missing `value`"))?;
    if !value.is_finite() {
        return Err(FilterError::config(&spec.filter_type, "value must be finite"));
    }
    Ok(value)
}

fn non_negative(spec: &FilterSpec) -> Result<f64, FilterError> {
    let value = required_value(spec)?;
    if value < 0.0 {
        return Err(FilterError::config(
            &spec.filter_type,
            format!("value must be >= 0, got {}", value),
        ));
    }
    Ok(value)
}

fn bounded(spec: &FilterSpec, upper: f64) -> Result<f64, FilterError> {
    let value = non_negative(spec)?;
    if value > upper {
        return Err(FilterError::config(
            &spec.filter_type,
            format!("value must be <= {}, got {}", upper, value),
        ));
    }
    Ok(value)
}

fn at_least(metric: Option<f64>, threshold: f64) -> bool {
    metric.map_or(false, |v| v >= threshold)
}

fn at_most(metric: Option<f64>, threshold: f64) -> bool {
    metric.map_or(false, |v| v <= threshold)
}

/// Anything carrying token metrics can be filtered
pub trait FilterSubject {
    fn metrics(&self) -> &TokenMetrics;
}

impl FilterSubject for TokenMetrics {
    fn metrics(&self) -> &TokenMetrics {
        self
    }
}

impl FilterSubject for CombinedAnalysis {
    fn metrics(&self) -> &TokenMetrics {
        &self.metrics
    }
}

/// Rejection breakdown for a filter run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub original_count: usize,
    pub filtered_count: usize,
    pub rejected_count: usize,
    /// rejected / original, 0 for empty input
    pub rejection_rate: f64,
    /// Filter type -> number of tokens that failed it
    pub rejection_reasons: BTreeMap<String, usize>,
}

/// Filtered tokens with their statistics
#[derive(Debug, Clone)]
pub struct FilteredTokens<T> {
    pub filtered: Vec<T>,
    pub stats: FilterStats,
}

/// A validated conjunctive chain of filters
#[derive(Debug, Clone, Default)]
pub struct FilterPipeline {
    filters: Vec<Filter>,
}

impl FilterPipeline {
    pub fn new(specs: &[FilterSpec]) -> Result<Self, FilterError> {
        let filters = specs.iter().map(Filter::from_spec).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { filters })
    }

    pub fn from_filters(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Type names of every filter the token fails, in chain order
    pub fn failed_filters(&self, metrics: &TokenMetrics) -> Vec<String> {
        self.filters
            .iter()
            .filter(|f| !f.matches(metrics))
            .map(|f| f.type_name().to_string())
            .collect()
    }

    pub fn apply<T: FilterSubject + Clone>(&self, tokens: &[T]) -> Vec<T> {
        tokens
            .iter()
            .filter(|t| self.filters.iter().all(|f| f.matches(t.metrics())))
            .cloned()
            .collect()
    }

    pub fn apply_with_stats<T: FilterSubject + Clone>(&self, tokens: &[T]) -> FilteredTokens<T> {
        let mut filtered = Vec::with_capacity(tokens.len());
        let mut reasons: BTreeMap<String, usize> = BTreeMap::new();

        for token in tokens {
            let failed = self.failed_filters(token.metrics());
            if failed.is_empty() {
                filtered.push(token.clone());
            } else {
                for name in failed {
                    *reasons.entry(name).or_insert(0) += 1;
                }
            }
        }

        let original_count = tokens.len();
        let filtered_count = filtered.len();
        let rejected_count = original_count - filtered_count;
        let rejection_rate = if original_count == 0 {
            0.0
        } else {
            rejected_count as f64 / original_count as f64
        };

        FilteredTokens {
            filtered,
            stats: FilterStats {
                original_count,
                filtered_count,
                rejected_count,
                rejection_rate,
                rejection_reasons: reasons,
            },
        }
    }
}

/// Keep tokens matching a single spec
pub fn apply_filter<T: FilterSubject + Clone>(
    tokens: &[T],
    spec: &FilterSpec,
) -> Result<Vec<T>, FilterError> {
    Ok(FilterPipeline::new(std::slice::from_ref(spec))?.apply(tokens))
}

/// Keep tokens matching every spec (logical AND)
pub fn apply_filter_chain<T: FilterSubject + Clone>(
    tokens: &[T],
    specs: &[FilterSpec],
) -> Result<Vec<T>, FilterError> {
    Ok(FilterPipeline::new(specs)?.apply(tokens))
}

/// Escape hatch for predicates not expressible as a spec
pub fn apply_custom_filter<T, F>(tokens: &[T], predicate: F) -> Vec<T>
where
    T: Clone,
    F: Fn(&T) -> bool,
{
    tokens.iter().filter(|t| predicate(t)).cloned().collect()
}

pub fn apply_filter_with_stats<T: FilterSubject + Clone>(
    tokens: &[T],
    spec: &FilterSpec,
) -> Result<FilteredTokens<T>, FilterError> {
    Ok(FilterPipeline::new(std::slice::from_ref(spec))?.apply_with_stats(tokens))
}

pub fn apply_filter_chain_with_stats<T: FilterSubject + Clone>(
    tokens: &[T],
    specs: &[FilterSpec],
) -> Result<FilteredTokens<T>, FilterError> {
    Ok(FilterPipeline::new(specs)?.apply_with_stats(tokens))
}
