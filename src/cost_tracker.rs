//! Tier Cost Model
//!
//! Prices token usage per tier and keeps a running tally of spend.
//!
//! # Overview
//!
//! Each configured tier has a single blended price per 1K tokens. The model
//! accumulates cost and tokens per tier, and derives advisory suggestions from
//! the spend distribution.
//!
//! # Usage
//!
//! ```rust
//! use edgequake_gateway::cost_tracker::{CostModel, TierPricing};
//! use edgequake_gateway::Tier;
//!
//! let model = CostModel::new([
//!     (Tier::Fast, TierPricing::new(0.0015)),
//!     (Tier::Balanced, TierPricing::new(0.003)),
//! ]);
//!
//! let cost = model.record(Tier::Balanced, 1000).unwrap();
//! assert!((cost - 0.003).abs() < 1e-12);
//! assert!((model.total_cost() - 0.003).abs() < 1e-12);
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{GatewayError, Result};
use crate::traits::Tier;

/// Pricing information for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPricing {
    /// Cost per 1K tokens (USD), input and output combined.
    pub price_per_1k: f64,
}

impl TierPricing {
    /// Create pricing from a per-1K-token price.
    pub fn new(price_per_1k: f64) -> Self {
        Self { price_per_1k }
    }

    /// Calculate cost for a token count.
    pub fn calculate_cost(&self, tokens: u64) -> f64 {
        (tokens as f64 / 1000.0) * self.price_per_1k
    }
}

/// Spend-share thresholds used by [`CostModel::suggest`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SuggestionThresholds {
    /// Share of spend on the powerful tier above which a downgrade is suggested.
    #[serde(alias = "powerful_share")]
    pub powerful_share: f64,
    /// Share of spend on the balanced tier above which a downgrade is suggested.
    #[serde(alias = "balanced_share")]
    pub balanced_share: f64,
}

impl Default for SuggestionThresholds {
    fn default() -> Self {
        Self {
            powerful_share: 0.5,
            balanced_share: 0.7,
        }
    }
}

/// Summary of costs so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    /// Total cost in USD.
    pub total_cost: f64,

    /// Total tokens priced.
    pub total_tokens: u64,

    /// Number of recorded calls.
    pub call_count: u64,

    /// Average cost per call.
    pub avg_cost_per_call: f64,

    /// Cost breakdown by tier.
    pub by_tier: BTreeMap<Tier, f64>,

    /// Token breakdown by tier.
    pub tokens_by_tier: BTreeMap<Tier, u64>,
}

#[derive(Debug, Default)]
struct Tally {
    cost: BTreeMap<Tier, f64>,
    tokens: BTreeMap<Tier, u64>,
    calls: u64,
}

/// Per-tier pricing and running spend.
#[derive(Debug)]
pub struct CostModel {
    pricing: BTreeMap<Tier, TierPricing>,
    models: BTreeMap<Tier, String>,
    thresholds: SuggestionThresholds,
    tally: Mutex<Tally>,
}

impl CostModel {
    /// Create a cost model from a tier price table.
    pub fn new(pricing: impl IntoIterator<Item = (Tier, TierPricing)>) -> Self {
        Self {
            pricing: pricing.into_iter().collect(),
            models: BTreeMap::new(),
            thresholds: SuggestionThresholds::default(),
            tally: Mutex::new(Tally::default()),
        }
    }

    /// Set suggestion thresholds.
    pub fn with_thresholds(mut self, thresholds: SuggestionThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Attach model names so suggestions can name the cheaper model.
    pub fn with_models(mut self, models: impl IntoIterator<Item = (Tier, String)>) -> Self {
        self.models = models.into_iter().collect();
        self
    }

    /// Pricing for a tier.
    pub fn pricing(&self, tier: Tier) -> Option<&TierPricing> {
        self.pricing.get(&tier)
    }

    /// Cost of `tokens` on `tier` without recording it.
    pub fn cost(&self, tier: Tier, tokens: u64) -> Result<f64> {
        self.pricing
            .get(&tier)
            .map(|p| p.calculate_cost(tokens))
            .ok_or_else(|| GatewayError::UnknownTier(tier.to_string()))
    }

    /// Price `tokens` on `tier` and add it to the tally.
    pub fn record(&self, tier: Tier, tokens: u64) -> Result<f64> {
        let cost = self.cost(tier, tokens)?;
        let mut tally = self.tally.lock();
        *tally.cost.entry(tier).or_default() += cost;
        *tally.tokens.entry(tier).or_default() += tokens;
        tally.calls += 1;
        Ok(cost)
    }

    /// Total cost so far.
    pub fn total_cost(&self) -> f64 {
        self.tally.lock().cost.values().sum()
    }

    /// Cost so far per tier.
    pub fn per_tier(&self) -> BTreeMap<Tier, f64> {
        self.tally.lock().cost.clone()
    }

    /// Tokens priced so far per tier.
    pub fn tokens_per_tier(&self) -> BTreeMap<Tier, u64> {
        self.tally.lock().tokens.clone()
    }

    /// What `tokens` would cost on each configured tier.
    pub fn compare_tiers(&self, tokens: u64) -> BTreeMap<Tier, f64> {
        self.pricing
            .iter()
            .map(|(tier, p)| (*tier, p.calculate_cost(tokens)))
            .collect()
    }

    /// Quality score per dollar; infinite when the call is free.
    pub fn cost_effectiveness(&self, tier: Tier, tokens: u64, score: f64) -> Result<f64> {
        let cost = self.cost(tier, tokens)?;
        if cost == 0.0 {
            return Ok(f64::INFINITY);
        }
        Ok(score / cost)
    }

    /// Advisory messages derived from the spend distribution.
    pub fn suggest(&self) -> Vec<String> {
        let per_tier = self.per_tier();
        let total: f64 = per_tier.values().sum();
        if total <= 0.0 {
            return vec!["Not enough data to suggest optimizations.".to_string()];
        }

        let share = |tier: Tier| per_tier.get(&tier).copied().unwrap_or(0.0) / total;
        let mut suggestions = Vec::new();

        if share(Tier::Powerful) > self.thresholds.powerful_share {
            suggestions.push(format!(
                "Consider using the balanced tier{} for less complex tasks to reduce costs.",
                self.model_suffix(Tier::Balanced)
            ));
        }
        if share(Tier::Balanced) > self.thresholds.balanced_share {
            suggestions.push(format!(
                "Consider using the fast tier{} for simple tasks to reduce costs.",
                self.model_suffix(Tier::Fast)
            ));
        }
        if suggestions.is_empty() {
            suggestions.push("Current tier usage distribution seems optimal.".to_string());
        }
        suggestions
    }

    fn model_suffix(&self, tier: Tier) -> String {
        self.models
            .get(&tier)
            .map(|m| format!(" ({})", m))
            .unwrap_or_default()
    }

    /// Get summary statistics.
    pub fn summary(&self) -> CostSummary {
        let tally = self.tally.lock();
        let total_cost: f64 = tally.cost.values().sum();
        CostSummary {
            total_cost,
            total_tokens: tally.tokens.values().sum(),
            call_count: tally.calls,
            avg_cost_per_call: if tally.calls > 0 {
                total_cost / tally.calls as f64
            } else {
                0.0
            },
            by_tier: tally.cost.clone(),
            tokens_by_tier: tally.tokens.clone(),
        }
    }

    /// Clear the tally; pricing is kept.
    pub fn reset(&self) {
        *self.tally.lock() = Tally::default();
    }
}

/// Format cost in a human-readable way.
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        format!("${:.4}", cost)
    } else if cost < 1.0 {
        format!("${:.3}", cost)
    } else {
        format!("${:.2}", cost)
    }
}

/// Format token count with K/M suffixes.
pub fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}K", tokens as f64 / 1_000.0)
    } else {
        format!("{}", tokens)
    }
}
