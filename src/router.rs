//! Tier routing.
//!
//! Turns a request into an ordered fallback plan of tiers. A concrete hint
//! starts at that tier and degrades downward; `auto` classifies the prompt.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::traits::{Request, Tier, TierHint};

/// Prompt classification settings.
///
/// Short prompts need no threshold of their own: they start at the balanced
/// tier like any other prompt that is neither long nor complex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterConfig {
    /// Prompts longer than this go to the powerful tier.
    #[serde(alias = "long_prompt_words")]
    pub long_prompt_words: usize,
    /// Words that mark a prompt as complex.
    #[serde(alias = "complex_keywords")]
    pub complex_keywords: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            long_prompt_words: 50,
            complex_keywords: vec![
                "complex".to_string(),
                "detailed".to_string(),
                "analyze".to_string(),
            ],
        }
    }
}

/// Computes fallback plans over the configured tiers.
#[derive(Debug, Clone)]
pub struct TierRouter {
    config: RouterConfig,
    keywords: BTreeSet<String>,
    available: BTreeSet<Tier>,
}

impl TierRouter {
    /// Create a router over the given configured tiers.
    pub fn new(config: RouterConfig, available: impl IntoIterator<Item = Tier>) -> Self {
        let keywords = config
            .complex_keywords
            .iter()
            .map(|k| k.to_lowercase())
            .collect();
        Self {
            config,
            keywords,
            available: available.into_iter().collect(),
        }
    }

    /// Router configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Starting tier for an `auto` prompt.
    pub fn classify(&self, prompt: &str) -> Tier {
        let mut words = 0;
        let mut complex = false;
        for word in prompt.split_whitespace() {
            words += 1;
            if !complex {
                let normalized = word
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase();
                complex = self.keywords.contains(&normalized);
            }
        }

        // No short-prompt rule: it would have to rank below balanced and
        // break monotonicity in prompt length.
        if complex || words > self.config.long_prompt_words {
            Tier::Powerful
        } else {
            Tier::Balanced
        }
    }

    /// Ordered, non-empty, duplicate-free plan of configured tiers.
    pub fn plan(&self, request: &Request) -> Vec<Tier> {
        let start = match request.tier_hint {
            TierHint::Tier(tier) => tier,
            TierHint::Auto => self.classify(&request.prompt),
        };

        let plan: Vec<Tier> = start
            .descending()
            .into_iter()
            .filter(|tier| self.available.contains(tier))
            .collect();

        if !plan.is_empty() {
            return plan;
        }
        self.available
            .iter()
            .next()
            .map(|lowest| vec![*lowest])
            .unwrap_or_else(|| vec![Tier::Fast])
    }
}
