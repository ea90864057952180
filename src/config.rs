//! Gateway configuration.
//!
//! Configuration is read from YAML (primary) or TOML. Keys are camelCase;
//! snake_case spellings are accepted as aliases so TOML files can use the
//! conventional style.
//!
//! # Search Order
//!
//! [`GatewayConfig::load`] checks, in order:
//!
//! 1. `EDGEQUAKE_GATEWAY_CONFIG` environment variable
//! 2. `./gateway.yaml`
//! 3. `./gateway.toml`
//! 4. `~/.edgequake/gateway.yaml`
//! 5. Built-in defaults
//!
//! # Example
//!
//! ```yaml
//! tiers:
//!   fast:     {model: "claude-3-haiku-20240307",  maxTokens: 100,  pricePer1K: 0.0015}
//!   balanced: {model: "claude-3-sonnet-20240229", maxTokens: 500,  pricePer1K: 0.003}
//!   powerful: {model: "claude-3-opus-20240229",   maxTokens: 1000, pricePer1K: 0.015}
//! rateLimit: {rpm: 60, rph: 3600}
//! cache:     {maxSize: 1000, ttlSeconds: 3600, fuzzyThreshold: 0.8}
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::cost_tracker::{SuggestionThresholds, TierPricing};
use crate::rate_limiter::RateLimiterConfig;
use crate::retry::BackoffPolicy;
use crate::router::RouterConfig;
use crate::traits::Tier;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "EDGEQUAKE_GATEWAY_CONFIG";

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse YAML or TOML.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// Invalid configuration values.
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Sections
// ============================================================================

/// Model, budget and price for one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierConfig {
    /// Provider model id.
    pub model: String,

    /// Default output budget.
    #[serde(alias = "max_tokens")]
    pub max_tokens: u32,

    /// USD per 1K tokens.
    #[serde(rename = "pricePer1K", alias = "price_per_1k")]
    pub price_per_1k: f64,

    /// Cache TTL override for replies from this tier.
    #[serde(default, alias = "ttl_seconds", skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

impl TierConfig {
    /// Create a tier entry.
    pub fn new(model: impl Into<String>, max_tokens: u32, price_per_1k: f64) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            price_per_1k,
            ttl_seconds: None,
        }
    }

    /// Set a cache TTL override.
    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }
}

/// The tier table. Unlisted tiers are not configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TiersConfig {
    /// Fast tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast: Option<TierConfig>,
    /// Balanced tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balanced: Option<TierConfig>,
    /// Powerful tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub powerful: Option<TierConfig>,
}

impl TiersConfig {
    /// Entry for `tier`, if configured.
    pub fn get(&self, tier: Tier) -> Option<&TierConfig> {
        match tier {
            Tier::Fast => self.fast.as_ref(),
            Tier::Balanced => self.balanced.as_ref(),
            Tier::Powerful => self.powerful.as_ref(),
        }
    }

    /// Set the entry for `tier`.
    pub fn set(&mut self, tier: Tier, config: TierConfig) {
        let slot = match tier {
            Tier::Fast => &mut self.fast,
            Tier::Balanced => &mut self.balanced,
            Tier::Powerful => &mut self.powerful,
        };
        *slot = Some(config);
    }

    /// Configured tiers, lowest first.
    pub fn iter(&self) -> impl Iterator<Item = (Tier, &TierConfig)> {
        Tier::ALL
            .into_iter()
            .filter_map(move |tier| self.get(tier).map(|c| (tier, c)))
    }
}

/// Rate limit section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitSettings {
    /// Requests per rolling minute window.
    pub rpm: u32,
    /// Requests per rolling hour window.
    pub rph: u32,
    /// Longest a caller waits for a slot.
    #[serde(alias = "max_wait_seconds")]
    pub max_wait_seconds: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            rpm: 60,
            rph: 3600,
            max_wait_seconds: 60,
        }
    }
}

/// Cache section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Maximum number of cached replies.
    #[serde(alias = "max_size")]
    pub max_size: usize,
    /// Default entry lifetime.
    #[serde(alias = "ttl_seconds")]
    pub ttl_seconds: u64,
    /// Minimum similarity for fuzzy hits.
    #[serde(alias = "fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    /// Whether requests that don't say otherwise may use fuzzy hits.
    #[serde(alias = "fuzzy_by_default")]
    pub fuzzy_by_default: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_seconds: 3600,
            fuzzy_threshold: 0.8,
            fuzzy_by_default: false,
        }
    }
}

/// Retry section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Calls per tier, including the first.
    #[serde(alias = "max_attempts_per_tier")]
    pub max_attempts_per_tier: u32,
    /// Backoff base in milliseconds.
    #[serde(alias = "base_ms")]
    pub base_ms: u64,
    /// Backoff cap in milliseconds.
    #[serde(alias = "cap_ms")]
    pub cap_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts_per_tier: 3,
            base_ms: 500,
            cap_ms: 8000,
        }
    }
}

/// Prompt limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptSettings {
    /// Largest accepted prompt, in counted tokens.
    #[serde(alias = "max_tokens")]
    pub max_tokens: usize,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            max_tokens: 200_000,
        }
    }
}

// ============================================================================
// GatewayConfig
// ============================================================================

/// Complete gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Tier table.
    #[serde(default = "TiersConfig::builtin")]
    pub tiers: TiersConfig,

    /// Rate limits.
    #[serde(default, alias = "rate_limit")]
    pub rate_limit: RateLimitSettings,

    /// Response cache.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Same-tier retries.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Prompt limits.
    #[serde(default)]
    pub prompt: PromptSettings,

    /// Prompt classification.
    #[serde(default)]
    pub router: RouterConfig,

    /// Cost suggestion thresholds.
    #[serde(default)]
    pub cost: SuggestionThresholds,
}

impl TiersConfig {
    fn builtin() -> Self {
        Self {
            fast: Some(TierConfig::new("claude-3-haiku-20240307", 100, 0.0015)),
            balanced: Some(TierConfig::new("claude-3-sonnet-20240229", 500, 0.003)),
            powerful: Some(TierConfig::new("claude-3-opus-20240229", 1000, 0.015)),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::builtin_defaults()
    }
}

impl GatewayConfig {
    /// Built-in configuration with the three Claude 3 tiers.
    pub fn builtin_defaults() -> Self {
        Self {
            tiers: TiersConfig::builtin(),
            rate_limit: RateLimitSettings::default(),
            cache: CacheSettings::default(),
            retry: RetrySettings::default(),
            prompt: PromptSettings::default(),
            router: RouterConfig::default(),
            cost: SuggestionThresholds::default(),
        }
    }

    /// Load configuration from the default locations.
    pub fn load() -> ConfigResult<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if Path::new(&path).exists() {
                tracing::debug!(path = %path, "Loading gateway config from environment");
                return Self::from_file(&path);
            }
            tracing::warn!(path = %path, "Gateway config path from environment does not exist");
        }

        for local in ["gateway.yaml", "gateway.toml"] {
            let local_path = Path::new(local);
            if local_path.exists() {
                return Self::from_file(local_path);
            }
        }

        if let Some(home) = dirs::home_dir() {
            let user_path = home.join(".edgequake").join("gateway.yaml");
            if user_path.exists() {
                return Self::from_file(&user_path);
            }
        }

        Ok(Self::builtin_defaults())
    }

    /// Load configuration from a file, choosing the format by extension.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse and validate YAML.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate TOML.
    pub fn from_toml(toml_str: &str) -> ConfigResult<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check value ranges and cross-field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.tiers.iter().next().is_none() {
            return Err(ConfigError::Validation(
                "at least one tier must be configured".to_string(),
            ));
        }
        for (tier, entry) in self.tiers.iter() {
            if entry.model.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "tiers.{}.model must not be empty",
                    tier
                )));
            }
            if entry.max_tokens == 0 {
                return Err(ConfigError::Validation(format!(
                    "tiers.{}.maxTokens must be positive",
                    tier
                )));
            }
            if !entry.price_per_1k.is_finite() || entry.price_per_1k < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "tiers.{}.pricePer1K must be a non-negative number",
                    tier
                )));
            }
        }
        if self.rate_limit.rpm == 0 || self.rate_limit.rph == 0 {
            return Err(ConfigError::Validation(
                "rateLimit.rpm and rateLimit.rph must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cache.fuzzy_threshold) {
            return Err(ConfigError::Validation(format!(
                "cache.fuzzyThreshold must be within [0, 1], got {}",
                self.cache.fuzzy_threshold
            )));
        }
        if self.retry.max_attempts_per_tier == 0 {
            return Err(ConfigError::Validation(
                "retry.maxAttemptsPerTier must be at least 1".to_string(),
            ));
        }
        if self.retry.base_ms > self.retry.cap_ms {
            return Err(ConfigError::Validation(format!(
                "retry.baseMs ({}) exceeds retry.capMs ({})",
                self.retry.base_ms, self.retry.cap_ms
            )));
        }
        if self.prompt.max_tokens == 0 {
            return Err(ConfigError::Validation(
                "prompt.maxTokens must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Limiter settings.
    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig::new(self.rate_limit.rpm, self.rate_limit.rph)
            .with_max_wait(Duration::from_secs(self.rate_limit.max_wait_seconds))
    }

    /// Cache settings.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(self.cache.max_size)
            .with_ttl(Duration::from_secs(self.cache.ttl_seconds))
            .with_fuzzy_threshold(self.cache.fuzzy_threshold)
    }

    /// Cache TTL for replies from `tier`.
    pub fn ttl_for(&self, tier: Tier) -> Duration {
        let seconds = self
            .tiers
            .get(tier)
            .and_then(|t| t.ttl_seconds)
            .unwrap_or(self.cache.ttl_seconds);
        Duration::from_secs(seconds)
    }

    /// Same-tier backoff policy.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.retry.base_ms),
            Duration::from_millis(self.retry.cap_ms),
            self.retry.max_attempts_per_tier,
        )
    }

    /// Price table for configured tiers.
    pub fn pricing(&self) -> Vec<(Tier, TierPricing)> {
        self.tiers
            .iter()
            .map(|(tier, c)| (tier, TierPricing::new(c.price_per_1k)))
            .collect()
    }

    /// Configured tiers, lowest first.
    pub fn configured_tiers(&self) -> Vec<Tier> {
        self.tiers.iter().map(|(tier, _)| tier).collect()
    }

    /// Replace one tier entry.
    pub fn with_tier(mut self, tier: Tier, config: TierConfig) -> Self {
        self.tiers.set(tier, config);
        self
    }

    /// Set the rate limits.
    pub fn with_rate_limit(mut self, rpm: u32, rph: u32) -> Self {
        self.rate_limit.rpm = rpm;
        self.rate_limit.rph = rph;
        self
    }

    /// Set the fuzzy threshold.
    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.cache.fuzzy_threshold = threshold;
        self
    }
}
