//! EdgeQuake Gateway - Tiered LLM Access Layer
//!
//! A library that sits between application code and an LLM provider and
//! decides, per request, which model tier serves it, whether a cached reply
//! can be reused, how to stay within rate limits, and how to retry or degrade
//! when the provider fails.
//!
//! # Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`clock`] | Injectable monotonic time and sleep |
//! | [`tokenizer`] | Whitespace token counting |
//! | [`rate_limiter`] | Minute/hour fixed windows with FIFO waiting |
//! | [`cache`] | TTL + LRU response cache with similarity fallback |
//! | [`cost_tracker`] | Per-tier pricing, spend tally and suggestions |
//! | [`token_tracker`] | Per-task token attribution |
//! | [`router`] | Request to ordered tier plan |
//! | [`providers`] | Anthropic HTTP transport and a scripted mock |
//! | [`gateway`] | Orchestration of all of the above |
//!
//! # Example
//!
//! ```ignore
//! use edgequake_gateway::{CallContext, Gateway, Request, Tier};
//!
//! let gateway = Gateway::from_env()?;
//! let response = gateway
//!     .submit(&CallContext::new(), Request::new("Summarize this report").with_tier(Tier::Balanced))
//!     .await?;
//! println!("{} (tier: {})", response.text, response.tier_used);
//! ```
//!
//! # See Also
//!
//! - [`crate::traits`] for request, response and transport types
//! - [`crate::config`] for the configuration file format

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod cost_tracker;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod providers;
pub mod rate_limiter;
pub mod retry;
pub mod router;
pub mod token_tracker;
pub mod tokenizer;
pub mod traits;

pub use cache::{fingerprint, similarity, CacheConfig, CacheStats, ResponseCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, GatewayConfig, TierConfig};
pub use context::CallContext;
pub use cost_tracker::{format_cost, format_tokens, CostModel, CostSummary, TierPricing};
pub use error::{ErrorKind, GatewayError, Result, RetryStrategy};
pub use gateway::{Gateway, UsageReport};
pub use ledger::{LedgerSnapshot, TierUsage, UsageLedger};
pub use providers::{AnthropicTransport, MockTransport};
pub use rate_limiter::{Admission, RateLimitSnapshot, RateLimiter, RateLimiterConfig};
pub use retry::BackoffPolicy;
pub use router::{RouterConfig, TierRouter};
pub use token_tracker::{TaskTokens, TokenTracker};
pub use tokenizer::{count_tokens, Tokenizer, DEFAULT_MAX_PROMPT_WORDS};
pub use traits::{
    ChatMessage, ChatRole, Request, Response, StopReason, StreamChunk, Tier, TierCall, TierHint,
    Transport, TransportReply, FALLBACK_TEXT,
};
