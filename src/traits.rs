//! Core gateway types and the provider transport trait.
//!
//! # Key Types
//!
//! - [`Tier`]: one of `fast < balanced < powerful`
//! - [`Request`] / [`Response`]: the public submit contract
//! - [`Transport`]: one provider round-trip for one tier

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ErrorKind, GatewayError, Result};

// ============================================================================
// Tiers
// ============================================================================

/// A named LLM variant with its own cost and capability profile.
///
/// The derived ordering is the capability order: `Fast < Balanced < Powerful`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Cheapest, lowest latency.
    Fast,
    /// Default tier for general prompts.
    Balanced,
    /// Most capable and most expensive.
    Powerful,
}

impl Tier {
    /// All tiers, lowest first.
    pub const ALL: [Tier; 3] = [Tier::Fast, Tier::Balanced, Tier::Powerful];

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Fast => "fast",
            Tier::Balanced => "balanced",
            Tier::Powerful => "powerful",
        }
    }

    /// The next tier down, or `None` for `Fast`.
    pub fn lower(&self) -> Option<Tier> {
        match self {
            Tier::Fast => None,
            Tier::Balanced => Some(Tier::Fast),
            Tier::Powerful => Some(Tier::Balanced),
        }
    }

    /// This tier followed by every lower tier.
    pub fn descending(self) -> Vec<Tier> {
        let mut tiers = vec![self];
        let mut current = self;
        while let Some(next) = current.lower() {
            tiers.push(next);
            current = next;
        }
        tiers
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Tier::Fast),
            "balanced" => Ok(Tier::Balanced),
            "powerful" => Ok(Tier::Powerful),
            other => Err(GatewayError::UnknownTier(other.to_string())),
        }
    }
}

/// Caller preference for which tier serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierHint {
    /// Let the router classify the prompt.
    #[default]
    Auto,
    /// Start at a specific tier and degrade downward.
    Tier(Tier),
}

impl From<Tier> for TierHint {
    fn from(tier: Tier) -> Self {
        TierHint::Tier(tier)
    }
}

impl FromStr for TierHint {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(TierHint::Auto);
        }
        s.parse::<Tier>().map(TierHint::Tier)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Role of a message sent to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instructions (sent as the top-level `system` field).
    System,
    /// End-user content.
    User,
    /// Prior model output.
    Assistant,
}

impl ChatRole {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// A single message in a provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who authored the message.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// Request / Response
// ============================================================================

/// A caller's request to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Prompt text; must be non-empty after trimming.
    pub prompt: String,

    /// Opaque attribution id for token accounting.
    pub task_id: String,

    /// Which tier to start at.
    #[serde(default)]
    pub tier_hint: TierHint,

    /// Output budget; `None` uses the tier's configured default.
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Caller-supplied context, sent as a system message with sorted keys.
    #[serde(default)]
    pub context: BTreeMap<String, String>,

    /// Whether the caller intends to stream the reply.
    #[serde(default)]
    pub stream: bool,

    /// Opt in to similarity cache matches; `None` uses the configured default.
    #[serde(default)]
    pub allow_fuzzy: Option<bool>,
}

impl Request {
    /// Create a request with an `auto` tier hint and the default task id.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            task_id: "default".to_string(),
            tier_hint: TierHint::Auto,
            max_tokens: None,
            context: BTreeMap::new(),
            stream: false,
            allow_fuzzy: None,
        }
    }

    /// Set the task id used for token attribution.
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    /// Set the tier hint.
    pub fn with_tier(mut self, hint: impl Into<TierHint>) -> Self {
        self.tier_hint = hint.into();
        self
    }

    /// Override the output token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Add a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Request a streamed reply.
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Opt in or out of similarity cache matches.
    pub fn with_fuzzy(mut self, allow: bool) -> Self {
        self.allow_fuzzy = Some(allow);
        self
    }

    /// Messages sent to the provider: a context system message (if any)
    /// followed by the user prompt.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if !self.context.is_empty() {
            let rendered = self
                .context
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect::<Vec<_>>()
                .join("\n");
            messages.push(ChatMessage::system(rendered));
        }
        messages.push(ChatMessage::user(self.prompt.clone()));
        messages
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of turn (also used for stop sequences).
    EndTurn,
    /// Hit the output token budget.
    MaxTokens,
    /// The gateway exhausted its plan and returned fallback text.
    ErrorFallback,
}

impl StopReason {
    /// Map a provider `stop_reason` string.
    pub fn from_provider(reason: Option<&str>) -> Self {
        match reason {
            Some("max_tokens") => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        }
    }
}

/// Text returned to callers when every planned tier failed.
pub const FALLBACK_TEXT: &str =
    "LLM service is currently unavailable. Unable to process the request.";

/// The gateway's reply to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Provider message id (or a generated id for degraded replies).
    pub id: String,
    /// Generated text.
    pub text: String,
    /// Tier that produced the text.
    pub tier_used: Tier,
    /// Model that produced the text.
    pub model: String,
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Cost of producing this reply (0 for degraded replies).
    ///
    /// Cache hits carry the stored reply's cost but accrue nothing.
    pub cost_usd: f64,
    /// Served from the response cache.
    pub cache_hit: bool,
    /// Number of provider calls made for this request.
    pub attempts: u32,
    /// Why generation stopped.
    pub stop_reason: StopReason,
    /// Kind of the last error, set on degraded replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Similarity score for fuzzy cache hits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

impl Response {
    /// Create a successful response with zero usage.
    pub fn new(text: impl Into<String>, tier: Tier, model: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            text: text.into(),
            tier_used: tier,
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            cache_hit: false,
            attempts: 0,
            stop_reason: StopReason::EndTurn,
            error_kind: None,
            similarity: None,
        }
    }

    /// Degraded reply after plan exhaustion.
    pub fn degraded(tier: Tier, model: impl Into<String>, attempts: u32, kind: ErrorKind) -> Self {
        Self {
            id: format!("degraded-{}", uuid::Uuid::new_v4()),
            attempts,
            stop_reason: StopReason::ErrorFallback,
            error_kind: Some(kind),
            ..Self::new(FALLBACK_TEXT, tier, model)
        }
    }

    /// Set the response id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set token usage.
    pub fn with_usage(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    /// Set the stop reason.
    pub fn with_stop_reason(mut self, reason: StopReason) -> Self {
        self.stop_reason = reason;
        self
    }

    /// Total tokens used.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// True iff the response carries model output.
    pub fn is_valid(&self) -> bool {
        matches!(self.stop_reason, StopReason::EndTurn | StopReason::MaxTokens)
    }

    /// True if this is a fallback reply.
    pub fn is_degraded(&self) -> bool {
        self.stop_reason == StopReason::ErrorFallback
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Everything a transport needs for one tier attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TierCall {
    /// Tier being attempted.
    pub tier: Tier,
    /// Provider model id for the tier.
    pub model: String,
    /// Output budget.
    pub max_tokens: u32,
    /// Messages in wire order.
    pub messages: Vec<ChatMessage>,
}

/// A successful provider round-trip.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransportReply {
    /// Provider message id.
    pub id: String,
    /// Concatenated text blocks.
    pub text: String,
    /// Model reported by the provider.
    pub model: String,
    /// Raw provider stop reason.
    pub stop_reason: Option<String>,
    /// Prompt tokens, when the provider reported usage.
    pub input_tokens: Option<u64>,
    /// Completion tokens, when the provider reported usage.
    pub output_tokens: Option<u64>,
}

impl TransportReply {
    /// Create a reply with only text set.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stop_reason: Some("end_turn".to_string()),
            ..Default::default()
        }
    }

    /// Set token usage.
    pub fn with_usage(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
        self
    }
}

/// One element of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamChunk {
    /// Incremental text.
    Delta(String),
    /// Terminal marker; nothing follows it.
    Stop(StopReason),
}

/// One HTTP round-trip to the provider for one tier.
///
/// Implementations do not retry and do not consult the cache or limiter;
/// the gateway orchestrates those. Errors are classified as
/// [`GatewayError::Transient`] / [`GatewayError::RateLimited`] (retry) or
/// [`GatewayError::Permanent`] (fall through).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name of this transport, used in logs.
    fn name(&self) -> &str;

    /// Perform a single non-streaming call.
    async fn call(&self, call: &TierCall) -> Result<TransportReply>;

    /// Open a streaming call.
    ///
    /// The stream is lazy, finite and ends with a [`StreamChunk::Stop`].
    /// Dropping it releases the underlying connection.
    async fn stream(&self, call: &TierCall) -> Result<BoxStream<'static, Result<StreamChunk>>>;
}
