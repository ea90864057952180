//! The gateway: routing, caching, rate limiting, retry and fallback.
//!
//! # Request Flow
//!
//! ```text
//! submit(ctx, request)
//!   │
//!   ├─ validate ──────────────── Validation / TokenLimitExceeded
//!   ├─ plan (router) ─────────── [start tier, lower tiers...]
//!   ├─ cache (exact, fuzzy) ──── hit: return, no limiter, no accrual
//!   │
//!   └─ for tier in plan:
//!        ├─ limiter.wait_acquire ─ Timeout / Cancelled
//!        ├─ transport.call ─────── guarded by ctx
//!        │    ├─ ok ─────────────── account, cache, return
//!        │    ├─ validation 4xx ─── return Validation
//!        │    ├─ transient ──────── backoff, same tier (bounded)
//!        │    └─ permanent ──────── next tier
//!        └─ ...
//!   plan exhausted ───────────── degraded reply (never cached)
//! ```

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{fingerprint, CacheStats, ResponseCache};
use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::context::CallContext;
use crate::cost_tracker::CostModel;
use crate::error::{ErrorKind, GatewayError, Result, RetryStrategy};
use crate::ledger::{LedgerSnapshot, UsageLedger};
use crate::providers::AnthropicTransport;
use crate::rate_limiter::{RateLimitSnapshot, RateLimiter};
use crate::retry::BackoffPolicy;
use crate::router::TierRouter;
use crate::token_tracker::{TaskTokens, TokenTracker};
use crate::tokenizer::count_tokens;
use crate::traits::{
    ChatMessage, Request, Response, StopReason, StreamChunk, Tier, TierCall, Transport,
    TransportReply,
};

/// Aggregated usage, suitable for dashboards and logs.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    /// Per-tier call outcomes and request counters.
    pub ledger: LedgerSnapshot,
    /// Cache counters.
    pub cache: CacheStats,
    /// Current rate-limit windows.
    pub rate_limit: RateLimitSnapshot,
    /// Total spend (USD).
    pub total_cost: f64,
    /// Tokens attributed across all tasks.
    pub total_tokens: u64,
    /// Tokens per caller-supplied task id.
    pub by_task: BTreeMap<String, TaskTokens>,
    /// Cost optimization advice.
    pub suggestions: Vec<String>,
}

/// What to do after a failed tier attempt.
enum Next {
    Retry,
    Fallback,
    Fail(GatewayError),
}

/// Cache coordinates of a request.
struct CacheKey {
    key: String,
    scope: String,
    similarity_key: String,
    ttl: Duration,
}

/// Tiered LLM gateway.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Gateway {
    config: GatewayConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    router: TierRouter,
    limiter: RateLimiter,
    cache: ResponseCache<Response>,
    cost: Arc<CostModel>,
    tokens: Arc<TokenTracker>,
    ledger: Arc<UsageLedger>,
    backoff: BackoffPolicy,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("transport", &self.transport.name())
            .field("tiers", &self.config.configured_tiers())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Create a gateway on the system clock.
    pub fn new(config: GatewayConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_clock(config, transport, SystemClock::shared())
    }

    /// Create a gateway on an explicit clock.
    pub fn with_clock(
        config: GatewayConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let router = TierRouter::new(config.router.clone(), config.configured_tiers());
        let limiter = RateLimiter::new(config.rate_limiter_config(), clock.clone());
        let cache = ResponseCache::new(config.cache_config(), clock.clone());
        let cost = CostModel::new(config.pricing())
            .with_thresholds(config.cost)
            .with_models(config.tiers.iter().map(|(t, c)| (t, c.model.clone())));
        let backoff = config.backoff_policy();

        Ok(Self {
            config,
            transport,
            clock,
            router,
            limiter,
            cache,
            cost: Arc::new(cost),
            tokens: Arc::new(TokenTracker::new()),
            ledger: Arc::new(UsageLedger::new()),
            backoff,
        })
    }

    /// Build a gateway from `ANTHROPIC_*` variables and [`GatewayConfig::load`].
    pub fn from_env() -> Result<Self> {
        let config = GatewayConfig::load()?;
        let transport = AnthropicTransport::from_env()?;
        Self::new(config, Arc::new(transport))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Active configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Spend per tier.
    pub fn cost_model(&self) -> &CostModel {
        &self.cost
    }

    /// Tokens per task.
    pub fn token_tracker(&self) -> &TokenTracker {
        &self.tokens
    }

    /// Response cache.
    pub fn cache(&self) -> &ResponseCache<Response> {
        &self.cache
    }

    /// Rate limiter.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Usage ledger.
    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Tier router.
    pub fn router(&self) -> &TierRouter {
        &self.router
    }

    // ========================================================================
    // Submit
    // ========================================================================

    /// Serve a request from the cache or the provider.
    ///
    /// Returns `Ok` with a degraded reply when every planned tier failed, and
    /// `Err` for validation failures, cancellation and deadline expiry.
    #[instrument(skip(self, ctx, request), fields(task_id = %request.task_id))]
    pub async fn submit(&self, ctx: &CallContext, request: Request) -> Result<Response> {
        self.validate(&request)?;
        ctx.check()?;
        self.ledger.record_request();

        let plan = self.plan(&request)?;
        let messages = request.messages();
        let lookup = self.cache_key(plan[0], &request, &messages)?;

        if let Some(hit) = self.lookup_cache(&request, &lookup).await {
            return Ok(hit);
        }

        let mut attempts = 0u32;
        let mut last_call: Option<TierCall> = None;
        let mut last_kind = ErrorKind::Unavailable;

        for &tier in &plan {
            let call = self.tier_call(tier, &request, &messages)?;
            let mut tier_attempts = 0u32;

            loop {
                self.limiter.wait_acquire(ctx).await?;
                tier_attempts += 1;
                attempts += 1;

                let started = self.clock.now();
                let err = match ctx.guard(self.transport.call(&call)).await? {
                    Ok(reply) => {
                        let response =
                            self.account(&request.task_id, &call, reply, attempts, started)?;
                        if attempts > 1 {
                            info!(tier = %tier, attempts, "Request succeeded after retries");
                        }
                        self.cache
                            .put_scoped(
                                lookup.key,
                                lookup.scope,
                                lookup.similarity_key,
                                response.clone(),
                                self.config.ttl_for(tier),
                            )
                            .await;
                        return Ok(response);
                    }
                    Err(err) => err,
                };

                last_kind = err.kind();
                match self.on_failure(tier, tier_attempts, err) {
                    Next::Retry => {
                        self.backoff
                            .wait(self.clock.as_ref(), ctx, tier_attempts)
                            .await?;
                    }
                    Next::Fallback => {
                        last_call = Some(call.clone());
                        break;
                    }
                    Next::Fail(err) => return Err(err),
                }
            }
        }

        Ok(self.degrade(last_call, attempts, last_kind))
    }

    /// Open a streamed reply.
    ///
    /// Fallback applies only to opening the stream; once chunks flow there is
    /// no mid-stream fallback. Streamed replies are not cached.
    #[instrument(skip(self, ctx, request), fields(task_id = %request.task_id))]
    pub async fn submit_stream(
        &self,
        ctx: &CallContext,
        request: Request,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        self.validate(&request)?;
        ctx.check()?;
        self.ledger.record_request();

        let plan = self.plan(&request)?;
        let messages = request.messages();
        let mut attempts = 0u32;
        let mut last_call: Option<TierCall> = None;
        let mut last_kind = ErrorKind::Unavailable;

        for &tier in &plan {
            let call = self.tier_call(tier, &request, &messages)?;
            let mut tier_attempts = 0u32;

            loop {
                self.limiter.wait_acquire(ctx).await?;
                tier_attempts += 1;
                attempts += 1;

                let started = self.clock.now();
                match ctx.guard(self.transport.stream(&call)).await? {
                    Ok(inner) => {
                        debug!(tier = %tier, attempts, "Stream opened");
                        return Ok(self.account_stream(ctx, &request.task_id, call, inner, started));
                    }
                    Err(err) => {
                        last_kind = err.kind();
                        match self.on_failure(tier, tier_attempts, err) {
                            Next::Retry => {
                                self.backoff
                                    .wait(self.clock.as_ref(), ctx, tier_attempts)
                                    .await?;
                            }
                            Next::Fallback => {
                                last_call = Some(call.clone());
                                break;
                            }
                            Next::Fail(err) => return Err(err),
                        }
                    }
                }
            }
        }

        let degraded = self.degrade(last_call, attempts, last_kind);
        let chunks = vec![
            Ok(StreamChunk::Delta(degraded.text)),
            Ok(StreamChunk::Stop(StopReason::ErrorFallback)),
        ];
        Ok(futures::stream::iter(chunks).boxed())
    }

    // ========================================================================
    // Reporting and cache management
    // ========================================================================

    /// Aggregated usage across every component.
    pub async fn usage_report(&self) -> UsageReport {
        UsageReport {
            ledger: self.ledger.snapshot(),
            cache: self.cache.stats().await,
            rate_limit: self.limiter.snapshot(),
            total_cost: self.cost.total_cost(),
            total_tokens: self.tokens.total(),
            by_task: self.tokens.tasks(),
            suggestions: self.cost.suggest(),
        }
    }

    /// Store `response` as the cached reply for `request`.
    pub async fn warm_cache(&self, request: &Request, response: Response) -> Result<()> {
        self.validate(request)?;
        let plan = self.plan(request)?;
        let lookup = self.cache_key(plan[0], request, &request.messages())?;
        self.cache
            .put_scoped(
                lookup.key,
                lookup.scope,
                lookup.similarity_key,
                response,
                lookup.ttl,
            )
            .await;
        Ok(())
    }

    /// Drop every cached reply.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn validate(&self, request: &Request) -> Result<()> {
        if request.prompt.trim().is_empty() {
            return Err(GatewayError::Validation("prompt is empty".to_string()));
        }
        let got = count_tokens(&request.prompt);
        let max = self.config.prompt.max_tokens;
        if got > max {
            return Err(GatewayError::TokenLimitExceeded { max, got });
        }
        if request.max_tokens == Some(0) {
            return Err(GatewayError::Validation(
                "max_tokens must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn plan(&self, request: &Request) -> Result<Vec<Tier>> {
        let plan = self.router.plan(request);
        if plan.is_empty() {
            error!("Router produced an empty plan");
            return Err(GatewayError::Unavailable(
                "no tier available for request".to_string(),
            ));
        }
        Ok(plan)
    }

    fn tier_call(&self, tier: Tier, request: &Request, messages: &[ChatMessage]) -> Result<TierCall> {
        let tier_config = self
            .config
            .tiers
            .get(tier)
            .ok_or_else(|| GatewayError::UnknownTier(tier.to_string()))?;
        Ok(TierCall {
            tier,
            model: tier_config.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(tier_config.max_tokens),
            messages: messages.to_vec(),
        })
    }

    fn cache_key(&self, tier: Tier, request: &Request, messages: &[ChatMessage]) -> Result<CacheKey> {
        let call = self.tier_call(tier, request, messages)?;
        Ok(CacheKey {
            key: fingerprint(call.tier, &call.model, call.max_tokens, &call.messages),
            scope: format!("{}|{}|{}", call.tier, call.model, call.max_tokens),
            similarity_key: call
                .messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            ttl: self.config.ttl_for(tier),
        })
    }

    async fn lookup_cache(&self, request: &Request, lookup: &CacheKey) -> Option<Response> {
        if let Some(cached) = self.cache.get(&lookup.key).await {
            debug!("Exact cache hit");
            self.ledger.record_cache_hit();
            return Some(Self::as_cache_hit(cached, None));
        }

        let allow_fuzzy = request
            .allow_fuzzy
            .unwrap_or(self.config.cache.fuzzy_by_default);
        if !allow_fuzzy {
            return None;
        }

        let threshold = self.config.cache.fuzzy_threshold;
        let (cached, score) = self
            .cache
            .get_fuzzy_scoped(&lookup.scope, &lookup.similarity_key, threshold)
            .await?;
        debug!(similarity = score, "Fuzzy cache hit");
        self.ledger.record_cache_hit();
        Some(Self::as_cache_hit(cached, Some(score)))
    }

    fn as_cache_hit(mut response: Response, similarity: Option<f64>) -> Response {
        response.cache_hit = true;
        response.attempts = 0;
        response.similarity = similarity;
        response
    }

    fn on_failure(&self, tier: Tier, tier_attempts: u32, err: GatewayError) -> Next {
        self.ledger.record_failure(tier);

        if let GatewayError::Permanent {
            validation: true, ..
        } = &err
        {
            warn!(tier = %tier, error = %err, "Provider rejected the request");
            return Next::Fail(GatewayError::Validation(err.to_string()));
        }

        match err.retry_strategy() {
            RetryStrategy::ExponentialBackoff { .. } if self.backoff.allows_retry(tier_attempts) => {
                warn!(
                    tier = %tier,
                    attempt = tier_attempts,
                    max_attempts = self.backoff.max_attempts,
                    error = %err,
                    "Transient failure, retrying same tier"
                );
                Next::Retry
            }
            RetryStrategy::Abort => Next::Fail(err),
            _ => {
                warn!(tier = %tier, attempts = tier_attempts, error = %err, "Falling back to next tier");
                Next::Fallback
            }
        }
    }

    fn account(
        &self,
        task_id: &str,
        call: &TierCall,
        reply: TransportReply,
        attempts: u32,
        started: Duration,
    ) -> Result<Response> {
        let input = reply
            .input_tokens
            .unwrap_or_else(|| estimate_input_tokens(&call.messages));
        let output = reply
            .output_tokens
            .unwrap_or_else(|| count_tokens(&reply.text) as u64);
        let cost = self.cost.record(call.tier, input + output)?;
        let latency = self.clock.now().saturating_sub(started);

        self.tokens.record(task_id, input, output);
        self.ledger
            .record_success(call.tier, input, output, cost, latency);

        let model = if reply.model.is_empty() {
            call.model.clone()
        } else {
            reply.model
        };
        let mut response = Response::new(reply.text, call.tier, model)
            .with_id(reply.id)
            .with_usage(input, output)
            .with_stop_reason(StopReason::from_provider(reply.stop_reason.as_deref()));
        response.cost_usd = cost;
        response.attempts = attempts;
        Ok(response)
    }

    fn account_stream(
        &self,
        ctx: &CallContext,
        task_id: &str,
        call: TierCall,
        mut inner: BoxStream<'static, Result<StreamChunk>>,
        started: Duration,
    ) -> BoxStream<'static, Result<StreamChunk>> {
        let ctx = ctx.clone();
        let task_id = task_id.to_string();
        let clock = self.clock.clone();
        let cost = self.cost.clone();
        let tokens = self.tokens.clone();
        let ledger = self.ledger.clone();
        let input = estimate_input_tokens(&call.messages);
        let tier = call.tier;

        let stream = async_stream::stream! {
            let mut text = String::new();
            loop {
                let next = match ctx.guard(inner.next()).await {
                    Ok(next) => next,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                match next {
                    Some(Ok(StreamChunk::Delta(delta))) => {
                        text.push_str(&delta);
                        yield Ok(StreamChunk::Delta(delta));
                    }
                    Some(Ok(StreamChunk::Stop(reason))) => {
                        let output = count_tokens(&text) as u64;
                        let spent = match cost.record(tier, input + output) {
                            Ok(spent) => spent,
                            Err(err) => {
                                warn!(error = %err, "Failed to price streamed reply");
                                0.0
                            }
                        };
                        tokens.record(&task_id, input, output);
                        ledger.record_success(
                            tier,
                            input,
                            output,
                            spent,
                            clock.now().saturating_sub(started),
                        );
                        yield Ok(StreamChunk::Stop(reason));
                        return;
                    }
                    Some(Err(err)) => {
                        ledger.record_failure(tier);
                        yield Err(err);
                        return;
                    }
                    None => {
                        ledger.record_failure(tier);
                        yield Err(GatewayError::transient("stream ended without a stop marker"));
                        return;
                    }
                }
            }
        };
        stream.boxed()
    }

    fn degrade(
        &self,
        last_call: Option<TierCall>,
        attempts: u32,
        kind: ErrorKind,
    ) -> Response {
        self.ledger.record_degraded();
        let (tier, model) = match last_call {
            Some(call) => (call.tier, call.model),
            None => (Tier::Fast, String::new()),
        };
        error!(
            tier = %tier,
            attempts,
            kind = %kind,
            "All tiers failed, returning fallback reply"
        );
        Response::degraded(tier, model, attempts, kind)
    }
}

/// Counted tokens across every message sent to the provider.
fn estimate_input_tokens(messages: &[ChatMessage]) -> u64 {
    messages
        .iter()
        .map(|m| count_tokens(&m.content) as u64)
        .sum()
}
