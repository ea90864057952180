//! Same-tier retry backoff.
//!
//! Transient provider failures are retried on the same tier with capped
//! exponential backoff and full jitter: the delay before retry `n` is drawn
//! uniformly from `[0, min(cap, base * 2^(n-1))]`.
//!
//! Sleeps run on the gateway [`Clock`] and are guarded by the caller's
//! [`CallContext`], so cancellation interrupts a pending backoff.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::clock::Clock;
use crate::context::CallContext;
use crate::error::{Result, RetryStrategy};

/// Backoff parameters for same-tier retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Upper bound of the first retry delay.
    pub base_delay: Duration,
    /// Upper bound of any retry delay.
    pub max_delay: Duration,
    /// Maximum calls on one tier, including the first.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy.
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Backoff parameters carried by `strategy`, if it retries the same tier.
    pub fn from_strategy(strategy: &RetryStrategy) -> Option<Self> {
        match strategy {
            RetryStrategy::ExponentialBackoff {
                base_delay,
                max_delay,
                max_attempts,
            } => Some(Self::new(*base_delay, *max_delay, *max_attempts)),
            _ => None,
        }
    }

    /// True if another call on the same tier is allowed after `attempts` calls.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Exponential ceiling for retry `attempt` (1-based), capped at `max_delay`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Full-jitter delay for retry `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if ceiling.is_zero() {
            return Duration::ZERO;
        }
        let millis = rand::thread_rng().gen_range(0..=ceiling.as_millis() as u64);
        Duration::from_millis(millis)
    }

    /// Sleep before retry `attempt` on `clock`, observing `ctx`.
    pub async fn wait(&self, clock: &dyn Clock, ctx: &CallContext, attempt: u32) -> Result<Duration> {
        let delay = self.delay_for_attempt(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
        ctx.guard(clock.sleep(delay)).await?;
        Ok(delay)
    }
}
