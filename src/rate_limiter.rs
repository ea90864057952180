//! Dual fixed-window rate limiting for provider calls.
//!
//! Two counters are kept, one per minute window and one per hour window.
//! A window's epoch is `floor(now / window)`; when the epoch advances the
//! counter is zeroed before the next acquire looks at it.
//!
//! ```text
//!   WithinBoth ──(minute count hits rpm)──> AtMinuteCap
//!       ^                                       │
//!       └──────────(minute epoch rolls)─────────┘
//!
//!   AtHourCap: absorbing until the hour epoch rolls
//! ```
//!
//! Waiting callers queue on a fair mutex, so callers that start waiting
//! earlier acquire earlier once capacity frees up.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as QueueMutex;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::context::CallContext;
use crate::error::{GatewayError, Result};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Maximum successful acquires per minute window.
    pub requests_per_minute: u32,
    /// Maximum successful acquires per hour window.
    pub requests_per_hour: u32,
    /// Upper bound on cumulative waiting inside one `wait_acquire`.
    pub max_wait: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 3600,
            max_wait: Duration::from_secs(60),
        }
    }
}

impl RateLimiterConfig {
    /// Create a new config with specified limits.
    pub fn new(requests_per_minute: u32, requests_per_hour: u32) -> Self {
        Self {
            requests_per_minute,
            requests_per_hour,
            ..Default::default()
        }
    }

    /// Set the wait bound.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Reject limits that would block forever.
    pub fn validate(&self) -> Result<()> {
        if self.requests_per_minute == 0 || self.requests_per_hour == 0 {
            return Err(GatewayError::Config(
                "rate limits must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a non-blocking acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A slot was taken.
    Granted,
    /// No slot; the earliest acquire can succeed after `retry_after`.
    Denied { retry_after: Duration },
}

impl Admission {
    /// True if a slot was taken.
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted)
    }
}

/// Read-only view of the limiter's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    /// Acquires in the current minute window.
    pub minute_count: u32,
    /// Acquires in the current hour window.
    pub hour_count: u32,
    /// Time until the minute window closes.
    pub minute_reset: Duration,
    /// Time until the hour window closes.
    pub hour_reset: Duration,
}

/// One fixed window.
#[derive(Debug)]
struct Window {
    length: Duration,
    limit: u32,
    epoch: u64,
    count: u32,
}

impl Window {
    fn new(length: Duration, limit: u32) -> Self {
        Self {
            length,
            limit,
            epoch: 0,
            count: 0,
        }
    }

    fn epoch_at(&self, now: Duration) -> u64 {
        (now.as_nanos() / self.length.as_nanos()) as u64
    }

    /// Zero the counter if the epoch advanced.
    fn roll(&mut self, now: Duration) {
        let epoch = self.epoch_at(now);
        if epoch != self.epoch {
            self.epoch = epoch;
            self.count = 0;
        }
    }

    fn is_full(&self) -> bool {
        self.count >= self.limit
    }

    fn count_at(&self, now: Duration) -> u32 {
        if self.epoch_at(now) == self.epoch {
            self.count
        } else {
            0
        }
    }

    fn until_reset(&self, now: Duration) -> Duration {
        let epoch = self.epoch_at(now) as u128;
        let closes_at = (epoch + 1) * self.length.as_nanos();
        let remaining = closes_at.saturating_sub(now.as_nanos());
        Duration::from_nanos(remaining.min(u64::MAX as u128) as u64)
    }
}

#[derive(Debug)]
struct Windows {
    minute: Window,
    hour: Window,
}

/// Dual-window rate limiter.
pub struct RateLimiter {
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
    windows: parking_lot::Mutex<Windows>,
    queue: QueueMutex<()>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration and clock.
    pub fn new(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let mut windows = Windows {
            minute: Window::new(MINUTE, config.requests_per_minute),
            hour: Window::new(HOUR, config.requests_per_hour),
        };
        windows.minute.roll(now);
        windows.hour.roll(now);

        Self {
            config,
            clock,
            windows: parking_lot::Mutex::new(windows),
            queue: QueueMutex::new(()),
        }
    }

    /// Atomic check-and-increment.
    pub fn try_acquire(&self) -> Admission {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        windows.minute.roll(now);
        windows.hour.roll(now);

        let minute_full = windows.minute.is_full();
        let hour_full = windows.hour.is_full();

        if !minute_full && !hour_full {
            windows.minute.count += 1;
            windows.hour.count += 1;
            return Admission::Granted;
        }

        // Earliest moment every capped window has reopened.
        let mut retry_after = Duration::ZERO;
        if minute_full {
            retry_after = retry_after.max(windows.minute.until_reset(now));
        }
        if hour_full {
            retry_after = retry_after.max(windows.hour.until_reset(now));
        }
        Admission::Denied { retry_after }
    }

    /// Wait until a slot is acquired.
    ///
    /// Returns `Cancelled` or `Timeout` if the context fires first, and
    /// `Timeout` once the configured wait bound would be exceeded.
    pub async fn wait_acquire(&self, ctx: &CallContext) -> Result<()> {
        let started = self.clock.now();
        let _turn = ctx.guard(self.queue.lock()).await?;

        loop {
            let retry_after = match self.try_acquire() {
                Admission::Granted => return Ok(()),
                Admission::Denied { retry_after } => retry_after,
            };

            let waited = self.clock.now().saturating_sub(started);
            let remaining = self.config.max_wait.saturating_sub(waited);
            if retry_after > remaining {
                warn!(
                    retry_after_ms = retry_after.as_millis() as u64,
                    waited_ms = waited.as_millis() as u64,
                    "Rate limit wait would exceed bound, giving up"
                );
                return Err(GatewayError::Timeout);
            }

            debug!(
                wait_ms = retry_after.as_millis() as u64,
                "Rate limited: waiting for request slot"
            );
            ctx.guard(self.clock.sleep(retry_after)).await?;
        }
    }

    /// Current counters and time to reset.
    pub fn snapshot(&self) -> RateLimitSnapshot {
        let now = self.clock.now();
        let windows = self.windows.lock();
        RateLimitSnapshot {
            minute_count: windows.minute.count_at(now),
            hour_count: windows.hour.count_at(now),
            minute_reset: windows.minute.until_reset(now),
            hour_reset: windows.hour.until_reset(now),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(rpm: u32, rph: u32, start: Duration) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let limiter = RateLimiter::new(RateLimiterConfig::new(rpm, rph), clock.clone());
        (limiter, clock)
    }

    #[test]
    fn test_rate_limiter_config_default() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.requests_per_minute, 60);
        assert_eq!(config.requests_per_hour, 3600);
        assert_eq!(config.max_wait, Duration::from_secs(60));
    }

    #[test]
    fn test_config_rejects_zero() {
        assert!(RateLimiterConfig::new(0, 10).validate().is_err());
        assert!(RateLimiterConfig::new(10, 0).validate().is_err());
        assert!(RateLimiterConfig::new(1, 1).validate().is_ok());
    }

    #[test]
    fn test_try_acquire_up_to_rpm() {
        let (limiter, _clock) = limiter(2, 100, Duration::from_secs(10));

        assert!(limiter.try_acquire().is_granted());
        assert!(limiter.try_acquire().is_granted());
        assert_eq!(
            limiter.try_acquire(),
            Admission::Denied {
                retry_after: Duration::from_secs(50)
            }
        );
    }

    #[test]
    fn test_minute_rollover_resets() {
        let (limiter, clock) = limiter(1, 100, Duration::from_secs(0));

        assert!(limiter.try_acquire().is_granted());
        assert!(!limiter.try_acquire().is_granted());

        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.snapshot().minute_count, 0);
        assert!(limiter.try_acquire().is_granted());
    }

    #[test]
    fn test_hour_cap_is_absorbing() {
        let (limiter, clock) = limiter(10, 2, Duration::from_secs(0));

        assert!(limiter.try_acquire().is_granted());
        clock.advance(Duration::from_secs(60));
        assert!(limiter.try_acquire().is_granted());

        // New minute, but the hour is spent.
        clock.advance(Duration::from_secs(60));
        match limiter.try_acquire() {
            Admission::Denied { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(3600 - 120));
            }
            Admission::Granted => panic!("hour cap should hold"),
        }

        clock.set(Duration::from_secs(3600));
        assert!(limiter.try_acquire().is_granted());
    }

    #[test]
    fn test_snapshot() {
        let (limiter, _clock) = limiter(5, 50, Duration::from_secs(90));
        limiter.try_acquire();
        limiter.try_acquire();

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.minute_count, 2);
        assert_eq!(snapshot.hour_count, 2);
        assert_eq!(snapshot.minute_reset, Duration::from_secs(30));
        assert_eq!(snapshot.hour_reset, Duration::from_secs(3510));
    }

    #[test]
    fn test_no_window_overshoot() {
        let (limiter, clock) = limiter(3, 1000, Duration::from_secs(0));
        for _ in 0..5 {
            let granted = (0..10).filter(|_| limiter.try_acquire().is_granted()).count();
            assert_eq!(granted, 3);
            clock.advance(Duration::from_secs(60));
        }
        assert_eq!(limiter.snapshot().hour_count, 0);
    }

    #[tokio::test]
    async fn test_wait_acquire_immediate() {
        let (limiter, _clock) = limiter(1, 10, Duration::ZERO);
        limiter.wait_acquire(&CallContext::new()).await.unwrap();
        assert_eq!(limiter.snapshot().minute_count, 1);
    }

    #[tokio::test]
    async fn test_wait_acquire_waits_for_boundary() {
        let clock = Arc::new(ManualClock::auto_advance(Duration::from_secs(30)));
        let limiter = RateLimiter::new(RateLimiterConfig::new(1, 10), clock.clone());

        limiter.wait_acquire(&CallContext::new()).await.unwrap();
        limiter.wait_acquire(&CallContext::new()).await.unwrap();

        assert_eq!(clock.now(), Duration::from_secs(60));
        assert_eq!(limiter.snapshot().minute_count, 1);
    }

    #[tokio::test]
    async fn test_wait_acquire_times_out_on_hour_cap() {
        let clock = Arc::new(ManualClock::auto_advance(Duration::ZERO));
        let limiter = RateLimiter::new(RateLimiterConfig::new(10, 1), clock.clone());

        limiter.wait_acquire(&CallContext::new()).await.unwrap();
        let result = limiter.wait_acquire(&CallContext::new()).await;
        assert!(matches!(result, Err(GatewayError::Timeout)));
        // Gave up without sleeping toward an unreachable slot.
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_wait_acquire_observes_cancel() {
        let (limiter, _clock) = limiter(1, 10, Duration::ZERO);
        assert!(limiter.try_acquire().is_granted());

        let ctx = CallContext::new();
        let token = ctx.token().clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            token.cancel();
        });

        let result = limiter.wait_acquire(&ctx).await;
        assert!(matches!(result, Err(GatewayError::Cancelled)));
    }

    #[tokio::test]
    async fn test_wait_acquire_observes_deadline() {
        let (limiter, _clock) = limiter(1, 10, Duration::ZERO);
        assert!(limiter.try_acquire().is_granted());

        let ctx = CallContext::with_timeout(Duration::from_millis(10));
        let result = limiter.wait_acquire(&ctx).await;
        assert!(matches!(result, Err(GatewayError::Timeout)));
    }

    #[tokio::test]
    async fn test_waiters_served_fifo() {
        let clock = Arc::new(ManualClock::new(Duration::ZERO));
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(1, 100), clock.clone()));
        assert!(limiter.try_acquire().is_granted());

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for id in 0..3 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.wait_acquire(&CallContext::new()).await.unwrap();
                order.lock().push(id);
            }));
            // Let each waiter enqueue before the next one starts.
            for _ in 0..5 {
                tokio::task::yield_now().await;
            }
        }

        for _ in 0..3 {
            clock.advance(Duration::from_secs(60));
            for _ in 0..20 {
                tokio::task::yield_now().await;
            }
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
