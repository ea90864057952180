//! Injectable time source.
//!
//! Every time-dependent component (rate limiter, cache, gateway backoff) reads
//! time through [`Clock`] instead of the system clock, so tests can drive time
//! forward with [`ManualClock`] without sleeping.
//!
//! ```text
//!   SystemClock  ── now(): UNIX offset at start + Instant::elapsed()
//!                └─ sleep(): tokio::time::sleep
//!
//!   ManualClock  ── now(): value set by advance()/set()
//!                └─ sleep(): parks until advance() passes the deadline
//!                            (or jumps immediately in auto-advance mode)
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

/// Monotonic time source shared by the gateway's components.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's fixed origin. Never decreases.
    fn now(&self) -> Duration;

    /// Suspend the caller for `duration` of this clock's time.
    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by `std::time::Instant` and tokio timers.
///
/// The origin is the UNIX epoch as observed at construction, so minute and
/// hour windows computed from [`Clock::now`] line up with wall-clock windows.
#[derive(Debug, Clone)]
pub struct SystemClock {
    started: Instant,
    offset: Duration,
}

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        let offset = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            started: Instant::now(),
            offset,
        }
    }

    /// Shared handle, the form components take.
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.offset + self.started.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// In-memory clock for tests.
///
/// Time only moves when [`ManualClock::advance`] or [`ManualClock::set`] is
/// called, or, in auto-advance mode, when somebody sleeps.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    auto_advance: bool,
    ticks: Notify,
}

impl ManualClock {
    /// Create a manual clock starting at `start`.
    pub fn new(start: Duration) -> Self {
        Self {
            now: Mutex::new(start),
            auto_advance: false,
            ticks: Notify::new(),
        }
    }

    /// Create a manual clock whose `sleep` advances time and returns at once.
    pub fn auto_advance(start: Duration) -> Self {
        Self {
            auto_advance: true,
            ..Self::new(start)
        }
    }

    /// Move the clock forward and wake sleepers whose deadline has passed.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
        self.ticks.notify_waiters();
    }

    /// Jump to an absolute time. Earlier values are ignored.
    pub fn set(&self, to: Duration) {
        {
            let mut now = self.now.lock();
            if to > *now {
                *now = to;
            }
        }
        self.ticks.notify_waiters();
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        if self.auto_advance {
            self.advance(duration);
            tokio::task::yield_now().await;
            return;
        }

        let deadline = self.now() + duration;
        loop {
            let notified = self.ticks.notified();
            tokio::pin!(notified);
            // Register before re-checking so an advance() in between is not lost.
            notified.as_mut().enable();
            if self.now() >= deadline {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        // Aligned to the UNIX epoch, so well past 2020.
        assert!(a > Duration::from_secs(1_577_836_800));
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(Duration::from_secs(10));
        assert_eq!(clock.now(), Duration::from_secs(10));

        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now(), Duration::from_millis(10_500));
    }

    #[test]
    fn test_manual_clock_set_never_goes_back() {
        let clock = ManualClock::new(Duration::from_secs(100));
        clock.set(Duration::from_secs(50));
        assert_eq!(clock.now(), Duration::from_secs(100));

        clock.set(Duration::from_secs(120));
        assert_eq!(clock.now(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_manual_clock_sleep_wakes_on_advance() {
        let clock = Arc::new(ManualClock::new(Duration::ZERO));
        let sleeper = {
            let clock = clock.clone();
            tokio::spawn(async move {
                clock.sleep(Duration::from_secs(5)).await;
                clock.now()
            })
        };

        tokio::task::yield_now().await;
        clock.advance(Duration::from_secs(2));
        tokio::task::yield_now().await;
        assert!(!sleeper.is_finished());

        clock.advance(Duration::from_secs(3));
        let woke_at = sleeper.await.unwrap();
        assert_eq!(woke_at, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_manual_clock_zero_sleep_returns() {
        let clock = ManualClock::new(Duration::from_secs(1));
        clock.sleep(Duration::ZERO).await;
        assert_eq!(clock.now(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_auto_advance_sleep() {
        let clock = ManualClock::auto_advance(Duration::ZERO);
        clock.sleep(Duration::from_secs(30)).await;
        clock.sleep(Duration::from_secs(30)).await;
        assert_eq!(clock.now(), Duration::from_secs(60));
    }
}
