//! Usage ledger.
//!
//! Per-tier call outcomes, token usage, cost and latency, plus request-level
//! counters. The ledger only accumulates; [`UsageLedger::snapshot`] produces a
//! serializable view for usage reports.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::traits::Tier;

/// Accumulated usage for one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TierUsage {
    /// Provider calls issued on this tier.
    pub calls: u64,
    /// Calls that produced a reply.
    pub successes: u64,
    /// Calls that failed.
    pub failures: u64,
    /// Prompt tokens billed.
    pub input_tokens: u64,
    /// Completion tokens billed.
    pub output_tokens: u64,
    /// Cost billed (USD).
    pub cost: f64,
    /// Sum of successful call latencies.
    pub total_latency_ms: u64,
}

impl TierUsage {
    /// Mean latency of successful calls.
    pub fn average_latency_ms(&self) -> f64 {
        if self.successes == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.successes as f64
        }
    }
}

/// Point-in-time view of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Requests accepted by `submit` / `submit_stream`.
    pub requests: u64,
    /// Requests served from the cache.
    pub cache_hits: u64,
    /// Requests answered with the fallback reply.
    pub degraded: u64,
    /// Usage per tier.
    pub by_tier: BTreeMap<Tier, TierUsage>,
}

impl LedgerSnapshot {
    /// Total provider calls.
    pub fn total_calls(&self) -> u64 {
        self.by_tier.values().map(|u| u.calls).sum()
    }

    /// Total failed provider calls.
    pub fn total_failures(&self) -> u64 {
        self.by_tier.values().map(|u| u.failures).sum()
    }

    /// Total successful provider calls.
    pub fn total_successes(&self) -> u64 {
        self.by_tier.values().map(|u| u.successes).sum()
    }
}

/// Thread-safe usage ledger.
#[derive(Debug, Default)]
pub struct UsageLedger {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    degraded: AtomicU64,
    tiers: Mutex<BTreeMap<Tier, TierUsage>>,
}

impl UsageLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an accepted request.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a cache hit.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a degraded reply.
    pub fn record_degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful provider call.
    pub fn record_success(
        &self,
        tier: Tier,
        input_tokens: u64,
        output_tokens: u64,
        cost: f64,
        latency: Duration,
    ) {
        let mut tiers = self.tiers.lock();
        let usage = tiers.entry(tier).or_default();
        usage.calls += 1;
        usage.successes += 1;
        usage.input_tokens += input_tokens;
        usage.output_tokens += output_tokens;
        usage.cost += cost;
        usage.total_latency_ms += latency.as_millis() as u64;
    }

    /// Record a failed provider call.
    pub fn record_failure(&self, tier: Tier) {
        let mut tiers = self.tiers.lock();
        let usage = tiers.entry(tier).or_default();
        usage.calls += 1;
        usage.failures += 1;
    }

    /// Usage for one tier.
    pub fn tier(&self, tier: Tier) -> TierUsage {
        self.tiers.lock().get(&tier).copied().unwrap_or_default()
    }

    /// Serializable view of everything recorded so far.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            by_tier: self.tiers.lock().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_and_failure() {
        let ledger = UsageLedger::new();
        ledger.record_failure(Tier::Powerful);
        ledger.record_failure(Tier::Powerful);
        ledger.record_success(Tier::Balanced, 10, 20, 0.09, Duration::from_millis(120));

        let powerful = ledger.tier(Tier::Powerful);
        assert_eq!(powerful.calls, 2);
        assert_eq!(powerful.failures, 2);
        assert_eq!(powerful.successes, 0);

        let balanced = ledger.tier(Tier::Balanced);
        assert_eq!(balanced.successes, 1);
        assert_eq!(balanced.input_tokens, 10);
        assert_eq!(balanced.output_tokens, 20);
        assert_eq!(balanced.average_latency_ms(), 120.0);
    }

    #[test]
    fn test_snapshot_totals() {
        let ledger = UsageLedger::new();
        ledger.record_request();
        ledger.record_request();
        ledger.record_cache_hit();
        ledger.record_degraded();
        ledger.record_failure(Tier::Fast);
        ledger.record_success(Tier::Fast, 1, 1, 0.0, Duration::ZERO);

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.degraded, 1);
        assert_eq!(snapshot.total_calls(), 2);
        assert_eq!(snapshot.total_failures(), 1);
        assert_eq!(snapshot.total_successes(), 1);
    }

    #[test]
    fn test_snapshot_serialization() {
        let ledger = UsageLedger::new();
        ledger.record_failure(Tier::Balanced);
        let json = serde_json::to_value(ledger.snapshot()).unwrap();
        assert_eq!(json["by_tier"]["balanced"]["failures"], 1);
        assert_eq!(json["requests"], 0);
    }

    #[test]
    fn test_average_latency_without_successes() {
        assert_eq!(TierUsage::default().average_latency_ms(), 0.0);
    }
}
