//! Response caching with TTL expiry, LRU bounding and similarity lookup.
//!
//! Three policies compose:
//!
//! - **TTL**: each entry carries `expires_at`; expired entries are never
//!   returned and are dropped on the access that finds them.
//! - **LRU**: inserting into a full cache evicts exactly one entry, the least
//!   recently used.
//! - **Similarity fallback**: on an exact miss, callers may scan live entries
//!   for the closest key above a threshold.
//!
//! Similarity is `1 - levenshtein(a, b) / (len(a) + len(b))` over characters.
//! It is symmetric, lies in `[0, 1]` and is `1.0` only for equal strings, so a
//! threshold of `1.0` behaves as exact-only.
//!
//! Fuzzy lookups snapshot candidates under the lock and score them after
//! releasing it. Scoring stops as soon as a candidate cannot reach the
//! threshold, and large scans run on the blocking pool.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

use crate::clock::Clock;
use crate::traits::{ChatMessage, Tier};

/// Configuration for the response cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_entries: usize,
    /// Default time-to-live for cache entries.
    pub ttl: Duration,
    /// Minimum similarity for fuzzy hits.
    pub fuzzy_threshold: f64,
}

/// Distance-matrix cells scored inline before moving to the blocking pool.
const INLINE_SCORING_CELLS: usize = 1 << 20;

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            ttl: Duration::from_secs(3600), // 1 hour
            fuzzy_threshold: 0.8,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with specified max entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Default::default()
        }
    }

    /// Set the default TTL for cache entries.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the fuzzy-match threshold, clamped to `[0, 1]`.
    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold.clamp(0.0, 1.0);
        self
    }
}

/// A cached entry with metadata.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    scope: String,
    similarity_key: Arc<str>,
    similarity_len: usize,
    created_at: Duration,
    expires_at: Duration,
    last_access: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Duration) -> bool {
        now >= self.expires_at
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Exact hits.
    pub hits: u64,
    /// Similarity hits.
    pub fuzzy_hits: u64,
    /// Lookups that returned nothing.
    pub misses: u64,
    /// Current number of entries.
    pub entries: usize,
    /// Entries removed to respect the size bound (or by `clear`).
    pub evictions: u64,
    /// Entries removed because their TTL passed.
    pub expirations: u64,
}

impl CacheStats {
    /// Get the cache hit rate, counting fuzzy hits as hits.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits + self.fuzzy_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    tick: u64,
    stats: CacheStats,
}

impl<V: Clone> CacheState<V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_lru(&mut self) {
        if let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&key);
            self.stats.evictions += 1;
        }
    }
}

/// In-memory response cache keyed by fingerprint.
pub struct ResponseCache<V> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState<V>>,
}

impl<V: Clone + Send> ResponseCache<V> {
    /// Create a new cache with the given configuration and clock.
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                tick: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Insert or overwrite `key`; the key doubles as its similarity key.
    pub async fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let similarity_key = key.clone();
        self.put_scoped(key, "", similarity_key, value, ttl).await;
    }

    /// Insert or overwrite `key` with an explicit fuzzy scope and similarity key.
    ///
    /// Fuzzy lookups only compare entries within the same scope.
    pub async fn put_scoped(
        &self,
        key: impl Into<String>,
        scope: impl Into<String>,
        similarity_key: impl Into<String>,
        value: V,
        ttl: Duration,
    ) {
        if self.config.max_entries == 0 {
            return;
        }
        let key = key.into();
        let similarity_key: String = similarity_key.into();
        let similarity_key: Arc<str> = Arc::from(similarity_key);
        let similarity_len = similarity_key.chars().count();
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if !state.entries.contains_key(&key) && state.entries.len() >= self.config.max_entries {
            state.evict_lru();
        }

        let tick = state.next_tick();
        state.entries.insert(
            key,
            CacheEntry {
                value,
                scope: scope.into(),
                similarity_key,
                similarity_len,
                created_at: now,
                expires_at: now.saturating_add(ttl),
                last_access: tick,
            },
        );
    }

    /// Exact lookup. A hit becomes the most recently used entry.
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let tick = state.next_tick();

        let expired = match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_access = tick;
                let value = entry.value.clone();
                state.stats.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.remove(key);
            state.stats.expirations += 1;
        }
        state.stats.misses += 1;
        None
    }

    /// Similarity lookup against entries stored with [`ResponseCache::put`].
    pub async fn get_fuzzy(&self, key: &str, threshold: f64) -> Option<(V, f64)> {
        self.get_fuzzy_scoped("", key, threshold).await
    }

    /// Similarity lookup within `scope`.
    ///
    /// Returns the best live entry whose score is at least `threshold`,
    /// preferring the most recently used on ties, and promotes it. An entry
    /// that expires or is overwritten while candidates are scored is a miss.
    pub async fn get_fuzzy_scoped(
        &self,
        scope: &str,
        similarity_key: &str,
        threshold: f64,
    ) -> Option<(V, f64)> {
        if similarity_key.is_empty() {
            return None;
        }
        let query: Vec<char> = similarity_key.chars().collect();

        let candidates: Vec<Candidate> = {
            let now = self.clock.now();
            let state = self.state.lock().await;
            state
                .entries
                .iter()
                .filter(|(_, entry)| {
                    entry.scope == scope
                        && !entry.is_expired(now)
                        && entry.similarity_len > 0
                        && similarity_upper_bound(query.len(), entry.similarity_len) >= threshold
                })
                .map(|(key, entry)| Candidate {
                    key: key.clone(),
                    similarity_key: entry.similarity_key.clone(),
                    len: entry.similarity_len,
                    last_access: entry.last_access,
                })
                .collect()
        };

        let cells: usize = candidates
            .iter()
            .map(|c| query.len().saturating_mul(c.len))
            .fold(0, usize::saturating_add);
        let best = if cells <= INLINE_SCORING_CELLS {
            best_match(&query, candidates, threshold)
        } else {
            tokio::task::spawn_blocking(move || best_match(&query, candidates, threshold))
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Fuzzy scoring task failed");
                    None
                })
        };

        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let tick = state.next_tick();
        let hit = match best {
            Some((candidate, score)) => match state.entries.get_mut(&candidate.key) {
                Some(entry)
                    if !entry.is_expired(now)
                        && Arc::ptr_eq(&entry.similarity_key, &candidate.similarity_key) =>
                {
                    entry.last_access = tick;
                    Some((entry.value.clone(), score))
                }
                _ => None,
            },
            None => None,
        };
        if hit.is_some() {
            state.stats.fuzzy_hits += 1;
        } else {
            state.stats.misses += 1;
        }
        hit
    }

    /// Remove `key` if present.
    pub async fn remove(&self, key: &str) -> Option<V> {
        self.state.lock().await.entries.remove(key).map(|e| e.value)
    }

    /// Drop every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - state.entries.len();
        state.stats.expirations += removed as u64;
        removed
    }

    /// Clear all cache entries.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        let evicted = state.entries.len() as u64;
        state.entries.clear();
        state.stats.evictions += evicted;
    }

    /// Number of stored entries (including not-yet-purged expired ones).
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// True if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Age of an entry, if present.
    pub async fn age(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        state
            .entries
            .get(key)
            .map(|entry| now.saturating_sub(entry.created_at))
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            entries: state.entries.len(),
            ..state.stats
        }
    }
}

// ============================================================================
// Similarity
// ============================================================================

/// Normalized edit similarity between two strings.
///
/// ```
/// use edgequake_gateway::cache::similarity;
///
/// let score = similarity("hello_world", "hello_earth");
/// assert!((score - 0.8181).abs() < 1e-3);
/// assert_eq!(similarity("same", "same"), 1.0);
/// ```
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / total as f64
}

/// An entry snapshotted for scoring outside the cache lock.
struct Candidate {
    key: String,
    similarity_key: Arc<str>,
    len: usize,
    last_access: u64,
}

/// Highest-scoring candidate at or above `threshold`; ties go to the most
/// recently used.
fn best_match(
    query: &[char],
    candidates: Vec<Candidate>,
    threshold: f64,
) -> Option<(Candidate, f64)> {
    let mut best: Option<(Candidate, f64)> = None;
    for candidate in candidates {
        let floor = best.as_ref().map(|(_, s)| *s).unwrap_or(threshold);
        if similarity_upper_bound(query.len(), candidate.len) < floor {
            continue;
        }
        let total = query.len() + candidate.len;
        // Rounded up so a score exactly at the floor is never pruned.
        let max_dist = ((1.0 - floor) * total as f64).ceil() as usize;
        let other: Vec<char> = candidate.similarity_key.chars().collect();
        let distance = match levenshtein_within(query, &other, max_dist) {
            Some(distance) => distance,
            None => continue,
        };
        let score = 1.0 - distance as f64 / total as f64;
        if score < threshold {
            continue;
        }
        let better = match &best {
            None => true,
            Some((current, best_score)) => {
                score > *best_score
                    || (score == *best_score && candidate.last_access > current.last_access)
            }
        };
        if better {
            best = Some((candidate, score));
        }
    }
    best
}

/// Best possible score given only lengths; the distance is at least their difference.
fn similarity_upper_bound(len_a: usize, len_b: usize) -> f64 {
    let total = len_a + len_b;
    if total == 0 {
        return 1.0;
    }
    1.0 - len_a.abs_diff(len_b) as f64 / total as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Edit distance if it is at most `max_dist`, else `None`.
///
/// Only the diagonal band of width `2 * max_dist + 1` is filled, and the scan
/// stops on the first row whose minimum already exceeds `max_dist`, so the
/// cost is `O(len(a) * max_dist)` at worst.
fn levenshtein_within(a: &[char], b: &[char], max_dist: usize) -> Option<usize> {
    if a.len().abs_diff(b.len()) > max_dist {
        return None;
    }
    if a.is_empty() || b.is_empty() {
        return Some(a.len().max(b.len()));
    }
    // Anything above `max_dist` is clamped here; cells outside the band hold it.
    let over = max_dist + 1;
    let mut prev: Vec<usize> = (0..=b.len()).map(|j| j.min(over)).collect();
    let mut curr = vec![over; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        let row = i + 1;
        let lo = row.saturating_sub(max_dist).max(1);
        let hi = (row + max_dist).min(b.len());

        curr[0] = row.min(over);
        curr[lo - 1] = if lo == 1 { curr[0] } else { over };
        let mut row_min = curr[lo - 1];
        for j in lo..=hi {
            let substitution = prev[j - 1] + usize::from(*ca != b[j - 1]);
            let cell = substitution.min(prev[j] + 1).min(curr[j - 1] + 1).min(over);
            curr[j] = cell;
            row_min = row_min.min(cell);
        }
        if hi < b.len() {
            curr[hi + 1] = over;
        }
        if row_min > max_dist {
            return None;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let distance = prev[b.len()];
    (distance <= max_dist).then_some(distance)
}

// ============================================================================
// Fingerprint
// ============================================================================

/// Stable digest of the provider-visible fields of a tier call.
///
/// Fields are length-prefixed so no concatenation of distinct inputs can
/// collide, and each message is encoded as JSON with its fields sorted by name.
pub fn fingerprint(tier: Tier, model: &str, max_tokens: u32, messages: &[ChatMessage]) -> String {
    let mut hasher = Sha256::new();
    let mut field = |bytes: &[u8]| {
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(bytes);
    };

    field(tier.as_str().as_bytes());
    field(model.as_bytes());
    field(max_tokens.to_string().as_bytes());
    for message in messages {
        field(canonical_message(message).as_bytes());
    }

    hex::encode(hasher.finalize())
}

fn canonical_message(message: &ChatMessage) -> String {
    // serde_json::Map is ordered by key, giving a deterministic encoding.
    let mut map = serde_json::Map::new();
    map.insert(
        "content".to_string(),
        serde_json::Value::String(message.content.clone()),
    );
    map.insert(
        "role".to_string(),
        serde_json::Value::String(message.role.as_str().to_string()),
    );
    serde_json::Value::Object(map).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const TTL: Duration = Duration::from_secs(60);

    fn cache(max_entries: usize) -> (ResponseCache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Duration::ZERO));
        let cache = ResponseCache::new(CacheConfig::new(max_entries), clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.ttl, Duration::from_secs(3600));
        assert_eq!(config.fuzzy_threshold, 0.8);
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new(500)
            .with_ttl(Duration::from_secs(600))
            .with_fuzzy_threshold(1.5);

        assert_eq!(config.max_entries, 500);
        assert_eq!(config.ttl, Duration::from_secs(600));
        assert_eq!(config.fuzzy_threshold, 1.0);
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let (cache, _clock) = cache(10);
        assert!(cache.get("missing").await.is_none());
        assert_eq!(cache.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn test_cache_hit() {
        let (cache, _clock) = cache(10);
        cache.put("k", "v".to_string(), TTL).await;

        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (cache, _clock) = cache(10);
        cache.put("k", "old".to_string(), TTL).await;
        cache.put("k", "new".to_string(), TTL).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("new"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_deleted() {
        let (cache, clock) = cache(10);
        cache.put("k", "v".to_string(), TTL).await;

        clock.advance(TTL);
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.len().await, 0);
        assert_eq!(cache.stats().await.expirations, 1);
    }

    #[tokio::test]
    async fn test_lru_evicts_exactly_one() {
        let (cache, _clock) = cache(2);
        cache.put("a", "1".to_string(), TTL).await;
        cache.put("b", "2".to_string(), TTL).await;

        // Touch "a" so "b" is least recently used.
        assert!(cache.get("a").await.is_some());
        cache.put("c", "3".to_string(), TTL).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("c").await.is_some());
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_size_bound_holds() {
        let (cache, _clock) = cache(5);
        for i in 0..50 {
            cache.put(format!("key-{}", i), i.to_string(), TTL).await;
            assert!(cache.len().await <= 5);
        }
        assert_eq!(cache.stats().await.evictions, 45);
    }

    #[tokio::test]
    async fn test_fuzzy_match_threshold() {
        let (cache, _clock) = cache(10);
        cache.put("hello_world", "V".to_string(), TTL).await;

        let (value, score) = cache.get_fuzzy("hello_earth", 0.8).await.unwrap();
        assert_eq!(value, "V");
        assert!((score - 0.818).abs() < 1e-3);

        assert!(cache.get_fuzzy("hello_earth", 0.9).await.is_none());
    }

    #[tokio::test]
    async fn test_fuzzy_threshold_one_is_exact_only() {
        let (cache, _clock) = cache(10);
        cache.put("hello_world", "V".to_string(), TTL).await;

        assert!(cache.get_fuzzy("hello_worle", 1.0).await.is_none());
        let (_, score) = cache.get_fuzzy("hello_world", 1.0).await.unwrap();
        assert_eq!(score, 1.0);
    }

    #[tokio::test]
    async fn test_fuzzy_empty_key_never_matches() {
        let (cache, _clock) = cache(10);
        cache.put("", "empty".to_string(), TTL).await;
        cache.put("x", "x".to_string(), TTL).await;

        assert!(cache.get_fuzzy("", 0.0).await.is_none());
        // An empty stored key is never a fuzzy candidate either.
        let (value, _) = cache.get_fuzzy("y", 0.0).await.unwrap();
        assert_eq!(value, "x");
    }

    #[tokio::test]
    async fn test_fuzzy_ties_prefer_most_recent() {
        let (cache, _clock) = cache(10);
        cache.put("abcd", "first".to_string(), TTL).await;
        cache.put("abce", "second".to_string(), TTL).await;

        // "abcx" is equally far from both; "abce" is the most recent.
        let (value, _) = cache.get_fuzzy("abcx", 0.5).await.unwrap();
        assert_eq!(value, "second");

        // Promote "abcd" and the tie flips.
        assert!(cache.get("abcd").await.is_some());
        let (value, _) = cache.get_fuzzy("abcx", 0.5).await.unwrap();
        assert_eq!(value, "first");
    }

    #[tokio::test]
    async fn test_fuzzy_skips_expired() {
        let (cache, clock) = cache(10);
        cache.put("hello_world", "V".to_string(), TTL).await;
        clock.advance(TTL + Duration::from_secs(1));

        assert!(cache.get_fuzzy("hello_world", 0.5).await.is_none());
    }

    #[tokio::test]
    async fn test_fuzzy_scopes_are_isolated() {
        let (cache, _clock) = cache(10);
        cache
            .put_scoped("k1", "balanced", "summarize the report", "B".to_string(), TTL)
            .await;

        assert!(cache
            .get_fuzzy_scoped("fast", "summarize the reports", 0.8)
            .await
            .is_none());
        let (value, _) = cache
            .get_fuzzy_scoped("balanced", "summarize the reports", 0.8)
            .await
            .unwrap();
        assert_eq!(value, "B");
    }

    #[tokio::test]
    async fn test_fuzzy_large_keys() {
        let (cache, _clock) = cache(10);
        let words = |seed: usize| -> String {
            (0..800).map(|i| format!("{}-{} ", seed, i)).collect()
        };
        for seed in 0..4 {
            cache.put(words(seed), format!("v{}", seed), TTL).await;
        }
        let stored = words(2);
        assert!(stored.len() > 4000);

        // One edited word near the end still clears a tight threshold.
        let mut near = stored.clone();
        near.replace_range(stored.len() - 4.., "x1 ");
        let (value, score) = cache.get_fuzzy(&near, 0.95).await.unwrap();
        assert_eq!(value, "v2");
        assert!(score > 0.99);

        // A query sharing nothing with any key is rejected without a full scan.
        let unrelated = "z".repeat(stored.len());
        assert!(cache.get_fuzzy(&unrelated, 0.8).await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.fuzzy_hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_purge_and_clear() {
        let (cache, clock) = cache(10);
        cache.put("short", "1".to_string(), Duration::from_secs(1)).await;
        cache.put("long", "2".to_string(), Duration::from_secs(100)).await;

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.age("long").await, Some(Duration::from_secs(2)));

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[test]
    fn test_hit_rate() {
        let mut stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);

        stats.hits = 2;
        stats.fuzzy_hits = 1;
        stats.misses = 1;
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn test_similarity_properties() {
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.5);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("", "abc"), 0.0);
        assert_eq!(
            similarity("kitten", "sitting"),
            similarity("sitting", "kitten")
        );
        assert!(similarity("abc", "abd") < 1.0);
    }

    #[test]
    fn test_bounded_levenshtein_agrees_within_bound() {
        let pairs = [
            ("kitten", "sitting"),
            ("", "abc"),
            ("abc", ""),
            ("flaw", "lawn"),
            ("hello_world", "hello_earth"),
            ("abcdef", "abcdef"),
            ("short", "a much longer string"),
        ];
        for (a, b) in pairs {
            let a: Vec<char> = a.chars().collect();
            let b: Vec<char> = b.chars().collect();
            let exact = levenshtein(&a, &b);
            for max_dist in 0..=exact + 2 {
                let bounded = levenshtein_within(&a, &b, max_dist);
                if exact <= max_dist {
                    assert_eq!(bounded, Some(exact), "{:?} {:?} {}", a, b, max_dist);
                } else {
                    assert_eq!(bounded, None, "{:?} {:?} {}", a, b, max_dist);
                }
            }
        }
    }

    #[test]
    fn test_bounded_levenshtein_stops_early() {
        let a = vec!['a'; 50_000];
        let b = vec!['b'; 50_000];
        // Every row minimum passes the bound after a handful of rows.
        assert_eq!(levenshtein_within(&a, &b, 3), None);
        assert_eq!(levenshtein_within(&a, &a, 3), Some(0));
    }

    #[test]
    fn test_fingerprint_stable() {
        let messages = vec![ChatMessage::user("Hi")];
        let a = fingerprint(Tier::Balanced, "sonnet", 500, &messages);
        let b = fingerprint(Tier::Balanced, "sonnet", 500, &messages.clone());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_sensitive_to_wire_fields() {
        let messages = vec![ChatMessage::user("Hi")];
        let base = fingerprint(Tier::Balanced, "sonnet", 500, &messages);

        assert_ne!(base, fingerprint(Tier::Fast, "sonnet", 500, &messages));
        assert_ne!(base, fingerprint(Tier::Balanced, "haiku", 500, &messages));
        assert_ne!(base, fingerprint(Tier::Balanced, "sonnet", 501, &messages));
        assert_ne!(
            base,
            fingerprint(Tier::Balanced, "sonnet", 500, &[ChatMessage::assistant("Hi")])
        );
        assert_ne!(
            base,
            fingerprint(Tier::Balanced, "sonnet", 500, &[ChatMessage::user("Hi ")])
        );
    }

    #[test]
    fn test_fingerprint_no_concatenation_collision() {
        let a = fingerprint(
            Tier::Fast,
            "m",
            1,
            &[ChatMessage::user("ab"), ChatMessage::user("c")],
        );
        let b = fingerprint(
            Tier::Fast,
            "m",
            1,
            &[ChatMessage::user("a"), ChatMessage::user("bc")],
        );
        assert_ne!(a, b);
    }
}
