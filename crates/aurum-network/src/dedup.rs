// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - BROADCAST DEDUPLICATION
//
// Time-limited LRU over content hashes. A hash counts as seen while it is
// both resident in the LRU and younger than the TTL, which is what stops
// gossip loops without suppressing legitimate re-announcements forever.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use lru::LruCache;
use std::num::NonZeroUsize;

/// Minimum per-kind capacity required by the gossip protocol
pub const DEDUP_CAPACITY: usize = 4_096;

/// Entries older than this no longer count as duplicates (10 minutes)
pub const DEDUP_TTL_MS: u64 = 600_000;

pub struct DedupCache {
    entries: LruCache<String, u64>,
    ttl_ms: u64,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::with_capacity(DEDUP_CAPACITY, DEDUP_TTL_MS)
    }

    pub fn with_capacity(capacity: usize, ttl_ms: u64) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity is nonzero");
        Self {
            entries: LruCache::new(cap),
            ttl_ms,
        }
    }

    /// Record `hash` as seen at `now_ms`. Returns true when it was fresh
    /// (not a live duplicate).
    pub fn insert(&mut self, hash: &str, now_ms: u64) -> bool {
        if self.contains(hash, now_ms) {
            return false;
        }
        self.entries.put(hash.to_string(), now_ms);
        true
    }

    pub fn contains(&mut self, hash: &str, now_ms: u64) -> bool {
        match self.entries.get(hash) {
            Some(&seen_at) => now_ms.saturating_sub(seen_at) <= self.ttl_ms,
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}
