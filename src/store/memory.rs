//! In-process counter store.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::{CounterStore, IncrementOutcome, StoreError};

/// A counter entry owned exclusively by the store.
#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expires_at_ms: u64,
}

/// An in-process counter store backed by a sharded concurrent map.
///
/// `DashMap` shards its locks per key-range, so concurrent increments of
/// distinct keys do not contend on a single global lock. Entries are treated
/// as expired on access once `now >= expires_at`, independent of the
/// background sweep; the sweep only bounds memory by removing entries no
/// longer being accessed.
pub struct MemoryCounterStore {
    entries: DashMap<String, CounterEntry>,
}

impl MemoryCounterStore {
    /// Create an empty in-process store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Remove all expired entries. Returns how many were removed.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now_ms < entry.expires_at_ms);
        let removed = before - self.entries.len();
        if removed > 0 {
            trace!(removed = removed, "Swept expired counters");
        }
        removed
    }

    /// Spawn a background task that sweeps expired entries periodically.
    ///
    /// A good interval is roughly half the smallest configured window. The
    /// task holds only a weak reference and exits once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        debug!(interval_ms = interval.as_millis() as u64, "Starting counter sweeper");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.upgrade() {
                    Some(store) => {
                        store.sweep(epoch_ms());
                    }
                    None => break,
                }
            }
        })
    }

    /// Number of live counter entries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Clear all counters. Primarily useful for testing.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn increment(&self, key: &str, ttl: Duration, now_ms: u64) -> IncrementOutcome {
        let ttl_ms = ttl.as_millis() as u64;
        let mut created = false;

        // The entry guard holds the shard lock, making the whole
        // read-reset-increment sequence atomic per key.
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| {
                created = true;
                CounterEntry {
                    count: 0,
                    expires_at_ms: now_ms + ttl_ms,
                }
            });

        if !created && now_ms >= entry.expires_at_ms {
            // Lazy expiry: the window closed but the sweeper has not run yet.
            entry.count = 0;
            entry.expires_at_ms = now_ms + ttl_ms;
            created = true;
        }

        entry.count += 1;
        IncrementOutcome {
            count: entry.count,
            newly_created: created,
        }
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment_and_get(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<IncrementOutcome, StoreError> {
        Ok(self.increment(key, ttl, epoch_ms()))
    }
}

/// Current wall-clock time as epoch milliseconds.
pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_counts_up() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_secs(60);

        tokio_test::block_on(async {
            let first = store.increment_and_get("key", ttl).await.unwrap();
            assert_eq!(first.count, 1);
            assert!(first.newly_created);

            let second = store.increment_and_get("key", ttl).await.unwrap();
            assert_eq!(second.count, 2);
            assert!(!second.newly_created);
        });
    }

    #[tokio::test]
    async fn test_separate_keys_separate_counts() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_secs(60);

        store.increment_and_get("a", ttl).await.unwrap();
        store.increment_and_get("a", ttl).await.unwrap();
        let b = store.increment_and_get("b", ttl).await.unwrap();

        assert_eq!(b.count, 1);
        assert_eq!(store.entry_count(), 2);
    }

    #[test]
    fn test_lazy_expiry_resets_on_access() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_millis(100);

        let first = store.increment("key", ttl, 1_000);
        assert_eq!(first.count, 1);
        let second = store.increment("key", ttl, 1_050);
        assert_eq!(second.count, 2);

        // Past the TTL the entry resets to 1 and a fresh TTL is set.
        let reset = store.increment("key", ttl, 1_100);
        assert_eq!(reset.count, 1);
        assert!(reset.newly_created);
    }

    #[test]
    fn test_ttl_not_refreshed_on_increment() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_millis(100);

        store.increment("key", ttl, 1_000);
        // Increment just before expiry must not push the deadline out.
        store.increment("key", ttl, 1_099);
        let reset = store.increment("key", ttl, 1_100);
        assert_eq!(reset.count, 1);
    }

    #[test]
    fn test_sweep_removes_expired_entries() {
        let store = MemoryCounterStore::new();
        store.increment("old", Duration::from_millis(10), 1_000);
        store.increment("live", Duration::from_secs(60), 1_000);

        let removed = store.sweep(2_000);
        assert_eq!(removed, 1);
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_nothing() {
        let store = Arc::new(MemoryCounterStore::new());
        let ttl = Duration::from_secs(60);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment_and_get("shared", ttl).await.unwrap()
            }));
        }

        let mut max_seen = 0;
        for handle in handles {
            let outcome = handle.await.unwrap();
            max_seen = max_seen.max(outcome.count);
        }
        assert_eq!(max_seen, 50);
    }

    #[tokio::test]
    async fn test_sweeper_stops_when_store_dropped() {
        let store = Arc::new(MemoryCounterStore::new());
        let handle = store.spawn_sweeper(Duration::from_millis(10));
        drop(store);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished());
    }
}
