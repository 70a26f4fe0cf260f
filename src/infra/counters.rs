//! Process-local counter store.
//!
//! Suits single-node deployments; a networked store with INCR-and-expire
//! semantics slots behind the same [`CounterStore`] port for multi-node
//! setups.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::application::quota::{CounterStore, CounterStoreError, WindowCount};

#[derive(Debug)]
struct WindowEntry {
    window_start: Instant,
    count: u64,
}

/// [`CounterStore`] backed by a sharded concurrent map.
///
/// The entry guard holds the shard lock for its key, so the expiry check
/// and increment below execute as one indivisible step per key. Concurrent
/// calls for the same key serialize on that lock; calls for different keys
/// proceed in parallel.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    entries: DashMap<String, WindowEntry>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowCount, CounterStoreError> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| WindowEntry {
                window_start: now,
                count: 0,
            });

        if now.duration_since(entry.window_start) >= window {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count += 1;

        let elapsed = now.duration_since(entry.window_start);
        Ok(WindowCount {
            count: entry.count,
            reset_in: window.saturating_sub(elapsed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_accumulate_within_a_window() {
        let store = InMemoryCounterStore::new();
        let window = Duration::from_secs(60);

        for expected in 1..=5 {
            let snapshot = store.increment("key", window).await.expect("store is local");
            assert_eq!(snapshot.count, expected);
            assert!(snapshot.reset_in <= window);
        }
    }

    #[tokio::test]
    async fn keys_are_counted_independently() {
        let store = InMemoryCounterStore::new();
        let window = Duration::from_secs(60);

        store.increment("a", window).await.expect("store is local");
        store.increment("a", window).await.expect("store is local");
        let b = store.increment("b", window).await.expect("store is local");

        assert_eq!(b.count, 1);
    }

    #[tokio::test]
    async fn expired_window_resets_the_counter() {
        let store = InMemoryCounterStore::new();
        let window = Duration::from_millis(20);

        store.increment("key", window).await.expect("store is local");
        store.increment("key", window).await.expect("store is local");

        tokio::time::sleep(Duration::from_millis(40)).await;

        let snapshot = store.increment("key", window).await.expect("store is local");
        assert_eq!(snapshot.count, 1);
    }
}
