//! Relay dedup cache
//!
//! Volatile and cleared on restart. Uses Moka with LRU eviction: every
//! claimed id is admitted, and the least recently used id makes room for it
//! once capacity is reached.

use moka::future::Cache;
use moka::policy::EvictionPolicy;

use crate::metrics::DEDUP_HITS_TOTAL;

/// Outcome of claiming an object id for relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The id was not cached; it now maps to the freshly minted activity id
    Fresh(String),
    /// The id was already relayed as the contained activity id
    Seen(String),
}

/// Object id -> relay activity id
pub struct DedupCache {
    entries: Cache<String, String>,
    capacity: u64,
}

impl DedupCache {
    /// Create new dedup cache
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of object ids to remember
    pub fn new(capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self { entries, capacity }
    }

    /// Claim an object id for relay.
    ///
    /// Lookup and insert happen as a single operation on the cache entry, so
    /// two concurrent claims for the same id yield exactly one
    /// [`Claim::Fresh`]. `mint` only runs for the winning claim. Existing
    /// entries are never overwritten.
    pub async fn claim<F>(&self, object_id: &str, mint: F) -> Claim
    where
        F: FnOnce() -> String,
    {
        let entry = self
            .entries
            .entry_by_ref(object_id)
            .or_insert_with(async move { mint() })
            .await;

        if entry.is_fresh() {
            Claim::Fresh(entry.into_value())
        } else {
            DEDUP_HITS_TOTAL.inc();
            Claim::Seen(entry.into_value())
        }
    }

    /// Relay activity id for an object, if it was relayed recently.
    pub async fn get(&self, object_id: &str) -> Option<String> {
        self.entries.get(object_id).await
    }

    /// Number of cached ids after pending evictions are applied.
    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn first_claim_is_fresh_and_second_is_seen() {
        let cache = DedupCache::new(16);

        let first = cache
            .claim("https://origin.example/notes/1", || "activity-1".to_string())
            .await;
        let second = cache
            .claim("https://origin.example/notes/1", || "activity-2".to_string())
            .await;

        assert_eq!(first, Claim::Fresh("activity-1".to_string()));
        assert_eq!(second, Claim::Seen("activity-1".to_string()));
        assert_eq!(
            cache.get("https://origin.example/notes/1").await.as_deref(),
            Some("activity-1")
        );
    }

    #[tokio::test]
    async fn concurrent_claims_produce_single_fresh_entry() {
        let cache = Arc::new(DedupCache::new(16));
        let minted = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                let minted = minted.clone();
                tokio::spawn(async move {
                    cache
                        .claim("https://origin.example/notes/race", move || {
                            minted.fetch_add(1, Ordering::SeqCst);
                            format!("activity-{i}")
                        })
                        .await
                })
            })
            .collect();

        let mut fresh = 0;
        for task in tasks {
            if matches!(task.await.unwrap(), Claim::Fresh(_)) {
                fresh += 1;
            }
        }

        assert_eq!(fresh, 1);
        assert_eq!(minted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entry_count_stays_within_capacity() {
        let cache = DedupCache::new(8);
        for i in 0..64 {
            cache
                .claim(&format!("https://origin.example/notes/{i}"), || {
                    format!("activity-{i}")
                })
                .await;
        }

        assert!(cache.entry_count().await <= cache.capacity());
    }

    #[tokio::test]
    async fn recent_claims_survive_when_full() {
        let cache = DedupCache::new(64);
        for i in 0..64 {
            cache
                .claim(&format!("https://origin.example/notes/{i}"), || {
                    format!("activity-{i}")
                })
                .await;
        }

        for i in 64..264 {
            let object_id = format!("https://origin.example/notes/{i}");
            let first = cache.claim(&object_id, || format!("activity-{i}")).await;
            assert_eq!(first, Claim::Fresh(format!("activity-{i}")));

            // Apply pending admission and eviction before the repeat
            assert!(cache.entry_count().await <= cache.capacity());

            let again = cache.claim(&object_id, || "minted-twice".to_string()).await;
            assert_eq!(again, Claim::Seen(format!("activity-{i}")), "{object_id} was dropped");
        }
    }
}
