//! In-memory blob store
//!
//! A [`BlobStore`] backed by a `DashMap`. Used in tests and on devices
//! where experiment state does not need to survive a restart.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::backend::BlobStore;
use crate::error::StorageResult;

/// Snapshot of store activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub total_entries: usize,
    pub total_bytes: usize,
    pub get_count: u64,
    pub set_count: u64,
    pub delete_count: u64,
    pub hit_count: u64,
    pub miss_count: u64,
}

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// In-memory blob store using DashMap
///
/// Cloning is cheap and clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    data: Arc<DashMap<String, Vec<u8>>>,
    counters: Arc<Counters>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current statistics
    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            total_entries: self.data.len(),
            total_bytes: self.data.iter().map(|e| e.key().len() + e.value().len()).sum(),
            get_count: self.counters.gets.load(Ordering::Relaxed),
            set_count: self.counters.sets.load(Ordering::Relaxed),
            delete_count: self.counters.deletes.load(Ordering::Relaxed),
            hit_count: self.counters.hits.load(Ordering::Relaxed),
            miss_count: self.counters.misses.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        trace!("Getting key: {}", key);
        self.counters.gets.fetch_add(1, Ordering::Relaxed);

        let value = self.data.get(key).map(|entry| entry.value().clone());
        if value.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }

        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        trace!("Setting key: {}, value size: {} bytes", key, value.len());
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        self.data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        trace!("Deleting key: {}", key);
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        self.data.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::check_basic_ops;

    #[tokio::test]
    async fn test_memory_store_basic_ops() {
        check_basic_ops(&MemoryBlobStore::new()).await;
    }

    #[tokio::test]
    async fn test_stats_tracking() {
        let store = MemoryBlobStore::new();
        store.set("a", b"12345").await.unwrap();
        store.get("a").await.unwrap();
        store.get("missing").await.unwrap();
        store.delete("a").await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.set_count, 1);
        assert_eq!(stats.get_count, 2);
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.delete_count, 1);
        assert_eq!(stats.total_entries, 0);
    }

    #[tokio::test]
    async fn test_clones_share_data() {
        let store = MemoryBlobStore::new();
        let clone = store.clone();
        clone.set("shared", b"yes").await.unwrap();

        assert_eq!(store.get("shared").await.unwrap(), Some(b"yes".to_vec()));
        assert_eq!(store.len(), 1);
    }
}
