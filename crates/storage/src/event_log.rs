//! Append-only per-experiment event log
//!
//! Each experiment's data points live in one blob. Appends are serialized
//! per experiment with an async mutex; reads take no lock and observe the
//! last complete write. Points older than the retention window are pruned
//! on every append.

use chrono::Utc;
use dashmap::DashMap;
use experiment_types::{DataPoint, PartitionedEvents};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::backend::BlobStore;
use crate::error::{StorageError, StorageResult};

const EVENT_PREFIX: &str = "events/";

/// Outcome of one append
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub appended: usize,
    pub pruned: usize,
    /// Points stored after the append
    pub retained: usize,
}

/// Append-only event log over a blob store
pub struct EventLog {
    backend: Arc<dyn BlobStore>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl EventLog {
    pub fn new(backend: Arc<dyn BlobStore>) -> Self {
        Self {
            backend,
            locks: DashMap::new(),
        }
    }

    fn key(experiment_id: &Uuid) -> String {
        format!("{}{}", EVENT_PREFIX, experiment_id)
    }

    fn lock_for(&self, experiment_id: &Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(*experiment_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Append points and prune everything older than `retention`
    pub async fn append(
        &self,
        experiment_id: &Uuid,
        points: Vec<DataPoint>,
        retention: Duration,
    ) -> StorageResult<AppendOutcome> {
        let lock = self.lock_for(experiment_id);
        let _guard = lock.lock().await;

        let key = Self::key(experiment_id);
        let mut stored = self.load(&key).await?;
        let appended = points.len();
        stored.extend(points);

        let pruned = Self::prune_older_than(&mut stored, retention);
        self.backend.set(&key, &serde_json::to_vec(&stored)?).await?;

        debug!(
            "Appended {} events to experiment {} ({} pruned, {} retained)",
            appended,
            experiment_id,
            pruned,
            stored.len()
        );

        Ok(AppendOutcome {
            appended,
            pruned,
            retained: stored.len(),
        })
    }

    /// All retained points in append order
    pub async fn read(&self, experiment_id: &Uuid) -> StorageResult<Vec<DataPoint>> {
        self.load(&Self::key(experiment_id)).await
    }

    /// Retained points partitioned by variant
    pub async fn snapshot(&self, experiment_id: &Uuid) -> StorageResult<PartitionedEvents> {
        Ok(self.read(experiment_id).await?.into_iter().collect())
    }

    /// Prune without appending, returns the number of removed points
    pub async fn prune(&self, experiment_id: &Uuid, retention: Duration) -> StorageResult<usize> {
        let lock = self.lock_for(experiment_id);
        let _guard = lock.lock().await;

        let key = Self::key(experiment_id);
        let mut stored = self.load(&key).await?;
        let pruned = Self::prune_older_than(&mut stored, retention);
        if pruned > 0 {
            self.backend.set(&key, &serde_json::to_vec(&stored)?).await?;
        }
        Ok(pruned)
    }

    /// Drop the whole log of an experiment
    pub async fn remove(&self, experiment_id: &Uuid) -> StorageResult<()> {
        let lock = self.lock_for(experiment_id);
        let guard = lock.lock().await;
        self.backend.delete(&Self::key(experiment_id)).await?;
        drop(guard);
        self.locks.remove(experiment_id);
        Ok(())
    }

    async fn load(&self, key: &str) -> StorageResult<Vec<DataPoint>> {
        match self.backend.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupted {
                key: key.to_string(),
                source,
            }),
            None => Ok(Vec::new()),
        }
    }

    fn prune_older_than(points: &mut Vec<DataPoint>, retention: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window));

        match cutoff {
            Some(cutoff) => {
                let before = points.len();
                points.retain(|p| p.timestamp >= cutoff);
                before - points.len()
            }
            None => 0,
        }
    }
}
