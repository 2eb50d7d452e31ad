//! Experiment definition store
//!
//! Holds experiment definitions, final results and the record of the one
//! experiment currently occupying the active slot. Every lifecycle
//! transition is written here before it is reported to the caller.

use experiment_types::{Experiment, ExperimentResult};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::backend::BlobStore;
use crate::error::{StorageError, StorageResult};

const EXPERIMENT_PREFIX: &str = "experiments/";
const RESULT_PREFIX: &str = "results/";
const ACTIVE_KEY: &str = "active_experiment";

/// Typed store for experiment definitions and results
#[derive(Clone)]
pub struct ExperimentStore {
    backend: Arc<dyn BlobStore>,
}

impl ExperimentStore {
    pub fn new(backend: Arc<dyn BlobStore>) -> Self {
        Self { backend }
    }

    /// Persist an experiment definition, overwriting the previous version
    pub async fn save(&self, experiment: &Experiment) -> StorageResult<()> {
        let key = format!("{}{}", EXPERIMENT_PREFIX, experiment.id);
        self.write(&key, experiment).await?;
        debug!("Saved experiment {} ({})", experiment.id, experiment.status);
        Ok(())
    }

    pub async fn load(&self, id: &Uuid) -> StorageResult<Option<Experiment>> {
        self.read(&format!("{}{}", EXPERIMENT_PREFIX, id)).await
    }

    /// Load every stored experiment
    pub async fn list(&self) -> StorageResult<Vec<Experiment>> {
        let mut experiments = Vec::new();
        for key in self.backend.list_keys(EXPERIMENT_PREFIX).await? {
            if let Some(experiment) = self.read(&key).await? {
                experiments.push(experiment);
            }
        }
        experiments.sort_by_key(|e: &Experiment| e.created_at);
        Ok(experiments)
    }

    pub async fn save_result(&self, result: &ExperimentResult) -> StorageResult<()> {
        let key = format!("{}{}", RESULT_PREFIX, result.experiment_id);
        self.write(&key, result).await
    }

    pub async fn load_result(&self, id: &Uuid) -> StorageResult<Option<ExperimentResult>> {
        self.read(&format!("{}{}", RESULT_PREFIX, id)).await
    }

    pub async fn remove_result(&self, id: &Uuid) -> StorageResult<()> {
        self.backend.delete(&format!("{}{}", RESULT_PREFIX, id)).await
    }

    /// Experiment currently holding the active slot
    pub async fn active(&self) -> StorageResult<Option<Uuid>> {
        self.read(ACTIVE_KEY).await
    }

    pub async fn set_active(&self, id: &Uuid) -> StorageResult<()> {
        self.write(ACTIVE_KEY, id).await
    }

    pub async fn clear_active(&self) -> StorageResult<()> {
        self.backend.delete(ACTIVE_KEY).await
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.backend.set(key, &bytes).await
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.backend.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StorageError::Corrupted {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }
}
