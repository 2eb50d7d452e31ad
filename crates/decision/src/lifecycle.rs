//! Experiment lifecycle management
//!
//! This module validates experiment definitions and drives the status
//! machine: draft, running, paused and finally completed or stopped.
//! Every transition is written to the experiment store before the
//! in-memory cache changes.

use chrono::Utc;
use dashmap::DashMap;
use experiment_config::EngineSettings;
use experiment_types::{
    Experiment, ExperimentConfiguration, ExperimentError, ExperimentResult, ExperimentSpec,
    ExperimentStatus, Result,
};
use std::collections::HashSet;
use storage::ExperimentStore;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::collaborators::{Collaborators, ValidationStatus};

/// Tolerance for percentage and weight sums
const SUM_TOLERANCE: f64 = 0.01;

/// Smallest allowed per-arm sample size
pub const MIN_SAMPLE_SIZE: usize = 50;

/// Proof that the caller holds the transition lock
///
/// Transitions take a reference to this guard so that a stop, which spans
/// a flush and an analysis, stays serialized with every other transition.
pub struct TransitionGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// Experiment lifecycle manager
pub struct ExperimentManager {
    /// Persistent definitions and the active slot
    store: ExperimentStore,
    /// Read-through cache of known experiments
    experiments: DashMap<Uuid, Experiment>,
    /// Serializes every status transition
    transitions: Mutex<()>,
    collaborators: Collaborators,
    settings: EngineSettings,
    defaults: ExperimentConfiguration,
}

impl ExperimentManager {
    /// Create a new experiment manager
    pub fn new(
        store: ExperimentStore,
        collaborators: Collaborators,
        settings: EngineSettings,
        defaults: ExperimentConfiguration,
    ) -> Self {
        Self {
            store,
            experiments: DashMap::new(),
            transitions: Mutex::new(()),
            collaborators,
            settings,
            defaults,
        }
    }

    /// Acquire the transition lock
    pub async fn lock(&self) -> TransitionGuard<'_> {
        TransitionGuard {
            _guard: self.transitions.lock().await,
        }
    }

    /// Create a new experiment in draft status
    pub async fn create(&self, spec: ExperimentSpec) -> Result<Experiment> {
        let configuration = spec
            .configuration
            .clone()
            .unwrap_or_else(|| self.defaults.clone());
        let experiment = Experiment::from_spec(spec, configuration);

        Self::validate(&experiment)?;

        for model in [&experiment.control, &experiment.treatment] {
            if !self.collaborators.catalog.model_exists(&model.model_id).await {
                return Err(ExperimentError::ModelNotFound(model.model_id.clone()));
            }

            let report = self
                .collaborators
                .validator
                .quick_validate(&model.model_id)
                .await;
            match report.status {
                ValidationStatus::Critical => {
                    return Err(ExperimentError::InvalidModel {
                        model_id: model.model_id.clone(),
                        issues: report.issues,
                    });
                }
                ValidationStatus::Warning => warn!(
                    "Model {} passed validation with warnings: {}",
                    model.model_id,
                    report.issues.join("; ")
                ),
                ValidationStatus::Passed => {}
            }
        }

        let experiment = self.persist(experiment).await?;
        info!("Created experiment {} ({})", experiment.id, experiment.name);
        Ok(experiment)
    }

    /// Check every structural invariant of an experiment definition
    pub fn validate(experiment: &Experiment) -> Result<()> {
        let split = &experiment.traffic_split;
        for (arm, pct) in [
            ("control", split.control_percentage),
            ("treatment", split.treatment_percentage),
        ] {
            if !(0.0..=100.0).contains(&pct) {
                return Err(ExperimentError::InvalidTrafficSplit(format!(
                    "{} percentage must be within 0-100, got {}",
                    arm, pct
                )));
            }
        }

        let total = split.control_percentage + split.treatment_percentage;
        if (total - 100.0).abs() > SUM_TOLERANCE {
            return Err(ExperimentError::InvalidTrafficSplit(format!(
                "Traffic split must sum to 100, got {}",
                total
            )));
        }

        let invalid = |msg: String| Err(ExperimentError::InvalidConfiguration(msg));

        if experiment.name.trim().is_empty() {
            return invalid("Experiment name must not be empty".to_string());
        }
        if experiment.control.model_id.is_empty() || experiment.treatment.model_id.is_empty() {
            return invalid("Both models need a model id".to_string());
        }

        if experiment.success_metrics.is_empty() {
            return invalid("At least one success metric is required".to_string());
        }
        let mut names = HashSet::new();
        for metric in &experiment.success_metrics {
            if metric.name.is_empty() {
                return invalid("Success metric names must not be empty".to_string());
            }
            if !names.insert(metric.name.as_str()) {
                return invalid(format!("Duplicate success metric {}", metric.name));
            }
            if !metric.weight.is_finite() || !metric.target.is_finite() {
                return invalid(format!(
                    "Success metric {} needs a finite weight and target",
                    metric.name
                ));
            }
        }
        let weights: f64 = experiment.success_metrics.iter().map(|m| m.weight).sum();
        if !weights.is_finite() || (weights - 1.0).abs() > SUM_TOLERANCE {
            return invalid(format!("Metric weights must sum to 1.0, got {}", weights));
        }

        let config = &experiment.configuration;
        if config.min_sample_size < MIN_SAMPLE_SIZE {
            return invalid(format!(
                "min_sample_size must be at least {}, got {}",
                MIN_SAMPLE_SIZE, config.min_sample_size
            ));
        }
        if !(0.01..=0.1).contains(&config.significance_threshold) {
            return invalid(format!(
                "significance_threshold must be within 0.01-0.1, got {}",
                config.significance_threshold
            ));
        }
        if config.max_duration_secs == 0 || config.monitoring_interval_secs == 0 {
            return invalid("Durations must be greater than 0".to_string());
        }
        if !(config.rollback_threshold > 0.0 && config.rollback_threshold <= 1.0) {
            return invalid(format!(
                "rollback_threshold must be within (0, 1], got {}",
                config.rollback_threshold
            ));
        }

        Ok(())
    }

    /// Start a draft experiment
    pub async fn start(&self, _tx: &TransitionGuard<'_>, id: &Uuid) -> Result<Experiment> {
        let mut experiment = self.require(id).await?;
        Self::expect_status(&experiment, "start", |s| s == ExperimentStatus::Draft)?;

        if let Some(active_id) = self.store.active().await? {
            if active_id != *id {
                match self.get(&active_id).await? {
                    Some(active) if active.status.is_active() => {
                        return Err(ExperimentError::ExperimentAlreadyRunning(active_id));
                    }
                    _ => warn!("Clearing stale active experiment record {}", active_id),
                }
            }
        }

        for model in [&experiment.control, &experiment.treatment] {
            if !self.collaborators.catalog.model_exists(&model.model_id).await {
                return Err(ExperimentError::ModelNotFound(model.model_id.clone()));
            }
        }

        let available_mb = self.collaborators.resources.available_memory_mb();
        if available_mb < self.settings.min_available_memory_mb {
            return Err(ExperimentError::InsufficientResources {
                available_mb,
                required_mb: self.settings.min_available_memory_mb,
            });
        }

        experiment.status = ExperimentStatus::Running;
        experiment.start_date = Some(Utc::now());

        self.store.set_active(id).await?;
        let experiment = match self.persist(experiment).await {
            Ok(experiment) => experiment,
            Err(e) => {
                if let Err(clear) = self.store.clear_active().await {
                    warn!("Failed to release active slot for {}: {}", id, clear);
                }
                return Err(e);
            }
        };

        info!("Started experiment {}", id);
        Ok(experiment)
    }

    /// Pause a running experiment
    pub async fn pause(&self, _tx: &TransitionGuard<'_>, id: &Uuid) -> Result<Experiment> {
        let mut experiment = self.require(id).await?;
        Self::expect_status(&experiment, "pause", |s| s == ExperimentStatus::Running)?;

        experiment.status = ExperimentStatus::Paused;
        let experiment = self.persist(experiment).await?;
        info!("Paused experiment {}", id);
        Ok(experiment)
    }

    /// Resume a paused experiment
    pub async fn resume(&self, _tx: &TransitionGuard<'_>, id: &Uuid) -> Result<Experiment> {
        let mut experiment = self.require(id).await?;
        Self::expect_status(&experiment, "resume", |s| s == ExperimentStatus::Paused)?;

        experiment.status = ExperimentStatus::Running;
        let experiment = self.persist(experiment).await?;
        info!("Resumed experiment {}", id);
        Ok(experiment)
    }

    /// Load an experiment that is about to be stopped
    pub async fn begin_stop(&self, _tx: &TransitionGuard<'_>, id: &Uuid) -> Result<Experiment> {
        let experiment = self.require(id).await?;
        Self::expect_status(&experiment, "stop", |s| s.is_active())?;
        Ok(experiment)
    }

    /// Persist the result and the terminal status, then free the active slot
    pub async fn finish(
        &self,
        _tx: &TransitionGuard<'_>,
        mut experiment: Experiment,
        result: &ExperimentResult,
    ) -> Result<Experiment> {
        self.store.save_result(result).await?;

        experiment.status = result.status;
        experiment.end_date = Some(result.completed_at);
        let experiment = match self.persist(experiment).await {
            Ok(experiment) => experiment,
            Err(e) => {
                // A result only exists for a finished experiment
                if let Err(remove) = self.store.remove_result(&result.experiment_id).await {
                    warn!(
                        "Failed to remove result of experiment {}: {}",
                        result.experiment_id, remove
                    );
                }
                return Err(e);
            }
        };

        if self.store.active().await? == Some(experiment.id) {
            self.store.clear_active().await?;
        }

        info!(
            "Experiment {} {}: {}",
            experiment.id, experiment.status, result.stop_reason
        );
        Ok(experiment)
    }

    /// Get an experiment by id
    pub async fn get(&self, id: &Uuid) -> Result<Option<Experiment>> {
        if let Some(experiment) = self.experiments.get(id) {
            return Ok(Some(experiment.clone()));
        }

        let loaded = self.store.load(id).await?;
        if let Some(experiment) = &loaded {
            self.experiments.insert(*id, experiment.clone());
        }
        Ok(loaded)
    }

    /// Get an experiment or fail with `ExperimentNotFound`
    pub async fn require(&self, id: &Uuid) -> Result<Experiment> {
        self.get(id)
            .await?
            .ok_or(ExperimentError::ExperimentNotFound(*id))
    }

    /// Status from the cache only, for the hot path
    pub fn cached_status(&self, id: &Uuid) -> Option<ExperimentStatus> {
        self.experiments.get(id).map(|e| e.status)
    }

    /// All persisted experiments, oldest first
    pub async fn list(&self) -> Result<Vec<Experiment>> {
        let experiments = self.store.list().await?;
        for experiment in &experiments {
            self.experiments.insert(experiment.id, experiment.clone());
        }
        Ok(experiments)
    }

    /// Final result of a finished experiment
    pub async fn result(&self, id: &Uuid) -> Result<Option<ExperimentResult>> {
        Ok(self.store.load_result(id).await?)
    }

    async fn persist(&self, experiment: Experiment) -> Result<Experiment> {
        self.store.save(&experiment).await?;
        self.experiments.insert(experiment.id, experiment.clone());
        Ok(experiment)
    }

    fn expect_status(
        experiment: &Experiment,
        operation: &'static str,
        allowed: impl Fn(ExperimentStatus) -> bool,
    ) -> Result<()> {
        if allowed(experiment.status) {
            Ok(())
        } else {
            Err(ExperimentError::InvalidTransition {
                id: experiment.id,
                status: experiment.status,
                operation,
            })
        }
    }
}
