//! Experiment engine
//!
//! This module provides the main entry point that combines the lifecycle
//! manager, traffic allocation, event recording, statistical analysis and
//! background monitoring.

use chrono::Utc;
use collector::{EventRecorder, RecorderStats};
use experiment_config::EngineConfig;
use experiment_types::{
    DeviceInfo, Experiment, ExperimentError, ExperimentReport, ExperimentResult, ExperimentSpec,
    ExperimentStatus, PartitionedEvents, Result, Variant,
};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use storage::{BlobStore, EventLog, ExperimentStore};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    allocator::TrafficAllocator,
    analyzer::StatisticalAnalyzer,
    collaborators::Collaborators,
    conclusion::ConclusionGenerator,
    lifecycle::{ExperimentManager, TransitionGuard},
    monitor::{self, ExperimentMonitor, ExperimentStats, MonitorDecision, MonitorPolicy},
    statistical::SampleSizeCalculator,
};

/// Why an experiment is being stopped
enum StopTrigger {
    /// Explicit request with a caller supplied reason
    Caller(String),
    /// Decision reached by the monitoring loop
    Monitor(MonitorDecision),
}

struct EngineInner {
    config: EngineConfig,
    manager: ExperimentManager,
    events: Arc<EventLog>,
    recorder: EventRecorder,
    analyzer: StatisticalAnalyzer,
    monitor: ExperimentMonitor,
}

/// On-device A/B experiment engine
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct ExperimentEngine {
    inner: Arc<EngineInner>,
}

impl ExperimentEngine {
    /// Create a new engine over separate definition and event stores
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// `InvalidConfiguration` when `config` does not validate.
    pub fn new(
        config: EngineConfig,
        definitions: Arc<dyn BlobStore>,
        events: Arc<dyn BlobStore>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ExperimentError::InvalidConfiguration(e.to_string()))?;

        let events = Arc::new(EventLog::new(events));
        let recorder = EventRecorder::start(
            config.recorder.clone(),
            events.clone(),
            config.engine.event_retention(),
        );
        let manager = ExperimentManager::new(
            ExperimentStore::new(definitions),
            collaborators,
            config.engine.clone(),
            config.experiment_defaults.clone(),
        );
        let analyzer = StatisticalAnalyzer::new(config.engine.min_samples_per_arm);

        info!("Experiment engine initialized");

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                manager,
                events,
                recorder,
                analyzer,
                monitor: ExperimentMonitor::new(),
            }),
        })
    }

    /// Reload persisted experiments and resume monitoring of running ones
    pub async fn recover(&self) -> Result<usize> {
        let mut resumed = 0;
        for experiment in self.inner.manager.list().await? {
            if experiment.status == ExperimentStatus::Running {
                self.spawn_monitor(&experiment);
                resumed += 1;
            }
        }

        info!("Recovered {} running experiments", resumed);
        Ok(resumed)
    }

    /// Create and validate a new draft experiment
    pub async fn create_experiment(&self, spec: ExperimentSpec) -> Result<Experiment> {
        info!("Creating experiment {}", spec.name);
        self.inner.manager.create(spec).await
    }

    /// Start an experiment and begin monitoring it
    pub async fn start_experiment(&self, experiment_id: &Uuid) -> Result<Experiment> {
        let tx = self.inner.manager.lock().await;
        let experiment = self.inner.manager.start(&tx, experiment_id).await?;
        self.spawn_monitor(&experiment);
        Ok(experiment)
    }

    /// Pause an experiment; allocation and monitoring are suspended
    pub async fn pause_experiment(&self, experiment_id: &Uuid) -> Result<Experiment> {
        let tx = self.inner.manager.lock().await;
        let experiment = self.inner.manager.pause(&tx, experiment_id).await?;
        self.inner.monitor.deregister(experiment_id);
        Ok(experiment)
    }

    /// Resume a paused experiment
    pub async fn resume_experiment(&self, experiment_id: &Uuid) -> Result<Experiment> {
        let tx = self.inner.manager.lock().await;
        let experiment = self.inner.manager.resume(&tx, experiment_id).await?;
        self.spawn_monitor(&experiment);
        Ok(experiment)
    }

    /// Stop an experiment and produce its final result
    ///
    /// The experiment ends `completed` if its maximum duration has passed
    /// and `stopped` otherwise.
    pub async fn stop_experiment(
        &self,
        experiment_id: &Uuid,
        reason: impl Into<String>,
    ) -> Result<ExperimentResult> {
        self.stop_with(experiment_id, StopTrigger::Caller(reason.into()))
            .await
    }

    /// Live progress of an experiment, `None` if unknown or unreadable
    pub async fn get_experiment_stats(&self, experiment_id: &Uuid) -> Option<ExperimentStats> {
        let experiment = match self.inner.manager.get(experiment_id).await {
            Ok(Some(experiment)) => experiment,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to load experiment {}: {}", experiment_id, e);
                return None;
            }
        };

        if experiment.status.is_active() {
            self.flush_recorder().await;
        }

        let events = match self.inner.events.snapshot(experiment_id).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Failed to read events for experiment {}: {}", experiment_id, e);
                return None;
            }
        };

        let statistics = match self.inner.analyzer.analyze(&events, &experiment) {
            Ok(statistics) => statistics,
            Err(e) => {
                warn!("Failed to analyze experiment {}: {}", experiment_id, e);
                return None;
            }
        };

        Some(ExperimentStats::compute(
            &experiment,
            &events,
            &statistics,
            Utc::now(),
        ))
    }

    /// Arm serving a user; control unless the experiment is running
    pub fn get_model_variant(&self, experiment: &Experiment, user_id: &str, device_id: &str) -> Variant {
        let status = self
            .inner
            .manager
            .cached_status(&experiment.id)
            .unwrap_or(experiment.status);

        if status != ExperimentStatus::Running {
            debug!(
                "Experiment {} is {}, serving control",
                experiment.id, status
            );
            return Variant::Control;
        }

        TrafficAllocator::assign_variant(experiment, user_id, device_id)
    }

    /// Audience-aware assignment, `None` when the device is not enrolled
    pub async fn enroll(
        &self,
        experiment_id: &Uuid,
        user_id: &str,
        device: &DeviceInfo,
    ) -> Result<Option<Variant>> {
        let experiment = self.inner.manager.require(experiment_id).await?;

        if experiment.status != ExperimentStatus::Running {
            return Ok(None);
        }
        if !TrafficAllocator::is_targeted(&experiment.target_audience, device) {
            debug!(
                "Device {} is outside the audience of experiment {}",
                device.device_id, experiment_id
            );
            return Ok(None);
        }

        Ok(Some(TrafficAllocator::assign_variant(
            &experiment,
            user_id,
            &device.device_id,
        )))
    }

    /// Record the outcome of one interaction
    ///
    /// Never fails: events for unknown or finished experiments and events
    /// that do not fit in the buffer are logged and dropped.
    pub fn record_experiment_event(
        &self,
        experiment_id: &Uuid,
        user_id: impl Into<String>,
        variant: Variant,
        metrics: HashMap<String, f64>,
        device: DeviceInfo,
    ) {
        match self.inner.manager.cached_status(experiment_id) {
            Some(status) if status.is_active() => {
                self.inner
                    .recorder
                    .record(*experiment_id, user_id, variant, metrics, device);
            }
            status => debug!(
                "Dropping event for experiment {} in status {:?}",
                experiment_id, status
            ),
        }
    }

    /// Get an experiment by id
    pub async fn get_experiment(&self, experiment_id: &Uuid) -> Result<Option<Experiment>> {
        self.inner.manager.get(experiment_id).await
    }

    /// All known experiments, oldest first
    pub async fn list_experiments(&self) -> Result<Vec<Experiment>> {
        self.inner.manager.list().await
    }

    /// Final result of a finished experiment
    pub async fn get_result(&self, experiment_id: &Uuid) -> Result<Option<ExperimentResult>> {
        self.inner.manager.result(experiment_id).await
    }

    /// Export the final result as a versioned report
    pub async fn export_report(&self, experiment_id: &Uuid) -> Result<ExperimentReport> {
        if let Some(result) = self.inner.manager.result(experiment_id).await? {
            return Ok(ExperimentReport::new(result));
        }

        let experiment = self.inner.manager.require(experiment_id).await?;
        Err(ExperimentError::InvalidTransition {
            id: experiment.id,
            status: experiment.status,
            operation: "export",
        })
    }

    /// Run one interim analysis now and return the monitoring decision
    ///
    /// Does not act on the decision.
    pub async fn run_interim_analysis(&self, experiment_id: &Uuid) -> Result<MonitorDecision> {
        let inner = &self.inner;
        let experiment = inner.manager.require(experiment_id).await?;
        if experiment.status != ExperimentStatus::Running {
            return Err(ExperimentError::InvalidTransition {
                id: experiment.id,
                status: experiment.status,
                operation: "monitor",
            });
        }

        self.flush_recorder().await;
        let events = match inner.events.snapshot(experiment_id).await {
            Ok(events) => events,
            Err(e) if e.is_corruption() => {
                error!("Event log of experiment {} is corrupted: {}", experiment_id, e);
                return Ok(MonitorDecision::DataIntegrityFailure(e.to_string()));
            }
            Err(e) => return Err(ExperimentError::DataCollectionFailed(e.to_string())),
        };

        let statistics = inner.analyzer.analyze(&events, &experiment)?;
        let decision = monitor::evaluate(&experiment, &statistics, Utc::now(), &self.policy());

        debug!(
            "Interim analysis of experiment {}: {} samples, confidence {:.4}, decision {:?}",
            experiment_id,
            events.total(),
            statistics.confidence(),
            decision
        );
        Ok(decision)
    }

    /// Required samples per arm to detect a relative change of the mean
    pub fn calculate_sample_size(
        &self,
        baseline_mean: f64,
        baseline_std: f64,
        min_effect: f64,
        power: f64,
    ) -> Result<usize> {
        SampleSizeCalculator::new(
            baseline_mean,
            baseline_std,
            min_effect,
            power,
            self.inner.config.experiment_defaults.significance_threshold,
        )?
        .calculate()
    }

    /// Recorder counters
    pub fn recorder_stats(&self) -> RecorderStats {
        self.inner.recorder.stats()
    }

    /// Stop all monitoring and flush pending events
    pub async fn shutdown(&self) {
        info!("Shutting down experiment engine");
        self.inner.monitor.shutdown();
        self.inner.recorder.shutdown().await;
    }

    fn policy(&self) -> MonitorPolicy {
        MonitorPolicy {
            early_stop_confidence: self.inner.config.engine.early_stop_confidence,
            min_samples_per_arm: self.inner.config.engine.min_samples_per_arm,
        }
    }

    async fn flush_recorder(&self) {
        if let Err(e) = self.inner.recorder.flush().await {
            warn!("Event recorder flush failed: {}", e);
        }
    }

    async fn stop_with(&self, experiment_id: &Uuid, trigger: StopTrigger) -> Result<ExperimentResult> {
        let inner = &self.inner;
        let tx = inner.manager.lock().await;
        let experiment = inner.manager.begin_stop(&tx, experiment_id).await?;

        let events = match &trigger {
            StopTrigger::Monitor(MonitorDecision::DataIntegrityFailure(_)) => {
                PartitionedEvents::default()
            }
            _ => {
                self.flush_recorder().await;
                match inner.events.snapshot(experiment_id).await {
                    Ok(events) => events,
                    Err(e) if e.is_corruption() => {
                        error!(
                            "Event log of experiment {} is corrupted, concluding without data: {}",
                            experiment_id, e
                        );
                        PartitionedEvents::default()
                    }
                    Err(e) => return Err(ExperimentError::DataCollectionFailed(e.to_string())),
                }
            }
        };

        inner.monitor.deregister(experiment_id);

        match self.conclude(&tx, experiment.clone(), events, trigger).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if experiment.status == ExperimentStatus::Running {
                    warn!(
                        "Stopping experiment {} failed, resuming monitoring: {}",
                        experiment_id, e
                    );
                    self.spawn_monitor(&experiment);
                }
                Err(e)
            }
        }
    }

    async fn conclude(
        &self,
        tx: &TransitionGuard<'_>,
        experiment: Experiment,
        events: PartitionedEvents,
        trigger: StopTrigger,
    ) -> Result<ExperimentResult> {
        let now = Utc::now();
        let statistics = self.inner.analyzer.analyze(&events, &experiment)?;
        let conclusion = ConclusionGenerator::conclude(&statistics, &experiment);
        let recommendations =
            ConclusionGenerator::recommendations(&statistics, &experiment, &conclusion);

        let (status, stop_reason) = match trigger {
            StopTrigger::Caller(reason) => {
                let status = if experiment.max_duration_reached(now) {
                    ExperimentStatus::Completed
                } else {
                    ExperimentStatus::Stopped
                };
                (status, reason)
            }
            StopTrigger::Monitor(decision) => (decision.final_status(), decision.reason()),
        };

        let result = ExperimentResult {
            experiment_id: experiment.id,
            status,
            stop_reason,
            completed_at: now,
            duration_secs: experiment.elapsed(now).as_secs(),
            statistics,
            conclusion,
            recommendations,
            control_data: events.control,
            treatment_data: events.treatment,
        };

        self.inner.manager.finish(tx, experiment, &result).await?;
        Ok(result)
    }

    fn spawn_monitor(&self, experiment: &Experiment) {
        let experiment_id = experiment.id;
        let period = experiment.configuration.monitoring_interval();
        let engine: Weak<EngineInner> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(inner) = engine.upgrade() else {
                    break;
                };
                let engine = ExperimentEngine { inner };

                match engine.run_interim_analysis(&experiment_id).await {
                    Ok(MonitorDecision::Continue) => {}
                    Ok(decision) => {
                        info!(
                            "Monitor stopping experiment {}: {}",
                            experiment_id,
                            decision.reason()
                        );
                        // The stop deregisters this task, so it runs elsewhere
                        tokio::spawn(async move {
                            if let Err(e) = engine
                                .stop_with(&experiment_id, StopTrigger::Monitor(decision))
                                .await
                            {
                                warn!("Monitor stop of experiment {} failed: {}", experiment_id, e);
                            }
                        });
                        break;
                    }
                    Err(ExperimentError::InvalidTransition { status, .. }) => {
                        debug!(
                            "Experiment {} is {}, monitoring ends",
                            experiment_id, status
                        );
                        break;
                    }
                    Err(e) => warn!("Interim analysis of experiment {} failed: {}", experiment_id, e),
                }
            }
        });

        self.inner.monitor.register(experiment_id, task);
        info!(
            "Monitoring experiment {} every {:?}",
            experiment_id, period
        );
    }
}
