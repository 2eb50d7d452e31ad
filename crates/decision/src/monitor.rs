//! Running experiment monitoring
//!
//! Holds the registry of per-experiment timer tasks and the pure decision
//! rules evaluated on every interim analysis: maximum duration, rollback
//! guard and early stopping.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use experiment_types::{
    Experiment, ExperimentStatistics, ExperimentStatus, PartitionedEvents, Variant,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

pub const MAX_DURATION_REASON: &str = "Maximum duration reached";
pub const EARLY_STOP_REASON: &str = "Early stopping - significant result detected";
pub const ROLLBACK_REASON: &str = "Rollback threshold exceeded";

/// Outcome of one interim analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorDecision {
    Continue,
    MaxDurationReached,
    EarlyStop,
    RollbackTriggered,
    /// The event log could not be decoded
    DataIntegrityFailure(String),
}

impl MonitorDecision {
    pub fn should_stop(&self) -> bool {
        !matches!(self, Self::Continue)
    }

    /// Stop reason recorded in the result
    pub fn reason(&self) -> String {
        match self {
            Self::Continue => String::new(),
            Self::MaxDurationReached => MAX_DURATION_REASON.to_string(),
            Self::EarlyStop => EARLY_STOP_REASON.to_string(),
            Self::RollbackTriggered => ROLLBACK_REASON.to_string(),
            Self::DataIntegrityFailure(detail) => format!("Data integrity failure: {}", detail),
        }
    }

    /// Terminal status for a monitor-initiated stop
    pub fn final_status(&self) -> ExperimentStatus {
        match self {
            Self::MaxDurationReached | Self::EarlyStop => ExperimentStatus::Completed,
            _ => ExperimentStatus::Stopped,
        }
    }
}

/// Engine-wide thresholds used by the decision rules
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorPolicy {
    pub early_stop_confidence: f64,
    pub min_samples_per_arm: usize,
}

/// Decide whether a running experiment should stop
///
/// Checked in order: maximum duration, rollback guard, early stopping.
pub fn evaluate(
    experiment: &Experiment,
    statistics: &ExperimentStatistics,
    now: DateTime<Utc>,
    policy: &MonitorPolicy,
) -> MonitorDecision {
    let config = &experiment.configuration;

    if experiment.max_duration_reached(now) {
        return MonitorDecision::MaxDurationReached;
    }

    let sizes = &statistics.sample_sizes;
    if sizes.control >= policy.min_samples_per_arm && sizes.treatment >= policy.min_samples_per_arm
    {
        let error_increase =
            statistics.treatment_metrics.error_rate - statistics.control_metrics.error_rate;
        if error_increase > config.rollback_threshold {
            debug!(
                "Experiment {} treatment error rate up {:.4}, threshold {:.4}",
                experiment.id, error_increase, config.rollback_threshold
            );
            return MonitorDecision::RollbackTriggered;
        }
    }

    if config.early_stopping_enabled
        && statistics.confidence() > policy.early_stop_confidence
        && sizes.total() > config.min_sample_size
    {
        return MonitorDecision::EarlyStop;
    }

    MonitorDecision::Continue
}

/// Live progress of an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentStats {
    pub experiment_id: Uuid,
    pub status: ExperimentStatus,
    pub elapsed_secs: u64,
    pub samples_collected: usize,
    pub control_samples: usize,
    pub treatment_samples: usize,
    /// Arm ahead on the primary metric, if both arms reported it
    pub leading_variant: Option<Variant>,
    /// `1 - p` of the most significant test, 0.0 if nothing was tested
    pub current_confidence: f64,
    /// Estimated time both arms reach the minimum sample size
    pub projected_completion: Option<DateTime<Utc>>,
}

impl ExperimentStats {
    pub fn compute(
        experiment: &Experiment,
        events: &PartitionedEvents,
        statistics: &ExperimentStatistics,
        now: DateTime<Utc>,
    ) -> Self {
        let elapsed = experiment.elapsed(now);
        let total = events.total();

        Self {
            experiment_id: experiment.id,
            status: experiment.status,
            elapsed_secs: elapsed.as_secs(),
            samples_collected: total,
            control_samples: events.control.len(),
            treatment_samples: events.treatment.len(),
            leading_variant: Self::leading_variant(experiment, events),
            current_confidence: statistics.confidence(),
            projected_completion: Self::projected_completion(
                experiment.configuration.min_sample_size,
                total,
                elapsed.as_secs_f64(),
                now,
            ),
        }
    }

    fn leading_variant(experiment: &Experiment, events: &PartitionedEvents) -> Option<Variant> {
        let metric = experiment.primary_metric()?;
        let mean = |variant| {
            let samples = events.samples(variant, &metric.name);
            if samples.is_empty() {
                None
            } else {
                Some(samples.iter().sum::<f64>() / samples.len() as f64)
            }
        };

        let control = mean(Variant::Control)?;
        let treatment = mean(Variant::Treatment)?;
        if metric.direction.prefers(treatment, control) {
            Some(Variant::Treatment)
        } else if metric.direction.prefers(control, treatment) {
            Some(Variant::Control)
        } else {
            None
        }
    }

    fn projected_completion(
        min_sample_size: usize,
        total: usize,
        elapsed_secs: f64,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if elapsed_secs <= 0.0 || total == 0 {
            return None;
        }

        let rate = total as f64 / elapsed_secs;
        let remaining = (2 * min_sample_size).saturating_sub(total);
        let secs = remaining as f64 / rate;
        Some(now + chrono::Duration::milliseconds((secs * 1000.0).round() as i64))
    }
}

/// Registry of monitoring tasks, one per running experiment
#[derive(Default)]
pub struct ExperimentMonitor {
    tasks: DashMap<Uuid, JoinHandle<()>>,
}

impl ExperimentMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a monitoring task, aborting any previous one for the experiment
    pub fn register(&self, experiment_id: Uuid, task: JoinHandle<()>) {
        if let Some(previous) = self.tasks.insert(experiment_id, task) {
            previous.abort();
        }
        debug!("Monitoring registered for experiment {}", experiment_id);
    }

    /// Stop monitoring an experiment; the timer never fires again
    pub fn deregister(&self, experiment_id: &Uuid) -> bool {
        match self.tasks.remove(experiment_id) {
            Some((_, task)) => {
                task.abort();
                debug!("Monitoring deregistered for experiment {}", experiment_id);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, experiment_id: &Uuid) -> bool {
        self.tasks
            .get(experiment_id)
            .is_some_and(|task| !task.is_finished())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Abort every monitoring task
    pub fn shutdown(&self) {
        let ids: Vec<Uuid> = self.tasks.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.deregister(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use experiment_types::{
        ExperimentConfiguration, ExperimentModel, ExperimentSpec, ImprovementDirection,
        MetricKind, ModelMetrics, SampleSizes, StatisticalTestResult, SuccessMetric,
    };
    use std::time::Duration;

    const POLICY: MonitorPolicy = MonitorPolicy {
        early_stop_confidence: 0.99,
        min_samples_per_arm: 30,
    };

    fn running() -> Experiment {
        let spec = ExperimentSpec::new(
            "asr",
            ExperimentModel::new("asr", "1", "asr-1"),
            ExperimentModel::new("asr", "2", "asr-2"),
        )
        .with_metric(SuccessMetric::new(
            "accuracy",
            MetricKind::Accuracy,
            ImprovementDirection::Increase,
            1.0,
        ));
        let mut experiment = Experiment::from_spec(spec, ExperimentConfiguration::default());
        experiment.status = ExperimentStatus::Running;
        experiment.start_date = Some(Utc::now());
        experiment
    }

    fn stats(p_value: f64, per_arm: usize) -> ExperimentStatistics {
        ExperimentStatistics {
            tests: vec![StatisticalTestResult {
                metric_name: "accuracy".to_string(),
                test_name: "Welch's t-test".to_string(),
                control_mean: 0.8,
                treatment_mean: 0.9,
                t_statistic: 5.0,
                degrees_of_freedom: 100.0,
                p_value,
                is_significant: p_value < 0.05,
                power: 0.99,
            }],
            sample_sizes: SampleSizes {
                control: per_arm,
                treatment: per_arm,
                adequate_power: per_arm >= 100,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_continue_without_evidence() {
        let decision = evaluate(&running(), &stats(0.2, 200), Utc::now(), &POLICY);
        assert_eq!(decision, MonitorDecision::Continue);
        assert!(!decision.should_stop());
    }

    #[test]
    fn test_early_stop_needs_confidence_and_samples() {
        let experiment = running();
        assert_eq!(
            evaluate(&experiment, &stats(0.001, 60), Utc::now(), &POLICY),
            MonitorDecision::EarlyStop
        );
        // 50 + 50 is not more than the minimum of 100
        assert_eq!(
            evaluate(&experiment, &stats(0.001, 50), Utc::now(), &POLICY),
            MonitorDecision::Continue
        );
        // Significant, but not confident enough to stop early
        assert_eq!(
            evaluate(&experiment, &stats(0.02, 60), Utc::now(), &POLICY),
            MonitorDecision::Continue
        );

        let mut disabled = experiment.clone();
        disabled.configuration.early_stopping_enabled = false;
        assert_eq!(
            evaluate(&disabled, &stats(0.001, 60), Utc::now(), &POLICY),
            MonitorDecision::Continue
        );
    }

    #[test]
    fn test_max_duration_takes_precedence() {
        let experiment = running();
        let later = Utc::now() + chrono::Duration::days(8);
        let decision = evaluate(&experiment, &stats(0.001, 60), later, &POLICY);

        assert_eq!(decision, MonitorDecision::MaxDurationReached);
        assert_eq!(decision.reason(), "Maximum duration reached");
        assert_eq!(decision.final_status(), ExperimentStatus::Completed);
    }

    #[test]
    fn test_rollback_guard() {
        let experiment = running();
        let mut statistics = stats(0.5, 40);
        statistics.control_metrics = ModelMetrics {
            error_rate: 0.02,
            ..Default::default()
        };
        statistics.treatment_metrics = ModelMetrics {
            error_rate: 0.10,
            ..Default::default()
        };

        let decision = evaluate(&experiment, &statistics, Utc::now(), &POLICY);
        assert_eq!(decision, MonitorDecision::RollbackTriggered);
        assert_eq!(decision.final_status(), ExperimentStatus::Stopped);

        // Too few samples to trust the error rate
        statistics.sample_sizes.treatment = 10;
        assert_eq!(
            evaluate(&experiment, &statistics, Utc::now(), &POLICY),
            MonitorDecision::Continue
        );
    }

    #[test]
    fn test_integrity_failure_reason() {
        let decision = MonitorDecision::DataIntegrityFailure("bad json".to_string());
        assert!(decision.should_stop());
        assert_eq!(decision.reason(), "Data integrity failure: bad json");
        assert_eq!(decision.final_status(), ExperimentStatus::Stopped);
    }

    #[test]
    fn test_projected_completion() {
        let now = Utc::now();
        // 50 samples in 100 s, 150 more needed at 0.5/s
        let eta = ExperimentStats::projected_completion(100, 50, 100.0, now).unwrap();
        assert_eq!((eta - now).num_seconds(), 300);

        // Target already reached
        let done = ExperimentStats::projected_completion(100, 250, 100.0, now).unwrap();
        assert_eq!(done, now);

        assert!(ExperimentStats::projected_completion(100, 0, 100.0, now).is_none());
        assert!(ExperimentStats::projected_completion(100, 10, 0.0, now).is_none());
    }

    #[test]
    fn test_stats_leading_variant() {
        use experiment_types::{DataPoint, DeviceInfo};
        use std::collections::HashMap;

        let experiment = running();
        let point = |variant, accuracy: f64| {
            DataPoint::new(
                "u",
                variant,
                HashMap::from([("accuracy".to_string(), accuracy)]),
                DeviceInfo::default(),
            )
        };
        let events: PartitionedEvents = vec![
            point(Variant::Control, 0.7),
            point(Variant::Treatment, 0.9),
            point(Variant::Treatment, 0.8),
        ]
        .into_iter()
        .collect();

        let stats = ExperimentStats::compute(
            &experiment,
            &events,
            &ExperimentStatistics::default(),
            Utc::now(),
        );
        assert_eq!(stats.samples_collected, 3);
        assert_eq!(stats.treatment_samples, 2);
        assert_eq!(stats.leading_variant, Some(Variant::Treatment));
        assert_eq!(stats.current_confidence, 0.0);
    }

    #[tokio::test]
    async fn test_registry_aborts_on_deregister() {
        let monitor = ExperimentMonitor::new();
        let id = Uuid::new_v4();
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        monitor.register(id, task);
        assert!(monitor.is_registered(&id));
        assert!(monitor.deregister(&id));
        assert!(!monitor.is_registered(&id));
        assert!(!monitor.deregister(&id));
        assert!(monitor.is_empty());
    }
}
