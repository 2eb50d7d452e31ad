//! Statistical analysis of experiment data
//!
//! Turns a snapshot of recorded data points into per-metric tests, effect
//! sizes and confidence intervals. Metrics with too few samples in either
//! arm are skipped and reported as coverage gaps.

use experiment_types::{
    metric_keys, ConfidenceInterval, DataPoint, EffectSize, Experiment, ExperimentStatistics,
    MetricCoverage, ModelMetrics, PartitionedEvents, Result, SampleSizes, StatisticalTestResult,
    Variant,
};
use tracing::debug;

use crate::statistical::{StatisticalTest, WelchTTest};

/// Samples per arm below which a metric is not tested
pub const DEFAULT_MIN_SAMPLES_PER_ARM: usize = 30;

/// Confidence level of the reported intervals
pub const CONFIDENCE_LEVEL: f64 = 0.95;

const TEST_NAME: &str = "Welch's t-test";

/// Statistical analyzer
#[derive(Debug, Clone)]
pub struct StatisticalAnalyzer {
    min_samples_per_arm: usize,
}

impl Default for StatisticalAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SAMPLES_PER_ARM)
    }
}

impl StatisticalAnalyzer {
    pub fn new(min_samples_per_arm: usize) -> Self {
        Self {
            min_samples_per_arm: min_samples_per_arm.max(2),
        }
    }

    pub fn min_samples_per_arm(&self) -> usize {
        self.min_samples_per_arm
    }

    /// Analyze an unpartitioned list of data points
    pub fn analyze_points(
        &self,
        points: &[DataPoint],
        experiment: &Experiment,
    ) -> Result<ExperimentStatistics> {
        let events: PartitionedEvents = points.iter().cloned().collect();
        self.analyze(&events, experiment)
    }

    /// Analyze a partitioned event snapshot
    pub fn analyze(
        &self,
        events: &PartitionedEvents,
        experiment: &Experiment,
    ) -> Result<ExperimentStatistics> {
        let config = &experiment.configuration;
        let mut statistics = ExperimentStatistics {
            control_metrics: Self::model_metrics(&events.control),
            treatment_metrics: Self::model_metrics(&events.treatment),
            sample_sizes: SampleSizes {
                control: events.control.len(),
                treatment: events.treatment.len(),
                adequate_power: events.control.len() >= config.min_sample_size
                    && events.treatment.len() >= config.min_sample_size,
            },
            ..Default::default()
        };

        for metric in &experiment.success_metrics {
            let control = events.samples(Variant::Control, &metric.name);
            let treatment = events.samples(Variant::Treatment, &metric.name);
            let tested = control.len() >= self.min_samples_per_arm
                && treatment.len() >= self.min_samples_per_arm;

            statistics.coverage.push(MetricCoverage {
                metric_name: metric.name.clone(),
                control_samples: control.len(),
                treatment_samples: treatment.len(),
                tested,
            });

            if !tested {
                debug!(
                    "Skipping metric {} for experiment {}: {} control / {} treatment samples, need {}",
                    metric.name,
                    experiment.id,
                    control.len(),
                    treatment.len(),
                    self.min_samples_per_arm
                );
                continue;
            }

            let welch = WelchTTest::new(&control, &treatment)?;
            let p_value = welch.test()?;

            statistics.tests.push(StatisticalTestResult {
                metric_name: metric.name.clone(),
                test_name: TEST_NAME.to_string(),
                control_mean: welch.control.mean,
                treatment_mean: welch.treatment.mean,
                t_statistic: welch.t_statistic(),
                degrees_of_freedom: welch.degrees_of_freedom(),
                p_value,
                is_significant: p_value < config.significance_threshold,
                power: welch.power(config.significance_threshold)?,
            });
            statistics
                .effect_sizes
                .push(EffectSize::new(metric.name.clone(), welch.cohens_d()));
            statistics.confidence_intervals.push(ConfidenceInterval::new(
                metric.name.clone(),
                CONFIDENCE_LEVEL,
                welch.difference(),
                welch.margin_of_error(CONFIDENCE_LEVEL)?,
            ));
        }

        Ok(statistics)
    }

    /// Per-arm means of the well-known metric keys, 0.0 when absent
    pub fn model_metrics(points: &[DataPoint]) -> ModelMetrics {
        let mean = |key: &str| {
            let (sum, count) = points
                .iter()
                .filter_map(|p| p.metric(key))
                .filter(|v| v.is_finite())
                .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
            if count == 0 {
                0.0
            } else {
                sum / count as f64
            }
        };

        ModelMetrics {
            accuracy: mean(metric_keys::ACCURACY),
            latency: mean(metric_keys::LATENCY),
            memory_usage: mean(metric_keys::MEMORY_USAGE),
            error_rate: mean(metric_keys::ERROR_RATE),
            user_satisfaction: mean(metric_keys::USER_SATISFACTION),
            completion_rate: mean(metric_keys::COMPLETION_RATE),
            confidence: mean(metric_keys::CONFIDENCE),
        }
    }
}
