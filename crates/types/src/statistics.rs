//! Statistical analysis results

use serde::{Deserialize, Serialize};

/// Aggregated per-variant model metrics
///
/// Each field is the mean of the same-named metric key over the arm, or
/// 0.0 when no data point carried it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelMetrics {
    pub accuracy: f64,
    /// Seconds
    pub latency: f64,
    /// Megabytes
    pub memory_usage: f64,
    pub error_rate: f64,
    pub user_satisfaction: f64,
    pub completion_rate: f64,
    pub confidence: f64,
}

/// Result of a two-sample test on one metric
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticalTestResult {
    pub metric_name: String,
    /// Test used, e.g. "Welch's t-test"
    pub test_name: String,
    pub control_mean: f64,
    pub treatment_mean: f64,
    pub t_statistic: f64,
    /// Welch-Satterthwaite degrees of freedom
    pub degrees_of_freedom: f64,
    pub p_value: f64,
    pub is_significant: bool,
    /// Probability of detecting the observed effect at this sample size
    pub power: f64,
}

impl StatisticalTestResult {
    pub fn confidence(&self) -> f64 {
        1.0 - self.p_value
    }
}

/// Cohen's d magnitude bucket
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EffectMagnitude {
    Small,
    Medium,
    Large,
}

impl EffectMagnitude {
    /// Classify |d|: small below 0.2, medium below 0.5, large otherwise
    pub fn classify(cohens_d: f64) -> Self {
        let d = cohens_d.abs();
        if d < 0.2 {
            Self::Small
        } else if d < 0.5 {
            Self::Medium
        } else {
            Self::Large
        }
    }
}

/// Standardized mean difference for one metric
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EffectSize {
    pub metric_name: String,
    pub cohens_d: f64,
    pub magnitude: EffectMagnitude,
    pub practically_significant: bool,
}

impl EffectSize {
    pub fn new(metric_name: impl Into<String>, cohens_d: f64) -> Self {
        let magnitude = EffectMagnitude::classify(cohens_d);
        Self {
            metric_name: metric_name.into(),
            cohens_d,
            magnitude,
            practically_significant: magnitude != EffectMagnitude::Small,
        }
    }
}

/// Confidence interval on the treatment minus control mean difference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceInterval {
    pub metric_name: String,
    pub level: f64,
    pub difference: f64,
    pub lower: f64,
    pub upper: f64,
    pub includes_zero: bool,
}

impl ConfidenceInterval {
    pub fn new(metric_name: impl Into<String>, level: f64, difference: f64, margin: f64) -> Self {
        let lower = difference - margin;
        let upper = difference + margin;
        Self {
            metric_name: metric_name.into(),
            level,
            difference,
            lower,
            upper,
            includes_zero: lower <= 0.0 && upper >= 0.0,
        }
    }
}

/// Sample counts per arm
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SampleSizes {
    pub control: usize,
    pub treatment: usize,
    /// Both arms reached the configured minimum sample size
    pub adequate_power: bool,
}

impl SampleSizes {
    pub fn total(&self) -> usize {
        self.control + self.treatment
    }
}

/// How many samples of one success metric each arm produced
///
/// A metric below the per-arm minimum is reported here with
/// `tested == false` instead of as a non-significant test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricCoverage {
    pub metric_name: String,
    pub control_samples: usize,
    pub treatment_samples: usize,
    pub tested: bool,
}

impl MetricCoverage {
    pub fn total(&self) -> usize {
        self.control_samples + self.treatment_samples
    }
}

/// Full analysis of an experiment's collected data
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExperimentStatistics {
    pub control_metrics: ModelMetrics,
    pub treatment_metrics: ModelMetrics,
    pub tests: Vec<StatisticalTestResult>,
    pub effect_sizes: Vec<EffectSize>,
    pub confidence_intervals: Vec<ConfidenceInterval>,
    pub sample_sizes: SampleSizes,
    /// One entry per declared success metric
    pub coverage: Vec<MetricCoverage>,
}

impl ExperimentStatistics {
    pub fn test_for(&self, metric_name: &str) -> Option<&StatisticalTestResult> {
        self.tests.iter().find(|t| t.metric_name == metric_name)
    }

    pub fn effect_size_for(&self, metric_name: &str) -> Option<&EffectSize> {
        self.effect_sizes.iter().find(|e| e.metric_name == metric_name)
    }

    pub fn interval_for(&self, metric_name: &str) -> Option<&ConfidenceInterval> {
        self.confidence_intervals
            .iter()
            .find(|c| c.metric_name == metric_name)
    }

    pub fn coverage_for(&self, metric_name: &str) -> Option<&MetricCoverage> {
        self.coverage.iter().find(|c| c.metric_name == metric_name)
    }

    /// Test with the smallest p-value
    pub fn most_significant(&self) -> Option<&StatisticalTestResult> {
        self.tests
            .iter()
            .min_by(|a, b| a.p_value.total_cmp(&b.p_value))
    }

    /// `1 - p` of the most significant test, 0.0 when nothing was tested
    pub fn confidence(&self) -> f64 {
        self.most_significant().map(|t| t.confidence()).unwrap_or(0.0)
    }
}
