//! Experiment definition types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Status of an experiment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Stopped,
}

impl ExperimentStatus {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }

    /// Whether the experiment holds the single active slot
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// One of the two experiment arms
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Control,
    Treatment,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Treatment => "treatment",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment risk attached to a model variant
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

/// A model taking part in an experiment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentModel {
    /// Display name
    pub name: String,
    /// Model version string
    pub version: String,
    /// Identifier understood by the model catalog and validator
    pub model_id: String,
    /// Deployment risk
    pub risk_level: RiskLevel,
}

impl ExperimentModel {
    /// Create a low-risk model reference
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            model_id: model_id.into(),
            risk_level: RiskLevel::Low,
        }
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }
}

/// How the allocator picks the hash input
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
    /// Fresh token per call, not reproducible
    Random,
    UserId,
    DeviceId,
    /// Region based split, currently keyed by device id
    Geographic,
}

/// Declared traffic split between the two arms
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrafficSplit {
    /// Percentage of traffic routed to control (0-100)
    pub control_percentage: f64,
    /// Percentage of traffic routed to treatment (0-100)
    pub treatment_percentage: f64,
    /// Hash input selection
    pub method: AllocationMethod,
}

impl TrafficSplit {
    pub fn new(control_percentage: f64, treatment_percentage: f64, method: AllocationMethod) -> Self {
        Self {
            control_percentage,
            treatment_percentage,
            method,
        }
    }

    /// 50/50 split keyed by user id
    pub fn even() -> Self {
        Self::new(50.0, 50.0, AllocationMethod::UserId)
    }
}

/// Kind of a success metric
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Accuracy,
    Latency,
    MemoryUsage,
    ErrorRate,
    UserSatisfaction,
    CompletionRate,
    Custom,
}

/// Which direction counts as an improvement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementDirection {
    Increase,
    Decrease,
}

impl ImprovementDirection {
    /// Whether `candidate` is better than `baseline` in this direction
    pub fn prefers(&self, candidate: f64, baseline: f64) -> bool {
        match self {
            Self::Increase => candidate > baseline,
            Self::Decrease => candidate < baseline,
        }
    }
}

/// Metric an experiment is judged on
///
/// `name` is the key looked up in every recorded data point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuccessMetric {
    pub name: String,
    pub kind: MetricKind,
    /// Target value the team hopes to reach
    pub target: f64,
    pub direction: ImprovementDirection,
    /// Relative weight, all weights sum to 1.0
    pub weight: f64,
}

impl SuccessMetric {
    pub fn new(
        name: impl Into<String>,
        kind: MetricKind,
        direction: ImprovementDirection,
        weight: f64,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            target: 0.0,
            direction,
            weight,
        }
    }

    pub fn with_target(mut self, target: f64) -> Self {
        self.target = target;
        self
    }
}

/// Devices eligible for enrollment; empty lists match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TargetAudience {
    pub device_models: Vec<String>,
    pub regions: Vec<String>,
    /// Minimum dotted OS version, e.g. "17.2"
    pub min_os_version: Option<String>,
}

impl TargetAudience {
    /// Audience matching every device
    pub fn everyone() -> Self {
        Self::default()
    }
}

/// Runtime configuration of an experiment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExperimentConfiguration {
    /// Hard ceiling on experiment duration
    pub max_duration_secs: u64,
    /// Samples per arm required for adequate power
    pub min_sample_size: usize,
    /// Alpha for the per-metric tests
    pub significance_threshold: f64,
    pub early_stopping_enabled: bool,
    /// Maximum tolerated increase of the treatment error rate
    pub rollback_threshold: f64,
    /// Interim analysis period
    pub monitoring_interval_secs: u64,
}

impl ExperimentConfiguration {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring_interval_secs)
    }
}

impl Default for ExperimentConfiguration {
    fn default() -> Self {
        Self {
            max_duration_secs: 7 * 24 * 60 * 60,
            min_sample_size: 100,
            significance_threshold: 0.05,
            early_stopping_enabled: true,
            rollback_threshold: 0.05,
            monitoring_interval_secs: 300,
        }
    }
}

/// Caller supplied description of a new experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub name: String,
    pub description: String,
    pub hypothesis: String,
    pub control: ExperimentModel,
    pub treatment: ExperimentModel,
    pub traffic_split: TrafficSplit,
    pub success_metrics: Vec<SuccessMetric>,
    pub target_audience: TargetAudience,
    /// Engine defaults apply when absent
    pub configuration: Option<ExperimentConfiguration>,
}

impl ExperimentSpec {
    /// Create a spec with an even split and no metrics
    pub fn new(name: impl Into<String>, control: ExperimentModel, treatment: ExperimentModel) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            hypothesis: String::new(),
            control,
            treatment,
            traffic_split: TrafficSplit::even(),
            success_metrics: Vec::new(),
            target_audience: TargetAudience::everyone(),
            configuration: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_hypothesis(mut self, hypothesis: impl Into<String>) -> Self {
        self.hypothesis = hypothesis.into();
        self
    }

    pub fn with_traffic_split(mut self, split: TrafficSplit) -> Self {
        self.traffic_split = split;
        self
    }

    pub fn with_metric(mut self, metric: SuccessMetric) -> Self {
        self.success_metrics.push(metric);
        self
    }

    pub fn with_audience(mut self, audience: TargetAudience) -> Self {
        self.target_audience = audience;
        self
    }

    pub fn with_configuration(mut self, configuration: ExperimentConfiguration) -> Self {
        self.configuration = Some(configuration);
        self
    }
}

/// A/B experiment comparing a control and a treatment model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    /// Unique experiment identifier
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub hypothesis: String,
    pub control: ExperimentModel,
    pub treatment: ExperimentModel,
    pub traffic_split: TrafficSplit,
    pub success_metrics: Vec<SuccessMetric>,
    pub target_audience: TargetAudience,
    pub configuration: ExperimentConfiguration,
    /// Current status
    pub status: ExperimentStatus,
    pub created_at: DateTime<Utc>,
    /// Set when the experiment starts running
    pub start_date: Option<DateTime<Utc>>,
    /// Set when the experiment reaches a terminal status
    pub end_date: Option<DateTime<Utc>>,
}

impl Experiment {
    /// Build a draft experiment from a spec and its resolved configuration
    pub fn from_spec(spec: ExperimentSpec, configuration: ExperimentConfiguration) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: spec.name,
            description: spec.description,
            hypothesis: spec.hypothesis,
            control: spec.control,
            treatment: spec.treatment,
            traffic_split: spec.traffic_split,
            success_metrics: spec.success_metrics,
            target_audience: spec.target_audience,
            configuration,
            status: ExperimentStatus::Draft,
            created_at: Utc::now(),
            start_date: None,
            end_date: None,
        }
    }

    /// The first listed metric decides the winner
    pub fn primary_metric(&self) -> Option<&SuccessMetric> {
        self.success_metrics.first()
    }

    /// Model serving the given arm
    pub fn model(&self, variant: Variant) -> &ExperimentModel {
        match variant {
            Variant::Control => &self.control,
            Variant::Treatment => &self.treatment,
        }
    }

    /// Wall-clock time since start, zero if never started
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        self.start_date
            .and_then(|start| (now - start).to_std().ok())
            .unwrap_or_default()
    }

    /// Whether the configured maximum duration has passed
    pub fn max_duration_reached(&self, now: DateTime<Utc>) -> bool {
        self.start_date.is_some() && self.elapsed(now) >= self.configuration.max_duration()
    }
}
