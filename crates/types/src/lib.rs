//! Core types and data models for on-device model experiments
//!
//! This crate provides the data structures shared by the storage, collector
//! and decision crates: experiment definitions, recorded data points,
//! statistical results and the final experiment report.

pub mod events;
pub mod experiments;
pub mod results;
pub mod statistics;
pub mod errors;

pub use errors::{ExperimentError, Result};
pub use events::{metric_keys, DataPoint, DeviceInfo, PartitionedEvents};
pub use experiments::*;
pub use results::{ExperimentConclusion, ExperimentReport, ExperimentResult, Recommendation, Winner};
pub use statistics::{
    ConfidenceInterval, EffectMagnitude, EffectSize, ExperimentStatistics, MetricCoverage,
    ModelMetrics, SampleSizes, StatisticalTestResult,
};
