//! Experiment decision engine
//!
//! This crate provides the decision-making logic for on-device model
//! experiments: lifecycle management, deterministic traffic allocation,
//! Welch's t-test based significance testing, background monitoring with
//! early stopping, and the final conclusion and recommendation.

pub mod allocator;
pub mod analyzer;
pub mod collaborators;
pub mod conclusion;
pub mod engine;
pub mod lifecycle;
pub mod monitor;
pub mod statistical;

pub use allocator::TrafficAllocator;
pub use analyzer::StatisticalAnalyzer;
pub use collaborators::{
    Collaborators, ModelCatalog, ModelValidator, ResourceProbe, ValidationReport, ValidationStatus,
};
pub use conclusion::ConclusionGenerator;
pub use engine::ExperimentEngine;
pub use lifecycle::{ExperimentManager, TransitionGuard};
pub use monitor::{ExperimentMonitor, ExperimentStats, MonitorDecision, MonitorPolicy};
pub use statistical::{SampleSizeCalculator, SampleSummary, StatisticalTest, WelchTTest};

pub use experiment_types::{ExperimentError, Result};
