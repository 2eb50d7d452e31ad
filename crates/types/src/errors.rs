//! Error types for experiment operations

use thiserror::Error;
use uuid::Uuid;

use crate::experiments::ExperimentStatus;

/// Result type alias for experiment operations
pub type Result<T> = std::result::Result<T, ExperimentError>;

/// Main error type for experiment operations
#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("Experiment not found: {0}")]
    ExperimentNotFound(Uuid),

    #[error("Experiment {0} is already running")]
    ExperimentAlreadyRunning(Uuid),

    #[error("Invalid traffic split: {0}")]
    InvalidTrafficSplit(String),

    #[error("Invalid model {model_id}: {}", .issues.join("; "))]
    InvalidModel { model_id: String, issues: Vec<String> },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Insufficient resources: {available_mb} MB available, {required_mb} MB required")]
    InsufficientResources { available_mb: u64, required_mb: u64 },

    #[error("Data collection failed: {0}")]
    DataCollectionFailed(String),

    #[error("Analysis error: {0}")]
    AnalysisError(String),

    #[error("Cannot {operation} experiment {id} in status {status}")]
    InvalidTransition {
        id: Uuid,
        status: ExperimentStatus,
        operation: &'static str,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
