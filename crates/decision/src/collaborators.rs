//! Interfaces to the host platform
//!
//! The engine never loads or runs models itself. It asks the host whether
//! a model exists, whether it looks healthy and how much memory is left.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of a quick model health check
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Passed,
    Warning,
    Critical,
}

/// Validator verdict with the issues it found
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    pub status: ValidationStatus,
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn passed() -> Self {
        Self {
            status: ValidationStatus::Passed,
            issues: Vec::new(),
        }
    }

    pub fn with_issue(status: ValidationStatus, issue: impl Into<String>) -> Self {
        Self {
            status,
            issues: vec![issue.into()],
        }
    }

    pub fn is_critical(&self) -> bool {
        self.status == ValidationStatus::Critical
    }
}

/// Model health validation
#[async_trait]
pub trait ModelValidator: Send + Sync {
    async fn quick_validate(&self, model_id: &str) -> ValidationReport;
}

/// Installed model lookup
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn model_exists(&self, model_id: &str) -> bool;
}

/// Device memory probe
pub trait ResourceProbe: Send + Sync {
    fn available_memory_mb(&self) -> u64;
}

/// Host collaborators handed to the engine
#[derive(Clone)]
pub struct Collaborators {
    pub validator: Arc<dyn ModelValidator>,
    pub catalog: Arc<dyn ModelCatalog>,
    pub resources: Arc<dyn ResourceProbe>,
}

impl Collaborators {
    pub fn new(
        validator: Arc<dyn ModelValidator>,
        catalog: Arc<dyn ModelCatalog>,
        resources: Arc<dyn ResourceProbe>,
    ) -> Self {
        Self {
            validator,
            catalog,
            resources,
        }
    }
}
