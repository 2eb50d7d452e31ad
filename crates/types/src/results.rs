//! Experiment conclusions and exported reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{
    events::DataPoint,
    experiments::{ExperimentStatus, Variant},
    statistics::ExperimentStatistics,
};

/// Schema version written into exported reports
pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// Winning arm of a concluded experiment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Winner {
    Control,
    Treatment,
    Inconclusive,
}

impl From<Variant> for Winner {
    fn from(variant: Variant) -> Self {
        match variant {
            Variant::Control => Self::Control,
            Variant::Treatment => Self::Treatment,
        }
    }
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Control => "Control",
            Self::Treatment => "Treatment",
            Self::Inconclusive => "Inconclusive",
        };
        f.write_str(s)
    }
}

/// Deployment recommendation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    DeployTreatment,
    KeepControl,
    RunLonger,
    RedesignExperiment,
    Inconclusive,
}

/// Human readable verdict of an experiment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentConclusion {
    pub winner: Winner,
    /// `1 - p` of the primary metric test, 0.0 if inconclusive
    pub confidence: f64,
    pub summary: String,
    pub business_impact: String,
    pub recommendation: Recommendation,
    pub risk_assessment: String,
}

/// Terminal artifact produced exactly once per experiment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentResult {
    pub experiment_id: Uuid,
    /// Final status, completed or stopped
    pub status: ExperimentStatus,
    pub stop_reason: String,
    pub completed_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub statistics: ExperimentStatistics,
    pub conclusion: ExperimentConclusion,
    pub recommendations: Vec<String>,
    pub control_data: Vec<DataPoint>,
    pub treatment_data: Vec<DataPoint>,
}

/// Serializable export of an experiment result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentReport {
    pub schema_version: String,
    pub exported_at: DateTime<Utc>,
    pub result: ExperimentResult,
}

impl ExperimentReport {
    pub fn new(result: ExperimentResult) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            exported_at: Utc::now(),
            result,
        }
    }

    /// Pretty printed JSON encoding
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> ExperimentResult {
        ExperimentResult {
            experiment_id: Uuid::new_v4(),
            status: ExperimentStatus::Completed,
            stop_reason: "Maximum duration reached".to_string(),
            completed_at: Utc::now(),
            duration_secs: 3600,
            statistics: ExperimentStatistics::default(),
            conclusion: ExperimentConclusion {
                winner: Winner::Inconclusive,
                confidence: 0.0,
                summary: "No significant difference".to_string(),
                business_impact: "Minimal impact".to_string(),
                recommendation: Recommendation::RunLonger,
                risk_assessment: "No significant risks identified".to_string(),
            },
            recommendations: vec![],
            control_data: vec![],
            treatment_data: vec![],
        }
    }

    #[test]
    fn test_report_json_layout() {
        let report = ExperimentReport::new(result());
        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["schema_version"], "1.0");
        assert_eq!(value["result"]["status"], "completed");
        assert_eq!(value["result"]["conclusion"]["recommendation"], "run_longer");
        assert_eq!(value["result"]["conclusion"]["winner"], "Inconclusive");
        assert_eq!(ExperimentReport::from_json(&json).unwrap(), report);
    }

    #[test]
    fn test_winner_display() {
        assert_eq!(Winner::from(Variant::Treatment).to_string(), "Treatment");
        assert_eq!(Winner::Inconclusive.to_string(), "Inconclusive");
    }
}
