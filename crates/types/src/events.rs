//! Recorded experiment events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::experiments::Variant;

/// Well-known metric keys used to build per-variant model metrics
pub mod metric_keys {
    pub const ACCURACY: &str = "accuracy";
    /// Seconds
    pub const LATENCY: &str = "latency";
    /// Megabytes
    pub const MEMORY_USAGE: &str = "memory_usage";
    /// Fraction in 0..=1
    pub const ERROR_RATE: &str = "error_rate";
    pub const USER_SATISFACTION: &str = "user_satisfaction";
    pub const COMPLETION_RATE: &str = "completion_rate";
    pub const CONFIDENCE: &str = "confidence";
}

/// Device and environment descriptor attached to each event
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_model: String,
    pub os_version: String,
    pub region: Option<String>,
}

impl DeviceInfo {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, device_model: impl Into<String>) -> Self {
        self.device_model = device_model.into();
        self
    }

    pub fn with_os_version(mut self, os_version: impl Into<String>) -> Self {
        self.os_version = os_version.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// One observation from a user interaction
///
/// Data points are immutable once written; the event log only appends
/// them and prunes them by age.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub variant: Variant,
    pub metrics: HashMap<String, f64>,
    pub device: DeviceInfo,
}

impl DataPoint {
    pub fn new(
        user_id: impl Into<String>,
        variant: Variant,
        metrics: HashMap<String, f64>,
        device: DeviceInfo,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id: user_id.into(),
            variant,
            metrics,
            device,
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Remove NaN and infinite metric values, returning their names
    ///
    /// JSON has no encoding for them, so they must not reach the event log.
    pub fn drop_non_finite(&mut self) -> Vec<String> {
        let rejected: Vec<String> = self
            .metrics
            .iter()
            .filter(|(_, value)| !value.is_finite())
            .map(|(name, _)| name.clone())
            .collect();
        for name in &rejected {
            self.metrics.remove(name);
        }
        rejected
    }
}

/// Event snapshot split by arm
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PartitionedEvents {
    pub control: Vec<DataPoint>,
    pub treatment: Vec<DataPoint>,
}

impl PartitionedEvents {
    pub fn total(&self) -> usize {
        self.control.len() + self.treatment.len()
    }

    /// Numeric samples of one metric for one arm
    pub fn samples(&self, variant: Variant, metric: &str) -> Vec<f64> {
        self.arm(variant)
            .iter()
            .filter_map(|p| p.metric(metric))
            .filter(|v| v.is_finite())
            .collect()
    }

    pub fn arm(&self, variant: Variant) -> &[DataPoint] {
        match variant {
            Variant::Control => &self.control,
            Variant::Treatment => &self.treatment,
        }
    }
}

impl FromIterator<DataPoint> for PartitionedEvents {
    fn from_iter<I: IntoIterator<Item = DataPoint>>(iter: I) -> Self {
        let mut events = Self::default();
        for point in iter {
            match point.variant {
                Variant::Control => events.control.push(point),
                Variant::Treatment => events.treatment.push(point),
            }
        }
        events
    }
}
