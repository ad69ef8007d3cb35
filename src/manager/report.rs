//! Pass reports
//!
//! A summary of what one reconciliation pass saw and did, kept for the API
//! and fed to the metrics.

use super::Decision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one class in a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassOutcome {
    pub class: String,
    /// Cluster utilization seen at the start of the pass
    pub utilization: u32,
    /// Total size in GiB seen at the start of the pass
    pub total_size_gb: u64,
    pub decision: Decision,
    pub devices_added: usize,
    pub devices_removed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClassOutcome {
    pub(crate) fn new(class: &str, utilization: u32, total_size_gb: u64, decision: Decision) -> Self {
        Self {
            class: class.to_string(),
            utilization,
            total_size_gb,
            decision,
            devices_added: 0,
            devices_removed: 0,
            error: None,
        }
    }
}

/// Result of a whole pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub classes: Vec<ClassOutcome>,
    /// Error returned by the pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PassReport {
    /// Whether the pass returned without error
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Devices added across all classes
    pub fn devices_added(&self) -> usize {
        self.classes.iter().map(|c| c.devices_added).sum()
    }

    /// Devices removed across all classes
    pub fn devices_removed(&self) -> usize {
        self.classes.iter().map(|c| c.devices_removed).sum()
    }

    /// Outcome of a class by name
    pub fn class(&self, name: &str) -> Option<&ClassOutcome> {
        self.classes.iter().find(|c| c.class == name)
    }
}
