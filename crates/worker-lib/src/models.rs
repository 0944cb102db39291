//! Core data models for the usage worker
//!
//! Everything here is built fresh for one cycle and dropped after submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant project discovered from the billing service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    #[serde(default)]
    pub location: String,
}

/// Projects returned by a location lookup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorLocation {
    #[serde(default)]
    pub projects: Vec<Project>,
}

/// One calendar day (UTC) over which project usage is integrated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Lookback expression handed to the metrics store
    pub duration_label: &'static str,
    /// Seconds elapsed inside the window, capped at one full day
    pub range_seconds: i64,
}

/// A single named scalar usage value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageResource {
    pub name: String,
    pub value: String,
}

/// Daily usage for one project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUsageReport {
    pub location: String,
    pub project_id: i64,
    pub at: DateTime<Utc>,
    pub resources: Vec<UsageResource>,
}

/// Identity label of a raw vector sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceName {
    Pod(String),
    Service(String),
    Volume(String),
}

impl InstanceName {
    pub fn as_str(&self) -> &str {
        match self {
            InstanceName::Pod(name) | InstanceName::Service(name) | InstanceName::Volume(name) => {
                name
            }
        }
    }
}

/// One raw sample from an instant vector query
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceVector {
    pub instance: InstanceName,
    /// Unix seconds
    pub timestamp: i64,
    /// Undecoded sample value
    pub value: String,
}

/// One point of a range (matrix) query
#[derive(Debug, Clone, PartialEq)]
pub struct RangePoint {
    pub timestamp: f64,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentUsageItem {
    pub project_id: i64,
    pub deployment_name: String,
    pub name: String,
    pub pod: String,
    pub value: f64,
    pub at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskUsageItem {
    pub project_id: i64,
    pub disk_name: String,
    pub name: String,
    pub value: f64,
    pub at: i64,
}

/// Batch of per-instance deployment samples for one metric kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentUsageReport {
    pub location: String,
    pub list: Vec<DeploymentUsageItem>,
}

/// Batch of per-volume samples for one disk metric kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskUsageReport {
    pub location: String,
    pub list: Vec<DiskUsageItem>,
}
