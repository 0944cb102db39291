//! Usage collection
//!
//! Two collectors feed the billing service:
//! - [`ProjectUsageCollector`] integrates daily usage per project
//! - [`DeploymentUsageCollector`] snapshots per-instance usage across the namespace
//!
//! [`UsageScheduler`] drives both on independent periods.

mod deployment;
mod r#loop;
mod project;

#[cfg(test)]
mod tests;

pub use deployment::{
    deployment_items, disk_items, DeploymentCycleSummary, DeploymentUsageCollector,
};
pub use project::{ProjectSyncResult, ProjectUsageCollector};
pub use r#loop::{fan_out, FanOutSummary, ProjectCycleSummary, SchedulerConfig, UsageScheduler};

use crate::billing::BillingError;
use crate::prom::QueryError;

/// Failure of one unit of collection work
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("query for {resource} failed: {source}")]
    Query {
        resource: &'static str,
        #[source]
        source: QueryError,
    },

    #[error("submitting {kind} usage failed: {source}")]
    Submit {
        kind: &'static str,
        #[source]
        source: BillingError,
    },
}
