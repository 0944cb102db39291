//! Daily per-project usage
//!
//! A window is all-or-nothing: the six resources are queried in order and
//! the first failure drops the whole window, so billing never sees a
//! partially filled day.

use super::CollectError;
use crate::billing::BillingApi;
use crate::models::{Project, ProjectUsageReport, UsageResource, UsageWindow};
use crate::observability::{StructuredLogger, WorkerMetrics};
use crate::prom::{MetricsGateway, ProjectResource, QueryBuilder};
use crate::window::usage_windows;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

const KIND: &str = "project";

/// Outcome of syncing every window due for one project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectSyncResult {
    pub windows: usize,
    pub submitted: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ProjectUsageCollector {
    gateway: Arc<dyn MetricsGateway>,
    billing: Arc<dyn BillingApi>,
    queries: QueryBuilder,
    location: String,
    metrics: WorkerMetrics,
    logger: StructuredLogger,
}

impl ProjectUsageCollector {
    pub fn new(
        gateway: Arc<dyn MetricsGateway>,
        billing: Arc<dyn BillingApi>,
        queries: QueryBuilder,
        location: impl Into<String>,
    ) -> Self {
        let location = location.into();
        Self {
            gateway,
            billing,
            queries,
            logger: StructuredLogger::new(location.clone()),
            location,
            metrics: WorkerMetrics::new(),
        }
    }

    /// Sync every window due at `now`. Windows fail independently.
    pub async fn sync_project(&self, project: &Project, now: DateTime<Utc>) -> ProjectSyncResult {
        info!(project_id = project.id, "Syncing project usage");

        let mut result = ProjectSyncResult::default();
        for window in usage_windows(now) {
            result.windows += 1;
            match self.sync_window(project, &window).await {
                Ok(true) => result.submitted += 1,
                Ok(false) => {}
                Err(e) => {
                    result.failed += 1;
                    error!(
                        project_id = project.id,
                        at = %window.start.to_rfc3339(),
                        error = %e,
                        "Project usage window dropped"
                    );
                }
            }
        }
        result
    }

    /// Collect and submit one window. Returns whether a report was sent.
    pub async fn sync_window(
        &self,
        project: &Project,
        window: &UsageWindow,
    ) -> Result<bool, CollectError> {
        let report = self.collect_window(project, window).await?;
        if report.resources.is_empty() {
            return Ok(false);
        }

        if let Err(source) = self.billing.submit_project_usage(&report).await {
            self.metrics.inc_submissions(KIND, false);
            return Err(CollectError::Submit { kind: KIND, source });
        }
        self.metrics.inc_submissions(KIND, true);
        self.logger
            .log_project_usage(project.id, &report.at.to_rfc3339(), report.resources.len());

        Ok(true)
    }

    /// Query all resources for a window, stopping at the first failure
    pub async fn collect_window(
        &self,
        project: &Project,
        window: &UsageWindow,
    ) -> Result<ProjectUsageReport, CollectError> {
        let mut report = ProjectUsageReport {
            location: self.location.clone(),
            project_id: project.id,
            at: window.start,
            resources: Vec::with_capacity(ProjectResource::ALL.len()),
        };

        for resource in ProjectResource::ALL {
            let query = self.queries.project_summary(resource, project.id, window);
            let value = match self.gateway.query_scalar(&query).await {
                Ok(value) => value,
                Err(source) => {
                    self.metrics.inc_query_errors(resource.name());
                    return Err(CollectError::Query {
                        resource: resource.name(),
                        source,
                    });
                }
            };

            debug!(
                project_id = project.id,
                resource = resource.name(),
                value = %value,
                "Collected project usage"
            );
            report.resources.push(UsageResource {
                name: resource.name().to_string(),
                value,
            });
        }

        Ok(report)
    }
}
