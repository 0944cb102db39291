//! Collection cycles
//!
//! Two independent loops run for the life of the process:
//! - the project cycle discovers projects and fans out daily usage collection
//! - the deployment cycle snapshots per-instance usage
//!
//! Each loop does its work, then sleeps a full period or until shutdown,
//! so start times drift by however long the work took.

use super::{DeploymentCycleSummary, DeploymentUsageCollector, ProjectUsageCollector};
use crate::billing::{BillingApi, BillingError};
use crate::health::{components, HealthRegistry};
use crate::observability::{StructuredLogger, WorkerMetrics};
use crate::prom::{MetricsGateway, QueryBuilder};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const PROJECT_CYCLE: &str = "project";
const DEPLOYMENT_CYCLE: &str = "deployment";

/// Configuration for the collection cycles
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause after each project cycle (default: 30 minutes)
    pub project_interval: Duration,
    /// Pause after each deployment cycle (default: 1 minute)
    pub deployment_interval: Duration,
    /// Projects collected concurrently (default: 10)
    pub max_concurrent_projects: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            project_interval: Duration::from_secs(30 * 60),
            deployment_interval: Duration::from_secs(60),
            max_concurrent_projects: 10,
        }
    }
}

/// Counts from one bounded fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutSummary {
    pub started: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items never started because shutdown was requested
    pub skipped: usize,
}

/// Run `work` for every item with at most `limit` in flight.
///
/// Waiting for a slot is abandoned as soon as `shutdown` fires; units already
/// running are awaited, the rest are skipped. A unit reports success by
/// resolving to `true`.
pub async fn fan_out<T, F, Fut>(
    items: Vec<T>,
    limit: usize,
    shutdown: &CancellationToken,
    work: F,
) -> FanOutSummary
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = bool> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks = JoinSet::new();
    let mut summary = FanOutSummary::default();
    let total = items.len();

    for item in items {
        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let unit = work(item);
        summary.started += 1;
        tasks.spawn(async move {
            let _permit = permit;
            unit.await
        });
    }
    summary.skipped = total - summary.started;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(true) => summary.succeeded += 1,
            Ok(false) => summary.failed += 1,
            Err(e) => {
                summary.failed += 1;
                error!(error = %e, "Collection unit panicked");
            }
        }
    }

    summary
}

/// Outcome of one project cycle iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectCycleSummary {
    pub discovered: usize,
    pub units: FanOutSummary,
}

/// Drives the project and deployment cycles
pub struct UsageScheduler {
    billing: Arc<dyn BillingApi>,
    location: String,
    projects: ProjectUsageCollector,
    deployments: DeploymentUsageCollector,
    config: SchedulerConfig,
    health: HealthRegistry,
    metrics: WorkerMetrics,
    logger: StructuredLogger,
}

impl UsageScheduler {
    pub fn new(
        gateway: Arc<dyn MetricsGateway>,
        billing: Arc<dyn BillingApi>,
        queries: QueryBuilder,
        location: impl Into<String>,
        config: SchedulerConfig,
        health: HealthRegistry,
    ) -> Self {
        let location = location.into();
        Self {
            projects: ProjectUsageCollector::new(
                gateway.clone(),
                billing.clone(),
                queries.clone(),
                location.clone(),
            ),
            deployments: DeploymentUsageCollector::new(
                gateway,
                billing.clone(),
                queries,
                location.clone(),
            ),
            billing,
            logger: StructuredLogger::new(location.clone()),
            location,
            config,
            health,
            metrics: WorkerMetrics::new(),
        }
    }

    /// Run both cycles until `shutdown` fires and both have finished their current iteration
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.health.register(components::PROJECT_CYCLE).await;
        self.health.register(components::DEPLOYMENT_CYCLE).await;

        let project = tokio::spawn({
            let scheduler = self.clone();
            let shutdown = shutdown.clone();
            async move { scheduler.run_project_cycle(shutdown).await }
        });
        let deployment = tokio::spawn({
            let scheduler = self.clone();
            let shutdown = shutdown.clone();
            async move { scheduler.run_deployment_cycle(shutdown).await }
        });

        let (project, deployment) = tokio::join!(project, deployment);
        for (cycle, joined) in [(PROJECT_CYCLE, project), (DEPLOYMENT_CYCLE, deployment)] {
            if let Err(e) = joined {
                error!(cycle = cycle, error = %e, "Cycle task ended abnormally");
            }
        }
    }

    pub async fn run_project_cycle(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.project_interval.as_secs(),
            max_concurrent = self.config.max_concurrent_projects,
            "Starting project usage cycle"
        );

        loop {
            let start = Instant::now();
            if let Ok(summary) = self.project_iteration(&shutdown).await {
                let elapsed = start.elapsed();
                self.metrics.observe_cycle(PROJECT_CYCLE, elapsed);
                self.logger.log_cycle_complete(
                    PROJECT_CYCLE,
                    elapsed,
                    summary.units.succeeded,
                    summary.units.failed,
                );
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutting down project usage cycle");
                    break;
                }
                _ = tokio::time::sleep(self.config.project_interval) => {}
            }
        }
    }

    pub async fn run_deployment_cycle(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.deployment_interval.as_secs(),
            "Starting deployment usage cycle"
        );

        loop {
            let start = Instant::now();
            let summary = self.deployment_iteration().await;
            let elapsed = start.elapsed();
            self.metrics.observe_cycle(DEPLOYMENT_CYCLE, elapsed);
            self.logger
                .log_cycle_complete(DEPLOYMENT_CYCLE, elapsed, summary.succeeded, summary.failed);

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutting down deployment usage cycle");
                    break;
                }
                _ = tokio::time::sleep(self.config.deployment_interval) => {}
            }
        }
    }

    /// Discover projects and collect each under the concurrency cap.
    ///
    /// A discovery failure aborts the iteration before any project is touched.
    pub async fn project_iteration(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<ProjectCycleSummary, BillingError> {
        let projects = match self.billing.list_projects_by_location(&self.location).await {
            Ok(projects) => projects,
            Err(e) => {
                error!(location = %self.location, error = %e, "Failed to list projects");
                self.health
                    .set_unhealthy(components::PROJECT_CYCLE, format!("discovery failed: {}", e))
                    .await;
                return Err(e);
            }
        };

        let discovered = projects.len();
        self.metrics.set_projects_discovered(discovered as i64);
        info!(location = %self.location, projects = discovered, "Discovered projects");

        let collector = self.projects.clone();
        let units = fan_out(
            projects,
            self.config.max_concurrent_projects,
            shutdown,
            move |project| {
                let collector = collector.clone();
                async move {
                    let result = collector.sync_project(&project, Utc::now()).await;
                    result.failed == 0
                }
            },
        )
        .await;

        self.health
            .record_cycle(components::PROJECT_CYCLE, units.started, units.failed)
            .await;

        Ok(ProjectCycleSummary { discovered, units })
    }

    pub async fn deployment_iteration(&self) -> DeploymentCycleSummary {
        let summary = self.deployments.sync_all().await;
        self.health
            .record_cycle(components::DEPLOYMENT_CYCLE, summary.total(), summary.failed)
            .await;
        summary
    }
}
