//! Collector tests against in-memory gateway and billing doubles

use super::*;
use crate::billing::{BillingApi, BillingError};
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{
    DeploymentUsageReport, DiskUsageReport, InstanceName, InstanceVector, Project,
    ProjectUsageReport, RangePoint,
};
use crate::prom::{
    DeploymentMetric, DiskMetric, InstantQuery, MetricsGateway, QueryBuilder, QueryError,
    RangeQuery,
};
use crate::window::day_window;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "tenants";
const LOCATION: &str = "eu-west";

#[derive(Default)]
struct MockGateway {
    scalar_calls: AtomicUsize,
    /// 1-based index of the scalar call that fails
    fail_scalar_at: Option<usize>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    vectors: HashMap<String, Vec<InstanceVector>>,
    failing_exprs: HashSet<String>,
}

impl MockGateway {
    fn with_vector(mut self, query: InstantQuery, samples: Vec<InstanceVector>) -> Self {
        self.vectors.insert(query.expr, samples);
        self
    }

    fn failing(mut self, query: InstantQuery) -> Self {
        self.failing_exprs.insert(query.expr);
        self
    }

    fn lookup(&self, query: &InstantQuery) -> Result<Vec<InstanceVector>, QueryError> {
        if self.failing_exprs.contains(&query.expr) {
            return Err(QueryError::Http { status: 500 });
        }
        Ok(self.vectors.get(&query.expr).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl MetricsGateway for MockGateway {
    async fn query_scalar(&self, _query: &InstantQuery) -> Result<String, QueryError> {
        let call = self.scalar_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_scalar_at == Some(call) {
            return Err(QueryError::Cardinality {
                expected: 1,
                actual: 0,
            });
        }
        Ok(format!("{}.5", call))
    }

    async fn query_vector(&self, query: &InstantQuery) -> Result<Vec<InstanceVector>, QueryError> {
        self.lookup(query)
    }

    async fn query_volume_vector(
        &self,
        query: &InstantQuery,
    ) -> Result<Vec<InstanceVector>, QueryError> {
        self.lookup(query)
    }

    async fn query_range(&self, _query: &RangeQuery) -> Result<Vec<RangePoint>, QueryError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct MockBilling {
    projects: Vec<Project>,
    fail_discovery: bool,
    fail_submissions: bool,
    project_reports: Mutex<Vec<ProjectUsageReport>>,
    deployment_reports: Mutex<Vec<DeploymentUsageReport>>,
    disk_reports: Mutex<Vec<DiskUsageReport>>,
}

impl MockBilling {
    fn with_projects(count: i64) -> Self {
        Self {
            projects: (1..=count)
                .map(|id| Project {
                    id,
                    location: LOCATION.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn rejected(method: &str) -> BillingError {
        BillingError::Rejected {
            method: method.to_string(),
            message: "unavailable".to_string(),
        }
    }
}

#[async_trait]
impl BillingApi for MockBilling {
    async fn list_projects_by_location(&self, location: &str) -> Result<Vec<Project>, BillingError> {
        assert_eq!(location, LOCATION);
        if self.fail_discovery {
            return Err(Self::rejected("collector.location"));
        }
        Ok(self.projects.clone())
    }

    async fn submit_project_usage(&self, report: &ProjectUsageReport) -> Result<(), BillingError> {
        if self.fail_submissions {
            return Err(Self::rejected("collector.setProjectUsage"));
        }
        self.project_reports.lock().unwrap().push(report.clone());
        Ok(())
    }

    async fn submit_deployment_usage(
        &self,
        report: &DeploymentUsageReport,
    ) -> Result<(), BillingError> {
        if self.fail_submissions {
            return Err(Self::rejected("collector.setDeploymentUsage"));
        }
        self.deployment_reports.lock().unwrap().push(report.clone());
        Ok(())
    }

    async fn submit_disk_usage(&self, report: &DiskUsageReport) -> Result<(), BillingError> {
        if self.fail_submissions {
            return Err(Self::rejected("collector.setDiskUsage"));
        }
        self.disk_reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

fn queries() -> QueryBuilder {
    QueryBuilder::new(NAMESPACE)
}

fn project_collector(
    gateway: Arc<MockGateway>,
    billing: Arc<MockBilling>,
) -> ProjectUsageCollector {
    ProjectUsageCollector::new(gateway, billing, queries(), LOCATION)
}

fn deployment_collector(
    gateway: Arc<MockGateway>,
    billing: Arc<MockBilling>,
) -> DeploymentUsageCollector {
    DeploymentUsageCollector::new(gateway, billing, queries(), LOCATION)
}

fn pod(name: &str, value: &str) -> InstanceVector {
    InstanceVector {
        instance: InstanceName::Pod(name.to_string()),
        timestamp: 1_700_000_000,
        value: value.to_string(),
    }
}

mod project_usage {
    use super::*;

    #[tokio::test]
    async fn test_window_submits_all_resources_in_order() {
        let gateway = Arc::new(MockGateway::default());
        let billing = Arc::new(MockBilling::default());
        let collector = project_collector(gateway.clone(), billing.clone());

        let start = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        let window = day_window(start, Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap());
        let project = Project {
            id: 42,
            location: LOCATION.to_string(),
        };

        let sent = collector.sync_window(&project, &window).await.unwrap();
        assert!(sent);

        let reports = billing.project_reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.project_id, 42);
        assert_eq!(report.location, LOCATION);
        assert_eq!(report.at, start);

        let names: Vec<_> = report.resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["cpu_usage", "cpu", "memory", "egress", "disk", "replica"]);
        assert_eq!(report.resources[0].value, "1.5");
        assert_eq!(report.resources[5].value, "6.5");
    }

    #[tokio::test]
    async fn test_query_failure_drops_window() {
        let gateway = Arc::new(MockGateway {
            fail_scalar_at: Some(4),
            ..Default::default()
        });
        let billing = Arc::new(MockBilling::default());
        let collector = project_collector(gateway.clone(), billing.clone());

        let start = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        let window = day_window(start, Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap());
        let project = Project {
            id: 7,
            location: LOCATION.to_string(),
        };

        let err = collector.sync_window(&project, &window).await.unwrap_err();
        assert!(matches!(err, CollectError::Query { resource: "egress", .. }));

        // queries stop at the failing resource
        assert_eq!(gateway.scalar_calls.load(Ordering::SeqCst), 4);
        assert!(billing.project_reports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_early_morning_syncs_yesterday_and_today() {
        let gateway = Arc::new(MockGateway::default());
        let billing = Arc::new(MockBilling::default());
        let collector = project_collector(gateway.clone(), billing.clone());
        let project = Project {
            id: 3,
            location: LOCATION.to_string(),
        };

        let now = Utc.with_ymd_and_hms(2024, 3, 15, 2, 30, 0).unwrap();
        let result = collector.sync_project(&project, now).await;

        assert_eq!(
            result,
            ProjectSyncResult {
                windows: 2,
                submitted: 2,
                failed: 0
            }
        );
        let reports = billing.project_reports.lock().unwrap();
        assert_eq!(reports[0].at, Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap());
        assert_eq!(reports[1].at, Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_windows_fail_independently() {
        // first window fails on its second query, second window is untouched
        let gateway = Arc::new(MockGateway {
            fail_scalar_at: Some(2),
            ..Default::default()
        });
        let billing = Arc::new(MockBilling::default());
        let collector = project_collector(gateway.clone(), billing.clone());
        let project = Project {
            id: 3,
            location: LOCATION.to_string(),
        };

        let now = Utc.with_ymd_and_hms(2024, 3, 15, 4, 0, 0).unwrap();
        let result = collector.sync_project(&project, now).await;

        assert_eq!(result.windows, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.submitted, 1);
        assert_eq!(gateway.scalar_calls.load(Ordering::SeqCst), 2 + 6);
    }

    #[tokio::test]
    async fn test_submission_failure_counts_as_failed() {
        let gateway = Arc::new(MockGateway::default());
        let billing = Arc::new(MockBilling {
            fail_submissions: true,
            ..Default::default()
        });
        let collector = project_collector(gateway, billing);
        let project = Project {
            id: 9,
            location: LOCATION.to_string(),
        };

        let now = Utc.with_ymd_and_hms(2024, 3, 15, 18, 0, 0).unwrap();
        let result = collector.sync_project(&project, now).await;

        assert_eq!(result.windows, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.submitted, 0);
    }
}

mod deployment_usage {
    use super::*;

    #[tokio::test]
    async fn test_batch_drops_unattributable_samples() {
        let gateway = Arc::new(MockGateway::default().with_vector(
            queries().deployment(DeploymentMetric::Cpu),
            vec![
                pod("web-12-7d9f8b6c5-x2k4p", "0.25"),
                pod("orphan-pod", "9"),
                pod("api-12-5c6d7e8f9-a1b2c", "0.5"),
            ],
        ));
        let billing = Arc::new(MockBilling::default());
        let collector = deployment_collector(gateway, billing.clone());

        let count = collector
            .sync_deployment_metric(DeploymentMetric::Cpu)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let reports = billing.deployment_reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].location, LOCATION);
        assert_eq!(reports[0].list.len(), 2);
        assert!(reports[0].list.iter().all(|i| i.name == "cpu" && i.project_id == 12));
    }

    #[tokio::test]
    async fn test_empty_batches_are_not_submitted() {
        let gateway = Arc::new(MockGateway::default().with_vector(
            queries().deployment(DeploymentMetric::Memory),
            vec![pod("no-owner", "1")],
        ));
        let billing = Arc::new(MockBilling::default());
        let collector = deployment_collector(gateway, billing.clone());

        let summary = collector.sync_all().await;

        assert_eq!(summary.succeeded, 10);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.items, 0);
        assert!(billing.deployment_reports.lock().unwrap().is_empty());
        assert!(billing.disk_reports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_failing_kind_does_not_stop_the_rest() {
        let q = queries();
        let gateway = Arc::new(
            MockGateway::default()
                .failing(q.deployment(DeploymentMetric::Egress))
                .with_vector(
                    q.deployment(DeploymentMetric::CpuUsage),
                    vec![pod("web-4-aaa-bbb", "0.1")],
                )
                .with_vector(
                    q.disk(DiskMetric::DiskSize),
                    vec![InstanceVector {
                        instance: InstanceName::Volume("pgdata-4".to_string()),
                        timestamp: 1_700_000_000,
                        value: "1024".to_string(),
                    }],
                ),
        );
        let billing = Arc::new(MockBilling::default());
        let collector = deployment_collector(gateway, billing.clone());

        let summary = collector.sync_all().await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 9);
        assert_eq!(summary.items, 2);
        assert_eq!(billing.deployment_reports.lock().unwrap().len(), 1);

        let disks = billing.disk_reports.lock().unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].list[0].disk_name, "pgdata");
        assert_eq!(disks[0].list[0].name, "disk_size");
    }

    #[tokio::test]
    async fn test_submission_failure_is_reported() {
        let gateway = Arc::new(MockGateway::default().with_vector(
            queries().disk(DiskMetric::DiskUsage),
            vec![InstanceVector {
                instance: InstanceName::Volume("data-8".to_string()),
                timestamp: 1,
                value: "5".to_string(),
            }],
        ));
        let billing = Arc::new(MockBilling {
            fail_submissions: true,
            ..Default::default()
        });
        let collector = deployment_collector(gateway, billing);

        let err = collector
            .sync_disk_metric(DiskMetric::DiskUsage)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::Submit { kind: "disk", .. }));
    }
}

mod scheduler {
    use super::*;

    fn scheduler(
        gateway: Arc<MockGateway>,
        billing: Arc<MockBilling>,
        config: SchedulerConfig,
        health: HealthRegistry,
    ) -> UsageScheduler {
        UsageScheduler::new(gateway, billing, queries(), LOCATION, config, health)
    }

    #[tokio::test]
    async fn test_discovery_failure_aborts_iteration() {
        let gateway = Arc::new(MockGateway::default());
        let billing = Arc::new(MockBilling {
            fail_discovery: true,
            ..MockBilling::with_projects(3)
        });
        let health = HealthRegistry::new();
        let scheduler = scheduler(
            gateway.clone(),
            billing.clone(),
            SchedulerConfig::default(),
            health.clone(),
        );

        let result = scheduler.project_iteration(&CancellationToken::new()).await;

        assert!(result.is_err());
        assert_eq!(gateway.scalar_calls.load(Ordering::SeqCst), 0);
        assert!(billing.project_reports.lock().unwrap().is_empty());
        assert_eq!(
            health.health().await.components[components::PROJECT_CYCLE].status,
            ComponentStatus::Unhealthy
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_project_concurrency_is_capped() {
        let gateway = Arc::new(MockGateway {
            delay: Some(Duration::from_millis(10)),
            ..Default::default()
        });
        let billing = Arc::new(MockBilling::with_projects(12));
        let scheduler = scheduler(
            gateway.clone(),
            billing.clone(),
            SchedulerConfig {
                max_concurrent_projects: 10,
                ..Default::default()
            },
            HealthRegistry::new(),
        );

        let summary = scheduler
            .project_iteration(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.discovered, 12);
        assert_eq!(summary.units.started, 12);
        assert_eq!(summary.units.succeeded, 12);
        assert!(gateway.max_in_flight.load(Ordering::SeqCst) <= 10);

        let reports = billing.project_reports.lock().unwrap();
        let ids: HashSet<i64> = reports.iter().map(|r| r.project_id).collect();
        assert_eq!(ids.len(), 12);
    }

    #[tokio::test]
    async fn test_deployment_iteration_records_health() {
        let gateway = Arc::new(MockGateway::default().failing(queries().disk(DiskMetric::DiskSize)));
        let billing = Arc::new(MockBilling::default());
        let health = HealthRegistry::new();
        let scheduler = scheduler(gateway, billing, SchedulerConfig::default(), health.clone());

        let summary = scheduler.deployment_iteration().await;

        assert_eq!(summary.failed, 1);
        assert_eq!(
            health.health().await.components[components::DEPLOYMENT_CYCLE].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let gateway = Arc::new(MockGateway::default());
        let billing = Arc::new(MockBilling::with_projects(2));
        let scheduler = Arc::new(scheduler(
            gateway,
            billing.clone(),
            SchedulerConfig {
                project_interval: Duration::from_secs(3600),
                deployment_interval: Duration::from_secs(3600),
                max_concurrent_projects: 2,
            },
            HealthRegistry::new(),
        ));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        // the first iteration ran before the long sleep
        assert!(!billing.project_reports.lock().unwrap().is_empty());
    }
}
