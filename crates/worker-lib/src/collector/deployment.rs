//! Per-instance deployment and disk usage
//!
//! One vector query per metric kind covers the whole namespace. Samples are
//! attributed by instance name; anything without an owner is dropped. Each
//! metric kind is its own failure domain.

use super::CollectError;
use crate::attribution::attribute_instance;
use crate::billing::BillingApi;
use crate::models::{
    DeploymentUsageItem, DeploymentUsageReport, DiskUsageItem, DiskUsageReport, InstanceVector,
};
use crate::observability::WorkerMetrics;
use crate::prom::{DeploymentMetric, DiskMetric, MetricsGateway, QueryBuilder};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

const DEPLOYMENT_KIND: &str = "deployment";
const DISK_KIND: &str = "disk";

/// Outcome of one deployment cycle iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeploymentCycleSummary {
    /// Metric kinds that completed (including empty batches)
    pub succeeded: usize,
    pub failed: usize,
    /// Items submitted across all kinds
    pub items: usize,
}

impl DeploymentCycleSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Attribute pod/service samples for one metric kind.
///
/// Returns the items and the number of samples without an owner. Values
/// that do not parse are reported as zero; the item itself is kept.
pub fn deployment_items(metric: &str, vectors: &[InstanceVector]) -> (Vec<DeploymentUsageItem>, u64) {
    let mut misses = 0;
    let mut items = Vec::with_capacity(vectors.len());

    for v in vectors {
        let Some(owner) = attribute_instance(&v.instance) else {
            misses += 1;
            continue;
        };
        items.push(DeploymentUsageItem {
            project_id: owner.project_id,
            deployment_name: owner.name,
            name: metric.to_string(),
            pod: v.instance.as_str().to_string(),
            value: v.value.parse().unwrap_or_default(),
            at: v.timestamp,
        });
    }

    (items, misses)
}

/// Attribute volume samples for one disk metric kind
pub fn disk_items(metric: &str, vectors: &[InstanceVector]) -> (Vec<DiskUsageItem>, u64) {
    let mut misses = 0;
    let mut items = Vec::with_capacity(vectors.len());

    for v in vectors {
        let Some(owner) = attribute_instance(&v.instance) else {
            misses += 1;
            continue;
        };
        items.push(DiskUsageItem {
            project_id: owner.project_id,
            disk_name: owner.name,
            name: metric.to_string(),
            value: v.value.parse().unwrap_or_default(),
            at: v.timestamp,
        });
    }

    (items, misses)
}

#[derive(Clone)]
pub struct DeploymentUsageCollector {
    gateway: Arc<dyn MetricsGateway>,
    billing: Arc<dyn BillingApi>,
    queries: QueryBuilder,
    location: String,
    metrics: WorkerMetrics,
}

impl DeploymentUsageCollector {
    pub fn new(
        gateway: Arc<dyn MetricsGateway>,
        billing: Arc<dyn BillingApi>,
        queries: QueryBuilder,
        location: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            billing,
            queries,
            location: location.into(),
            metrics: WorkerMetrics::new(),
        }
    }

    /// Run every deployment and disk metric kind concurrently and wait for all of them
    pub async fn sync_all(&self) -> DeploymentCycleSummary {
        let mut tasks = JoinSet::new();

        for metric in DeploymentMetric::ALL {
            let collector = self.clone();
            tasks.spawn(async move { collector.sync_deployment_metric(metric).await });
        }
        for metric in DiskMetric::ALL {
            let collector = self.clone();
            tasks.spawn(async move { collector.sync_disk_metric(metric).await });
        }

        let mut summary = DeploymentCycleSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(items)) => {
                    summary.succeeded += 1;
                    summary.items += items;
                }
                Ok(Err(e)) => {
                    summary.failed += 1;
                    error!(error = %e, "Deployment usage batch failed");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(error = %e, "Deployment usage task panicked");
                }
            }
        }
        summary
    }

    /// Query, attribute and submit one deployment metric kind. Returns the item count.
    pub async fn sync_deployment_metric(
        &self,
        metric: DeploymentMetric,
    ) -> Result<usize, CollectError> {
        let name = metric.name();
        info!(metric = name, "Syncing deployment usage");

        let vectors = self
            .gateway
            .query_vector(&self.queries.deployment(metric))
            .await
            .map_err(|source| {
                self.metrics.inc_query_errors(name);
                CollectError::Query {
                    resource: name,
                    source,
                }
            })?;

        let (list, misses) = deployment_items(name, &vectors);
        self.metrics.add_attribution_misses(name, misses);
        debug!(metric = name, items = list.len(), skipped = misses, "Attributed samples");

        if list.is_empty() {
            return Ok(0);
        }

        let count = list.len();
        let report = DeploymentUsageReport {
            location: self.location.clone(),
            list,
        };
        self.submit(DEPLOYMENT_KIND, self.billing.submit_deployment_usage(&report).await)?;
        Ok(count)
    }

    /// Query, attribute and submit one disk metric kind. Returns the item count.
    pub async fn sync_disk_metric(&self, metric: DiskMetric) -> Result<usize, CollectError> {
        let name = metric.name();
        info!(metric = name, "Syncing disk usage");

        let vectors = self
            .gateway
            .query_volume_vector(&self.queries.disk(metric))
            .await
            .map_err(|source| {
                self.metrics.inc_query_errors(name);
                CollectError::Query {
                    resource: name,
                    source,
                }
            })?;

        let (list, misses) = disk_items(name, &vectors);
        self.metrics.add_attribution_misses(name, misses);
        debug!(metric = name, items = list.len(), skipped = misses, "Attributed samples");

        if list.is_empty() {
            return Ok(0);
        }

        let count = list.len();
        let report = DiskUsageReport {
            location: self.location.clone(),
            list,
        };
        self.submit(DISK_KIND, self.billing.submit_disk_usage(&report).await)?;
        Ok(count)
    }

    fn submit(
        &self,
        kind: &'static str,
        result: Result<(), crate::billing::BillingError>,
    ) -> Result<(), CollectError> {
        self.metrics.inc_submissions(kind, result.is_ok());
        result.map_err(|source| CollectError::Submit { kind, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InstanceName;

    fn pod(name: &str, value: &str) -> InstanceVector {
        InstanceVector {
            instance: InstanceName::Pod(name.to_string()),
            timestamp: 1_700_000_000,
            value: value.to_string(),
        }
    }

    #[test]
    fn test_deployment_items_skip_unowned() {
        let vectors = vec![
            pod("web-12-7d9f8b6c5-x2k4p", "0.25"),
            pod("web-abc-7d9f8b6c5-x2k4p", "1.0"),
            pod("worker-12-5c6d7e8f9-a1b2c", "0.75"),
        ];

        let (items, misses) = deployment_items("cpu", &vectors);

        assert_eq!(misses, 1);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].deployment_name, "web");
        assert_eq!(items[0].project_id, 12);
        assert_eq!(items[0].pod, "web-12-7d9f8b6c5-x2k4p");
        assert_eq!(items[0].value, 0.25);
        assert_eq!(items[1].deployment_name, "worker");
        assert!(items.iter().all(|i| i.name == "cpu" && i.at == 1_700_000_000));
    }

    #[test]
    fn test_unparseable_value_defaults_to_zero() {
        let (items, misses) = deployment_items("memory", &[pod("web-3-aaa-bbb", "NaN-ish")]);
        assert_eq!(misses, 0);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].value, 0.0);
    }

    #[test]
    fn test_service_samples_use_service_grammar() {
        let vectors = vec![InstanceVector {
            instance: InstanceName::Service("api-77".to_string()),
            timestamp: 1,
            value: "3.5".to_string(),
        }];
        let (items, _) = deployment_items("requests", &vectors);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].deployment_name, "api");
        assert_eq!(items[0].project_id, 77);
        assert_eq!(items[0].pod, "api-77");
    }

    #[test]
    fn test_disk_items() {
        let vectors = vec![
            InstanceVector {
                instance: InstanceName::Volume("pgdata-5".to_string()),
                timestamp: 10,
                value: "2048".to_string(),
            },
            InstanceVector {
                instance: InstanceName::Volume("pgdata-5-extra".to_string()),
                timestamp: 10,
                value: "1".to_string(),
            },
        ];
        let (items, misses) = disk_items("disk_size", &vectors);
        assert_eq!(misses, 1);
        assert_eq!(
            items,
            vec![DiskUsageItem {
                project_id: 5,
                disk_name: "pgdata".to_string(),
                name: "disk_size".to_string(),
                value: 2048.0,
                at: 10,
            }]
        );
    }
}
