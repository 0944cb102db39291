//! PromQL catalogue for project summaries and per-instance metrics
//!
//! The expressions feed billing directly, so they are kept exactly as the
//! accounting side expects them, quirks included.

use super::InstantQuery;
use crate::models::UsageWindow;

/// Scrape interval of the metrics store, used to turn `sum_over_time` into an integral
pub const SCRAPE_INTERVAL_SECS: u64 = 15;

/// Daily per-project usage resources, in collection order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectResource {
    /// CPU seconds consumed
    CpuUsage,
    /// Requested CPU integrated over the window
    Cpu,
    /// Requested memory integrated over the window
    Memory,
    /// Transmitted bytes
    Egress,
    /// Requested storage in GiB-hours
    Disk,
    /// Available replicas integrated over the window
    Replica,
}

impl ProjectResource {
    pub const ALL: [ProjectResource; 6] = [
        ProjectResource::CpuUsage,
        ProjectResource::Cpu,
        ProjectResource::Memory,
        ProjectResource::Egress,
        ProjectResource::Disk,
        ProjectResource::Replica,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProjectResource::CpuUsage => "cpu_usage",
            ProjectResource::Cpu => "cpu",
            ProjectResource::Memory => "memory",
            ProjectResource::Egress => "egress",
            ProjectResource::Disk => "disk",
            ProjectResource::Replica => "replica",
        }
    }
}

/// Per-instance metric kinds reported for deployments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeploymentMetric {
    CpuUsage,
    Cpu,
    CpuLimit,
    MemoryUsage,
    Memory,
    MemoryLimit,
    Egress,
    Requests,
}

impl DeploymentMetric {
    pub const ALL: [DeploymentMetric; 8] = [
        DeploymentMetric::CpuUsage,
        DeploymentMetric::Cpu,
        DeploymentMetric::CpuLimit,
        DeploymentMetric::MemoryUsage,
        DeploymentMetric::Memory,
        DeploymentMetric::MemoryLimit,
        DeploymentMetric::Egress,
        DeploymentMetric::Requests,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DeploymentMetric::CpuUsage => "cpu_usage",
            DeploymentMetric::Cpu => "cpu",
            DeploymentMetric::CpuLimit => "cpu_limit",
            DeploymentMetric::MemoryUsage => "memory_usage",
            DeploymentMetric::Memory => "memory",
            DeploymentMetric::MemoryLimit => "memory_limit",
            DeploymentMetric::Egress => "egress",
            DeploymentMetric::Requests => "requests",
        }
    }
}

/// Per-volume metric kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskMetric {
    DiskUsage,
    DiskSize,
}

impl DiskMetric {
    pub const ALL: [DiskMetric; 2] = [DiskMetric::DiskUsage, DiskMetric::DiskSize];

    pub fn name(self) -> &'static str {
        match self {
            DiskMetric::DiskUsage => "disk_usage",
            DiskMetric::DiskSize => "disk_size",
        }
    }
}

/// Renders queries scoped to one tenant namespace
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    namespace: String,
}

impl QueryBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Summary query for one project resource, evaluated at the end of `window`
    pub fn project_summary(
        &self,
        resource: ProjectResource,
        project_id: i64,
        window: &UsageWindow,
    ) -> InstantQuery {
        let ns = &self.namespace;
        let range = window.duration_label;
        let secs = window.range_seconds;

        let expr = match resource {
            ProjectResource::CpuUsage => format!(
                r#"sum(increase(container_cpu_usage_seconds_total{{namespace="{ns}",name="",pod=~".*-{project_id}-[^-]+-[^-]+$"}}[{range}])) or vector(0)"#
            ),
            ProjectResource::Cpu => format!(
                r#"(sum(avg_over_time(kube_pod_container_resource_requests{{namespace="{ns}",resource="cpu",pod=~".*-{project_id}-[^-]+-[^-]+$"}}[{range}])) or vector(0)) * {secs}"#
            ),
            ProjectResource::Memory => format!(
                r#"(sum(sum_over_time(kube_pod_container_resource_requests{{namespace="{ns}",resource="memory",pod=~".*-{project_id}-[^-]+-[^-]+$"}}[{range}])) or vector(0)) * {SCRAPE_INTERVAL_SECS}"#
            ),
            // max - min over the window; under-reports when the counter resets more than once
            ProjectResource::Egress => format!(
                r#"(sum(max_over_time(container_network_transmit_bytes_total{{namespace="{ns}",pod=~".*-{project_id}-[^-]+-[^-]+$"}}[{range}])) - sum(min_over_time(container_network_transmit_bytes_total{{namespace="{ns}",pod=~".*-{project_id}-[^-]+-[^-]+$"}}[{range}]))) or vector(0)"#
            ),
            ProjectResource::Disk => format!(
                r#"((sum(avg_over_time(kube_persistentvolumeclaim_resource_requests_storage_bytes{{namespace="{ns}",persistentvolumeclaim=~".*-{project_id}$"}}[{range}])) or vector(0)) * {secs}) / (1024 * 1024 * 1024 * 3600)"#
            ),
            ProjectResource::Replica => format!(
                r#"(sum(avg_over_time(kube_deployment_status_replicas_available{{namespace="{ns}",deployment=~".*-{project_id}$"}}[{range}])) or vector(0)) * {secs}"#
            ),
        };

        InstantQuery::new(expr).at(window.end.timestamp())
    }

    /// Current per-instance value of a deployment metric across the namespace
    pub fn deployment(&self, metric: DeploymentMetric) -> InstantQuery {
        let ns = &self.namespace;

        let expr = match metric {
            DeploymentMetric::CpuUsage => format!(
                r#"irate(container_cpu_usage_seconds_total{{namespace="{ns}",name=""}}[1m])"#
            ),
            DeploymentMetric::Cpu => {
                format!(r#"kube_pod_container_resource_requests{{namespace="{ns}",resource="cpu"}}"#)
            }
            DeploymentMetric::CpuLimit => format!(
                r#"kube_pod_container_resource_limits{{namespace="{ns}",resource="cpu"}} > 0"#
            ),
            DeploymentMetric::MemoryUsage => {
                format!(r#"container_memory_usage_bytes{{namespace="{ns}",name=""}}"#)
            }
            DeploymentMetric::Memory => format!(
                r#"kube_pod_container_resource_requests{{namespace="{ns}",resource="memory"}} > 0"#
            ),
            DeploymentMetric::MemoryLimit => format!(
                r#"kube_pod_container_resource_limits{{namespace="{ns}",resource="memory"}} > 0"#
            ),
            DeploymentMetric::Egress => {
                format!(r#"rate(container_network_transmit_bytes_total{{namespace="{ns}"}}[1m])"#)
            }
            DeploymentMetric::Requests => format!(
                r#"sum(rate(parapet_requests{{ingress_namespace="{ns}"}}[1m])) by (service_name)"#
            ),
        };

        InstantQuery::new(expr)
    }

    /// Current per-volume value of a disk metric across the namespace
    pub fn disk(&self, metric: DiskMetric) -> InstantQuery {
        let ns = &self.namespace;

        let expr = match metric {
            DiskMetric::DiskUsage => format!(r#"kubelet_volume_stats_used_bytes{{namespace="{ns}"}}"#),
            DiskMetric::DiskSize => format!(
                r#"kube_persistentvolumeclaim_resource_requests_storage_bytes{{namespace="{ns}"}}"#
            ),
        };

        InstantQuery::new(expr)
    }
}
