//! Observability infrastructure for the usage worker
//!
//! Provides:
//! - Prometheus metrics (cycle latency, query errors, submissions, attribution misses)
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for cycle durations (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<WorkerMetricsInner> = OnceLock::new();

struct WorkerMetricsInner {
    cycle_duration_seconds: HistogramVec,
    query_errors: IntCounterVec,
    submissions: IntCounterVec,
    attribution_misses: IntCounterVec,
    projects_discovered: IntGauge,
}

impl WorkerMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram_vec!(
                "usage_worker_cycle_duration_seconds",
                "Wall time of one collection cycle iteration",
                &["cycle"],
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            query_errors: register_int_counter_vec!(
                "usage_worker_query_errors_total",
                "Metrics store queries that failed, by resource or metric kind",
                &["resource"]
            )
            .expect("Failed to register query_errors"),

            submissions: register_int_counter_vec!(
                "usage_worker_submissions_total",
                "Usage reports sent to the billing service",
                &["kind", "outcome"]
            )
            .expect("Failed to register submissions"),

            attribution_misses: register_int_counter_vec!(
                "usage_worker_attribution_misses_total",
                "Samples skipped because their instance name has no owner",
                &["metric"]
            )
            .expect("Failed to register attribution_misses"),

            projects_discovered: register_int_gauge!(
                "usage_worker_projects_discovered",
                "Projects returned by the last discovery call"
            )
            .expect("Failed to register projects_discovered"),
        }
    }
}

/// Handle to the process-wide worker metrics.
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct WorkerMetrics {
    _private: (),
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(WorkerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &WorkerMetricsInner {
        GLOBAL_METRICS.get_or_init(WorkerMetricsInner::new)
    }

    pub fn observe_cycle(&self, cycle: &str, elapsed: Duration) {
        self.inner()
            .cycle_duration_seconds
            .with_label_values(&[cycle])
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_query_errors(&self, resource: &str) {
        self.inner().query_errors.with_label_values(&[resource]).inc();
    }

    pub fn inc_submissions(&self, kind: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.inner()
            .submissions
            .with_label_values(&[kind, outcome])
            .inc();
    }

    pub fn add_attribution_misses(&self, metric: &str, count: u64) {
        if count > 0 {
            self.inner()
                .attribution_misses
                .with_label_values(&[metric])
                .inc_by(count);
        }
    }

    pub fn set_projects_discovered(&self, count: i64) {
        self.inner().projects_discovered.set(count);
    }
}

/// Structured logger for worker lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    location: String,
}

impl StructuredLogger {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }

    /// Log worker startup
    pub fn log_startup(&self, version: &str, namespace: &str) {
        info!(
            event = "worker_started",
            location = %self.location,
            worker_version = %version,
            namespace = %namespace,
            "Usage worker started"
        );
    }

    /// Log worker shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "worker_shutdown",
            location = %self.location,
            reason = %reason,
            "Usage worker shutting down"
        );
    }

    pub fn log_project_usage(&self, project_id: i64, at: &str, resources: usize) {
        info!(
            event = "project_usage_submitted",
            location = %self.location,
            project_id = project_id,
            at = %at,
            resources = resources,
            "Submitted project usage"
        );
    }

    /// Log the end of a cycle iteration; partial failures are warnings
    pub fn log_cycle_complete(&self, cycle: &str, elapsed: Duration, succeeded: usize, failed: usize) {
        if failed == 0 {
            info!(
                event = "cycle_completed",
                location = %self.location,
                cycle = %cycle,
                elapsed_ms = elapsed.as_millis() as u64,
                succeeded = succeeded,
                failed = failed,
                "Cycle complete"
            );
        } else {
            warn!(
                event = "cycle_completed",
                location = %self.location,
                cycle = %cycle,
                elapsed_ms = elapsed.as_millis() as u64,
                succeeded = succeeded,
                failed = failed,
                "Cycle complete with failures"
            );
        }
    }
}
