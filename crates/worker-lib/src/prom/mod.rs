//! Metric query gateway
//!
//! Thin typed access to a Prometheus-compatible query API. Every call is a
//! single round trip; envelope problems surface as [`QueryError`] and are
//! never papered over with default values.

mod client;
mod queries;

pub use client::{PromClient, PromClientConfig};
pub use queries::{DeploymentMetric, DiskMetric, ProjectResource, QueryBuilder};

use crate::models::{InstanceVector, RangePoint};
use async_trait::async_trait;

/// Errors returned by the query gateway
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid query url: {0}")]
    Url(#[from] url::ParseError),

    #[error("metrics store returned http {status}")]
    Http { status: u16 },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("query status {status}: {message}")]
    Status { status: String, message: String },

    #[error("unexpected result type {0}")]
    ResultType(String),

    #[error("expected {expected} result(s), got {actual}")]
    Cardinality { expected: usize, actual: usize },

    #[error("malformed sample: {0}")]
    MalformedSample(String),
}

/// An instant query evaluated at an optional unix timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantQuery {
    pub expr: String,
    pub time: Option<i64>,
}

impl InstantQuery {
    pub fn new(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            time: None,
        }
    }

    pub fn at(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }
}

/// A range query over `[start, end]` sampled every `step` seconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub expr: String,
    pub start: i64,
    pub end: i64,
    pub step: u64,
}

/// Access to the upstream metrics store
#[async_trait]
pub trait MetricsGateway: Send + Sync {
    /// Run a query expected to return exactly one sample and return its raw value
    async fn query_scalar(&self, query: &InstantQuery) -> Result<String, QueryError>;

    /// Run a vector query keyed by `pod` or `service_name`
    async fn query_vector(&self, query: &InstantQuery) -> Result<Vec<InstanceVector>, QueryError>;

    /// Run a vector query keyed by `persistentvolumeclaim`
    async fn query_volume_vector(
        &self,
        query: &InstantQuery,
    ) -> Result<Vec<InstanceVector>, QueryError>;

    /// Run a range query expected to return exactly one series
    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<RangePoint>, QueryError>;
}
