//! Billing service access
//!
//! Project discovery and usage submission. The worker only depends on the
//! [`BillingApi`] trait; [`BillingClient`] is the HTTP implementation.

mod client;

pub use client::{BillingClient, BillingClientConfig};

use crate::models::{DeploymentUsageReport, DiskUsageReport, Project, ProjectUsageReport};
use async_trait::async_trait;

/// Errors returned by the billing service
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid endpoint: {0}")]
    Url(#[from] url::ParseError),

    #[error("billing api returned http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("billing api rejected {method}: {message}")]
    Rejected { method: String, message: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Calls the worker makes against the billing service
#[async_trait]
pub trait BillingApi: Send + Sync {
    /// Projects currently active in `location`
    async fn list_projects_by_location(&self, location: &str) -> Result<Vec<Project>, BillingError>;

    async fn submit_project_usage(&self, report: &ProjectUsageReport) -> Result<(), BillingError>;

    async fn submit_deployment_usage(
        &self,
        report: &DeploymentUsageReport,
    ) -> Result<(), BillingError>;

    async fn submit_disk_usage(&self, report: &DiskUsageReport) -> Result<(), BillingError>;
}
