//! Worker configuration

use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;
use worker_lib::billing::BillingClientConfig;
use worker_lib::collector::SchedulerConfig;
use worker_lib::prom::PromClientConfig;

/// Worker configuration, read once from `COLLECTOR_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Tenant namespace the queries are scoped to
    #[serde(default)]
    pub namespace: String,

    /// Metrics store base URL (required)
    #[serde(default)]
    pub prom_endpoint: String,

    /// Billing service base URL
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    /// Bearer token for the billing service (required)
    #[serde(default)]
    pub token: String,

    /// Location whose projects this worker collects (required)
    #[serde(default)]
    pub location: String,

    /// Port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_project_interval")]
    pub project_interval_secs: u64,

    #[serde(default = "default_deployment_interval")]
    pub deployment_interval_secs: u64,

    #[serde(default = "default_max_concurrent_projects")]
    pub max_concurrent_projects: usize,
}

fn default_api_endpoint() -> String {
    BillingClientConfig::default().endpoint
}

fn default_api_port() -> u16 {
    8080
}

fn default_http_timeout() -> u64 {
    10
}

fn default_project_interval() -> u64 {
    SchedulerConfig::default().project_interval.as_secs()
}

fn default_deployment_interval() -> u64 {
    SchedulerConfig::default().deployment_interval.as_secs()
}

fn default_max_concurrent_projects() -> usize {
    SchedulerConfig::default().max_concurrent_projects
}

impl WorkerConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_env(config::Environment::with_prefix("COLLECTOR"))
    }

    fn from_env(source: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(source.try_parsing(true))
            .build()?;

        let config: WorkerConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("COLLECTOR_TOKEN", &self.token),
            ("COLLECTOR_PROM_ENDPOINT", &self.prom_endpoint),
            ("COLLECTOR_LOCATION", &self.location),
        ] {
            if value.trim().is_empty() {
                bail!("{} must be set", name);
            }
        }
        if self.max_concurrent_projects == 0 {
            bail!("COLLECTOR_MAX_CONCURRENT_PROJECTS must be at least 1");
        }
        Ok(())
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            project_interval: Duration::from_secs(self.project_interval_secs),
            deployment_interval: Duration::from_secs(self.deployment_interval_secs),
            max_concurrent_projects: self.max_concurrent_projects,
        }
    }

    pub fn prom_client(&self) -> PromClientConfig {
        PromClientConfig {
            endpoint: self.prom_endpoint.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
        }
    }

    pub fn billing_client(&self) -> BillingClientConfig {
        BillingClientConfig {
            endpoint: self.api_endpoint.clone(),
            token: self.token.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
        }
    }
}
