//! HTTP client for the billing collector API
//!
//! Methods are RPC-style: `POST <endpoint>/<method>` with a JSON body and a
//! bearer token. Responses are wrapped as `{"ok": bool, "result": .., "error": {"message": ..}}`.

use super::{BillingApi, BillingError};
use crate::models::{
    CollectorLocation, DeploymentUsageReport, DiskUsageReport, Project, ProjectUsageReport,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

const METHOD_LOCATION: &str = "collector.location";
const METHOD_SET_PROJECT_USAGE: &str = "collector.setProjectUsage";
const METHOD_SET_DEPLOYMENT_USAGE: &str = "collector.setDeploymentUsage";
const METHOD_SET_DISK_USAGE: &str = "collector.setDiskUsage";

/// Configuration for the billing API client
#[derive(Debug, Clone)]
pub struct BillingClientConfig {
    pub endpoint: String,
    pub token: String,
    pub timeout: Duration,
}

impl Default for BillingClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://billing-api:8080/".to_string(),
            token: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct BillingClient {
    client: Client,
    base_url: Url,
    token: String,
}

#[derive(Debug, Serialize)]
struct LocationRequest<'a> {
    location: &'a str,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct Empty {}

impl BillingClient {
    pub fn new(config: BillingClientConfig) -> Result<Self, BillingError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        // Keep the path prefix when joining method names
        let mut endpoint = config.endpoint;
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let base_url = Url::parse(&endpoint)?;

        Ok(Self {
            client,
            base_url,
            token: config.token,
        })
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, BillingError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned + Default,
    {
        let url = self.base_url.join(method)?;
        debug!(method = %method, "Calling billing api");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        let envelope: Envelope<T> = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(BillingError::Http {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if !envelope.ok {
            return Err(BillingError::Rejected {
                method: method.to_string(),
                message: envelope.error.map(|e| e.message).unwrap_or_default(),
            });
        }

        Ok(envelope.result.unwrap_or_default())
    }
}

#[async_trait]
impl BillingApi for BillingClient {
    async fn list_projects_by_location(&self, location: &str) -> Result<Vec<Project>, BillingError> {
        let result: CollectorLocation = self
            .call(METHOD_LOCATION, &LocationRequest { location })
            .await?;

        Ok(result
            .projects
            .into_iter()
            .map(|mut p| {
                if p.location.is_empty() {
                    p.location = location.to_string();
                }
                p
            })
            .collect())
    }

    async fn submit_project_usage(&self, report: &ProjectUsageReport) -> Result<(), BillingError> {
        self.call::<_, Empty>(METHOD_SET_PROJECT_USAGE, report)
            .await
            .map(|_| ())
    }

    async fn submit_deployment_usage(
        &self,
        report: &DeploymentUsageReport,
    ) -> Result<(), BillingError> {
        self.call::<_, Empty>(METHOD_SET_DEPLOYMENT_USAGE, report)
            .await
            .map(|_| ())
    }

    async fn submit_disk_usage(&self, report: &DiskUsageReport) -> Result<(), BillingError> {
        self.call::<_, Empty>(METHOD_SET_DISK_USAGE, report)
            .await
            .map(|_| ())
    }
}
