//! HTTP client for the Prometheus query API

use super::{InstantQuery, MetricsGateway, QueryError, RangeQuery};
use crate::models::{InstanceName, InstanceVector, RangePoint};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

const QUERY_PATH: &str = "/api/v1/query";
const QUERY_RANGE_PATH: &str = "/api/v1/query_range";

const POD_LABEL: &str = "pod";
const SERVICE_LABEL: &str = "service_name";
const VOLUME_LABEL: &str = "persistentvolumeclaim";

/// Configuration for the metrics store client
#[derive(Debug, Clone)]
pub struct PromClientConfig {
    /// Base URL, e.g. "http://prometheus:9090"
    pub endpoint: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for PromClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://prometheus:9090".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Prometheus HTTP API client
pub struct PromClient {
    client: Client,
    endpoint: String,
}

impl PromClient {
    pub fn new(config: PromClientConfig) -> Result<Self, QueryError> {
        // Fail early on a bad endpoint instead of on the first query
        Url::parse(&config.endpoint)?;

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, path: &str, params: &[(&str, String)]) -> Result<ResultData, QueryError> {
        let url = Url::parse(&format!("{}{}", self.endpoint, path))?;

        let response = self.client.get(url).query(params).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        // Prometheus reports query errors as JSON with a 4xx/5xx status, so
        // the envelope wins over the http status whenever it decodes.
        let envelope: Envelope = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(QueryError::Http {
                    status: status.as_u16(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        envelope.into_data()
    }

    async fn instant(&self, query: &InstantQuery) -> Result<ResultData, QueryError> {
        let mut params = vec![("query", query.expr.clone())];
        if let Some(time) = query.time {
            params.push(("time", time.to_string()));
        }
        debug!(query = %query.expr, time = ?query.time, "Running instant query");
        self.fetch(QUERY_PATH, &params).await
    }

    async fn labelled_vector(
        &self,
        query: &InstantQuery,
        label: fn(&HashMap<String, String>) -> Option<InstanceName>,
    ) -> Result<Vec<InstanceVector>, QueryError> {
        let series = self.instant(query).await?.series("vector")?;

        let mut vectors = Vec::with_capacity(series.len());
        for s in series {
            // a broken tuple fails the query even when the series has no owner
            let (timestamp, value) = decode_sample(s.value.as_deref())?;
            let Some(instance) = label(&s.metric) else {
                continue;
            };
            vectors.push(InstanceVector {
                instance,
                timestamp: timestamp as i64,
                value,
            });
        }
        Ok(vectors)
    }
}

#[async_trait]
impl MetricsGateway for PromClient {
    async fn query_scalar(&self, query: &InstantQuery) -> Result<String, QueryError> {
        let data = self.instant(query).await?;

        if data.result_type == "scalar" {
            let tuple: Vec<Value> = serde_json::from_value(data.result)?;
            return decode_sample(Some(tuple.as_slice())).map(|(_, value)| value);
        }

        let series = data.series("vector")?;
        if series.len() != 1 {
            return Err(QueryError::Cardinality {
                expected: 1,
                actual: series.len(),
            });
        }
        decode_sample(series[0].value.as_deref()).map(|(_, value)| value)
    }

    async fn query_vector(&self, query: &InstantQuery) -> Result<Vec<InstanceVector>, QueryError> {
        self.labelled_vector(query, pod_or_service).await
    }

    async fn query_volume_vector(
        &self,
        query: &InstantQuery,
    ) -> Result<Vec<InstanceVector>, QueryError> {
        self.labelled_vector(query, volume).await
    }

    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<RangePoint>, QueryError> {
        let params = [
            ("query", query.expr.clone()),
            ("start", query.start.to_string()),
            ("end", query.end.to_string()),
            ("step", query.step.to_string()),
        ];
        debug!(query = %query.expr, start = query.start, end = query.end, "Running range query");

        let series = self.fetch(QUERY_RANGE_PATH, &params).await?.series("matrix")?;
        if series.len() != 1 {
            return Err(QueryError::Cardinality {
                expected: 1,
                actual: series.len(),
            });
        }

        series[0]
            .values
            .iter()
            .map(|tuple| -> Result<RangePoint, QueryError> {
                let (timestamp, value) = decode_sample(Some(tuple.as_slice()))?;
                Ok(RangePoint { timestamp, value })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    data: Option<ResultData>,
    #[serde(default)]
    error: Option<String>,
}

impl Envelope {
    fn into_data(self) -> Result<ResultData, QueryError> {
        if self.status != "success" {
            return Err(QueryError::Status {
                status: self.status,
                message: self.error.unwrap_or_default(),
            });
        }
        self.data
            .ok_or_else(|| QueryError::ResultType("missing data".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ResultData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Value,
}

impl ResultData {
    fn series(self, expected: &str) -> Result<Vec<Series>, QueryError> {
        if self.result_type != expected {
            return Err(QueryError::ResultType(self.result_type));
        }
        Ok(serde_json::from_value(self.result)?)
    }
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    metric: HashMap<String, String>,
    #[serde(default)]
    value: Option<Vec<Value>>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Decode a `[<unix seconds>, "<value>"]` pair
fn decode_sample(raw: Option<&[Value]>) -> Result<(f64, String), QueryError> {
    let raw = raw.ok_or_else(|| QueryError::MalformedSample("missing value".to_string()))?;

    match raw {
        [timestamp, value] => {
            let timestamp = timestamp.as_f64().ok_or_else(|| {
                QueryError::MalformedSample(format!("timestamp is not a number: {}", timestamp))
            })?;
            let value = value.as_str().ok_or_else(|| {
                QueryError::MalformedSample(format!("value is not a string: {}", value))
            })?;
            Ok((timestamp, value.to_string()))
        }
        _ => Err(QueryError::MalformedSample(format!(
            "expected [timestamp, value], got {} element(s)",
            raw.len()
        ))),
    }
}

fn non_empty(labels: &HashMap<String, String>, key: &str) -> Option<String> {
    labels.get(key).filter(|v| !v.is_empty()).cloned()
}

fn pod_or_service(labels: &HashMap<String, String>) -> Option<InstanceName> {
    non_empty(labels, POD_LABEL)
        .map(InstanceName::Pod)
        .or_else(|| non_empty(labels, SERVICE_LABEL).map(InstanceName::Service))
}

fn volume(labels: &HashMap<String, String>) -> Option<InstanceName> {
    non_empty(labels, VOLUME_LABEL).map(InstanceName::Volume)
}
