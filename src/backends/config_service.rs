//! Resource-config query service over HTTP
//!
//! Asynchronous job API:
//! - `POST {base}/queries` with `{"expression": ...}` -> `{"queryId": ...}`
//! - `GET {base}/queries/{id}` -> `{"queryStatus", "results"?, "queryErrorMessage"?}`
//!
//! Result entries may be JSON objects or JSON-encoded strings (the format
//! resource inventories commonly return); both decode into rows.

use crate::error::{CopilotError, Result};
use crate::nlq::executor::{JobId, JobPoll, JobStatus, QueryService};
use crate::nlq::query::Row;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    query_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    query_status: JobStatus,
    #[serde(default)]
    results: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    query_error_message: Option<String>,
}

pub struct HttpConfigQueryService {
    base_url: String,
    client: Client,
}

impl HttpConfigQueryService {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CopilotError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(CopilotError::Backend(format!("{} failed with status {}: {}", what, status, text)))
    }
}

/// Decode one result entry into a row.
fn decode_result(value: serde_json::Value) -> Result<Row> {
    match value {
        serde_json::Value::Object(row) => Ok(row),
        serde_json::Value::String(encoded) => match serde_json::from_str(&encoded)? {
            serde_json::Value::Object(row) => Ok(row),
            other => Err(CopilotError::Backend(format!("Unexpected result entry: {}", other))),
        },
        other => Err(CopilotError::Backend(format!("Unexpected result entry: {}", other))),
    }
}

#[async_trait]
impl QueryService for HttpConfigQueryService {
    async fn submit(&self, expression: &str) -> Result<JobId> {
        let response = self
            .client
            .post(format!("{}/queries", self.base_url))
            .json(&serde_json::json!({ "expression": expression }))
            .send()
            .await
            .map_err(|e| CopilotError::Backend(format!("Failed to submit query: {}", e)))?;

        let submitted: SubmitResponse = Self::check(response, "Query submission")
            .await?
            .json()
            .await
            .map_err(|e| CopilotError::Backend(format!("Failed to parse submission response: {}", e)))?;
        Ok(JobId(submitted.query_id))
    }

    async fn poll(&self, job: &JobId) -> Result<JobPoll> {
        let response = self
            .client
            .get(format!("{}/queries/{}", self.base_url, job))
            .send()
            .await
            .map_err(|e| CopilotError::Backend(format!("Failed to poll query {}: {}", job, e)))?;

        let status: StatusResponse = Self::check(response, "Query poll")
            .await?
            .json()
            .await
            .map_err(|e| CopilotError::Backend(format!("Failed to parse poll response: {}", e)))?;
        debug!(job = %job, status = ?status.query_status, "polled query job");

        let results = match status.results {
            Some(values) if status.query_status == JobStatus::Complete => Some(
                values
                    .into_iter()
                    .map(decode_result)
                    .collect::<Result<Vec<Row>>>()?,
            ),
            _ => None,
        };

        Ok(JobPoll {
            status: status.query_status,
            results,
            error_message: status.query_error_message,
        })
    }
}
